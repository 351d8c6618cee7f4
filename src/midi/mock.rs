// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use super::{data_length, ConnectHandler, DisconnectHandler, MidiMessage, RecvFilter};

/// How many messages a port buffers before the oldest inbound data is dropped.
const RECV_QUEUE_SIZE: usize = 64;

/// Assembles a byte stream into short MIDI messages. Real-time bytes that made
/// it past the filter interleave with channel messages without corrupting them.
#[derive(Default)]
struct Assembler {
    buf: [u8; 3],
    len: usize,
    expected: usize,
}

impl Assembler {
    /// Pushes a byte, returning a message when one completes.
    fn push(&mut self, byte: u8) -> Option<MidiMessage> {
        if byte >= 0xf8 {
            // System real-time interleaves anywhere without resetting state.
            return Some(MidiMessage::from_status(byte));
        }

        if byte & 0x80 != 0 {
            match data_length(byte) {
                Some(expected) => {
                    self.buf[0] = byte;
                    self.len = 1;
                    self.expected = expected;
                }
                None => {
                    // Sysex and friends: drop any partial message.
                    self.len = 0;
                    self.expected = 0;
                    return None;
                }
            }
        } else {
            if self.len == 0 || self.len >= 3 {
                return None;
            }
            self.buf[self.len] = byte;
            self.len += 1;
        }

        if self.len == self.expected + 1 {
            let message = MidiMessage::new(&self.buf[..self.len]);
            self.len = 0;
            self.expected = 0;
            return message;
        }

        None
    }
}

/// A mock MIDI port. Bytes are fed in by tests, pass through the receive
/// filter and assemble into messages; sends are recorded for inspection.
pub struct Port {
    name: String,
    filter: RwLock<Option<RecvFilter>>,
    assembler: Mutex<Assembler>,
    recv_tx: Sender<MidiMessage>,
    recv_rx: Receiver<MidiMessage>,
    sent: Mutex<Vec<MidiMessage>>,
    reject_sends: RwLock<bool>,
    connect_handler: RwLock<Option<ConnectHandler>>,
    disconnect_handler: RwLock<Option<DisconnectHandler>>,
}

impl Port {
    /// Gets the given mock port.
    pub fn get(name: &str) -> Port {
        let (recv_tx, recv_rx) = bounded(RECV_QUEUE_SIZE);
        Port {
            name: name.to_string(),
            filter: RwLock::new(None),
            assembler: Mutex::new(Assembler::default()),
            recv_tx,
            recv_rx,
            sent: Mutex::new(Vec::new()),
            reject_sends: RwLock::new(false),
            connect_handler: RwLock::new(None),
            disconnect_handler: RwLock::new(None),
        }
    }

    /// Feeds raw bytes into the port as if they arrived on the wire. Runs the
    /// receive filter per byte, then message assembly. Callable from any
    /// thread; this is the mock's "receive interrupt".
    pub fn feed(&self, bytes: &[u8]) {
        for &byte in bytes {
            {
                let filter = self.filter.read();
                if let Some(filter) = filter.as_ref() {
                    if filter(byte) {
                        continue;
                    }
                }
            }

            let message = self.assembler.lock().push(byte);
            if let Some(message) = message {
                // Queue full means the host stopped draining; drop.
                let _ = self.recv_tx.try_send(message);
            }
        }
    }

    /// Feeds a complete message into the port.
    pub fn feed_message(&self, message: &MidiMessage) {
        self.feed(message.bytes());
    }

    /// All messages sent through this port so far.
    pub fn sent_messages(&self) -> Vec<MidiMessage> {
        self.sent.lock().clone()
    }

    /// Clears the sent message record.
    pub fn clear_sent_messages(&self) {
        self.sent.lock().clear();
    }

    /// Makes send() report failure, for testing transport errors.
    pub fn set_reject_sends(&self, reject: bool) {
        *self.reject_sends.write() = reject;
    }

    /// Simulates a USB device connect.
    pub fn connect(&self, vendor_id: u16, product_id: u16) {
        let handler = self.connect_handler.read();
        if let Some(handler) = handler.as_ref() {
            handler(vendor_id, product_id);
        }
    }

    /// Simulates a USB device disconnect.
    pub fn disconnect(&self) {
        let handler = self.disconnect_handler.read();
        if let Some(handler) = handler.as_ref() {
            handler();
        }
    }
}

impl super::MidiPort for Port {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, message: &MidiMessage) -> bool {
        if *self.reject_sends.read() {
            return false;
        }
        self.sent.lock().push(*message);
        true
    }

    fn recv(&self) -> Option<MidiMessage> {
        self.recv_rx.try_recv().ok()
    }

    fn set_recv_filter(&self, filter: Option<RecvFilter>) {
        *self.filter.write() = filter;
    }

    fn set_connect_handler(&self, handler: Option<ConnectHandler>) {
        *self.connect_handler.write() = handler;
    }

    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>) {
        *self.disconnect_handler.write() = handler;
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::midi::MidiPort;

    use super::*;

    #[test]
    fn test_assembles_messages_from_bytes() {
        let port = Port::get("mock-midi");
        port.feed(&[0x90, 60, 100, 0x80, 60, 0]);

        assert_eq!(port.recv(), MidiMessage::new(&[0x90, 60, 100]));
        assert_eq!(port.recv(), MidiMessage::new(&[0x80, 60, 0]));
        assert_eq!(port.recv(), None);
    }

    #[test]
    fn test_filter_diverts_bytes() {
        let port = Port::get("mock-midi");
        let diverted = Arc::new(AtomicUsize::new(0));
        {
            let diverted = diverted.clone();
            port.set_recv_filter(Some(Arc::new(move |byte| {
                if MidiMessage::is_clock_message(byte) {
                    diverted.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                false
            })));
        }

        // A note-on with a timing clock byte interleaved mid-message.
        port.feed(&[0x90, 60, 0xf8, 100]);

        assert_eq!(diverted.load(Ordering::Relaxed), 1);
        assert_eq!(port.recv(), MidiMessage::new(&[0x90, 60, 100]));
        assert_eq!(port.recv(), None);
    }

    #[test]
    fn test_realtime_interleaves_without_filter() {
        let port = Port::get("mock-midi");
        port.feed(&[0x90, 60, 0xf8, 100]);

        // Without a filter the real-time byte becomes its own message, in
        // arrival order, and the note-on still assembles.
        assert_eq!(port.recv(), Some(MidiMessage::from_status(0xf8)));
        assert_eq!(port.recv(), MidiMessage::new(&[0x90, 60, 100]));
    }

    #[test]
    fn test_sysex_is_dropped() {
        let port = Port::get("mock-midi");
        port.feed(&[0xf0, 1, 2, 3, 0xf7, 0x90, 60, 100]);

        assert_eq!(port.recv(), MidiMessage::new(&[0x90, 60, 100]));
        assert_eq!(port.recv(), None);
    }

    #[test]
    fn test_send_records_and_rejects() {
        let port = Port::get("mock-midi");
        let msg = MidiMessage::new(&[0xb0, 7, 127]).expect("valid message");

        assert!(port.send(&msg));
        assert_eq!(port.sent_messages(), vec![msg]);

        port.set_reject_sends(true);
        assert!(!port.send(&msg));
        assert_eq!(port.sent_messages().len(), 1);
    }

    #[test]
    fn test_hotplug_handlers() {
        let port = Port::get("mock-usb-midi");
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        {
            let connects = connects.clone();
            port.set_connect_handler(Some(Arc::new(move |vendor, product| {
                assert_eq!((vendor, product), (0x1234, 0x5678));
                connects.fetch_add(1, Ordering::Relaxed);
            })));
            let disconnects = disconnects.clone();
            port.set_disconnect_handler(Some(Arc::new(move || {
                disconnects.fetch_add(1, Ordering::Relaxed);
            })));
        }

        port.connect(0x1234, 0x5678);
        port.disconnect();

        assert_eq!(connects.load(Ordering::Relaxed), 1);
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
    }
}
