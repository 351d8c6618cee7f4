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
use std::{error::Error, fmt, sync::Arc};

use midly::live::LiveEvent;

mod midir;
mod mock;

/// The two physical MIDI transports on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortId {
    /// The serial (DIN) MIDI port.
    Midi,
    /// The USB MIDI port.
    UsbMidi,
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::Midi => write!(f, "midi"),
            PortId::UsbMidi => write!(f, "usb-midi"),
        }
    }
}

/// A short MIDI message as it travels on the wire. At most three bytes; system
/// real-time messages are a single status byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiMessage {
    bytes: [u8; 3],
    len: u8,
}

impl MidiMessage {
    /// Builds a message from raw bytes. Returns None for empty or oversized input.
    pub fn new(bytes: &[u8]) -> Option<MidiMessage> {
        if bytes.is_empty() || bytes.len() > 3 {
            return None;
        }
        let mut buf = [0u8; 3];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(MidiMessage {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// Builds a single status byte message (system real-time).
    pub fn from_status(status: u8) -> MidiMessage {
        MidiMessage {
            bytes: [status, 0, 0],
            len: 1,
        }
    }

    /// The raw bytes of the message.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The status byte.
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The channel encoded in the low status nibble. Channel messages carry the
    /// channel here; for system messages this is the low nibble of the system
    /// status and receivers are expected to not care.
    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0f
    }

    /// Returns true for the status bytes that belong to the clock filter set:
    /// timing clock, start, continue, stop and song position pointer.
    pub fn is_clock_message(byte: u8) -> bool {
        matches!(byte, 0xf2 | 0xf8 | 0xfa | 0xfb | 0xfc)
    }

    /// Parses the message into a typed midly event where one exists.
    pub fn to_live(&self) -> Option<LiveEvent<'_>> {
        LiveEvent::parse(self.bytes()).ok()
    }

    /// Encodes a typed midly event into a wire message. Events longer than
    /// three bytes (sysex) have no short-message representation.
    pub fn from_live(event: &LiveEvent) -> Option<MidiMessage> {
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event.write(&mut buf).ok()?;
        MidiMessage::new(&buf)
    }
}

/// Number of data bytes that follow the given status byte, or None for bytes
/// that don't start a message this engine assembles (sysex, data bytes).
pub(crate) fn data_length(status: u8) -> Option<usize> {
    match status {
        0x80..=0xbf | 0xe0..=0xef => Some(2),
        0xc0..=0xdf => Some(1),
        0xf1 | 0xf3 => Some(1),
        0xf2 => Some(2),
        0xf6 => Some(0),
        0xf8..=0xff => Some(0),
        _ => None,
    }
}

/// A byte-level receive filter. Returns true if the byte was consumed and must
/// not enter the message queue. Runs in the transport's receive context.
pub type RecvFilter = Arc<dyn Fn(u8) -> bool + Send + Sync>;

/// Invoked when a USB MIDI device is connected, with vendor and product ids.
pub type ConnectHandler = Arc<dyn Fn(u16, u16) + Send + Sync>;

/// Invoked when a USB MIDI device is disconnected.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A bidirectional MIDI transport with a byte-level receive filter.
pub trait MidiPort: fmt::Display + Send + Sync {
    /// Returns the name of the port.
    fn name(&self) -> String;

    /// Sends a message. Returns false if the transport rejected it.
    fn send(&self, message: &MidiMessage) -> bool;

    /// Pops the next received message, if any. Never blocks.
    fn recv(&self) -> Option<MidiMessage>;

    /// Installs the byte-level receive filter. Bytes the filter consumes are
    /// diverted before message assembly.
    fn set_recv_filter(&self, filter: Option<RecvFilter>);

    /// Installs the hotplug connect handler. Ports without hotplug ignore it.
    fn set_connect_handler(&self, _handler: Option<ConnectHandler>) {}

    /// Installs the hotplug disconnect handler. Ports without hotplug ignore it.
    fn set_disconnect_handler(&self, _handler: Option<DisconnectHandler>) {}
}

/// Lists MIDI ports known to midir.
pub fn list_ports() -> Result<Vec<Box<dyn MidiPort>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a port with the given name. Names starting with "mock" produce a mock
/// port that never touches the host MIDI system.
pub fn get_port(name: &str) -> Result<Arc<dyn MidiPort>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Port::get(name)));
    }

    Ok(Arc::new(midir::get(name)?))
}


#[cfg(test)]
mod message_test {
    use super::*;

    #[test]
    fn test_channel_nibble() {
        let msg = MidiMessage::new(&[0x92, 60, 100]).expect("valid message");
        assert_eq!(msg.channel(), 2);
        assert_eq!(msg.status(), 0x92);
        assert_eq!(msg.bytes(), &[0x92, 60, 100]);
    }

    #[test]
    fn test_clock_filter_set() {
        for byte in [0xf8, 0xfa, 0xfb, 0xfc, 0xf2] {
            assert!(MidiMessage::is_clock_message(byte), "{byte:#x}");
        }
        for byte in [0x90, 0xb0, 0xf0, 0xf7, 0xfe, 0xff] {
            assert!(!MidiMessage::is_clock_message(byte), "{byte:#x}");
        }
    }

    #[test]
    fn test_live_round_trip() {
        let msg = MidiMessage::new(&[0x90, 60, 127]).expect("valid message");
        let live = msg.to_live().expect("parseable");
        assert!(matches!(live, LiveEvent::Midi { .. }));
        assert_eq!(MidiMessage::from_live(&live), Some(msg));
    }

    #[test]
    fn test_data_lengths() {
        assert_eq!(data_length(0x90), Some(2));
        assert_eq!(data_length(0xc5), Some(1));
        assert_eq!(data_length(0xe0), Some(2));
        assert_eq!(data_length(0xf8), Some(0));
        assert_eq!(data_length(0xf0), None);
        assert_eq!(data_length(0x42), None);
    }

    #[test]
    fn test_rejects_oversized() {
        assert!(MidiMessage::new(&[]).is_none());
        assert!(MidiMessage::new(&[0xf0, 1, 2, 0xf7]).is_none());
    }
}
