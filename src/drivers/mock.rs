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
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};

use parking_lot::RwLock;

use super::PinHandler;
use crate::model::TRACK_COUNT;

/// Number of CV input channels the mock ADC exposes.
pub const ADC_CHANNEL_COUNT: usize = 4;

/// A mock ADC. Tests set channel codes; the engine reads them.
pub struct Adc {
    name: String,
    channels: [AtomicU16; ADC_CHANNEL_COUNT],
}

impl Adc {
    /// Gets the given mock ADC. Channels start at mid-scale (0 V).
    pub fn get(name: &str) -> Adc {
        Adc {
            name: name.to_string(),
            channels: std::array::from_fn(|_| AtomicU16::new(u16::MAX / 2)),
        }
    }

    /// Sets the raw code a channel will read.
    pub fn set_channel(&self, channel: usize, value: u16) {
        if let Some(ch) = self.channels.get(channel) {
            ch.store(value, Ordering::Relaxed);
        }
    }
}

impl super::Adc for Adc {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self, channel: usize) -> u16 {
        self.channels
            .get(channel)
            .map(|ch| ch.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl fmt::Display for Adc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock DAC recording the last value written to each channel.
pub struct Dac {
    name: String,
    channels: [AtomicU16; TRACK_COUNT],
}

impl Dac {
    /// Gets the given mock DAC.
    pub fn get(name: &str) -> Dac {
        Dac {
            name: name.to_string(),
            channels: std::array::from_fn(|_| AtomicU16::new(0)),
        }
    }

    /// The last value written to a channel.
    pub fn channel(&self, channel: usize) -> u16 {
        self.channels
            .get(channel)
            .map(|ch| ch.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl super::Dac for Dac {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn write(&self, channel: usize, value: u16) {
        if let Some(ch) = self.channels.get(channel) {
            ch.store(value, Ordering::Relaxed);
        }
    }
}

impl fmt::Display for Dac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock digital I/O block. Tests drive the input pins; driving a pin invokes
/// its edge handler on the caller's thread, which is this platform's stand-in
/// for interrupt context.
pub struct Dio {
    name: String,
    clock_input: AtomicBool,
    reset_input: AtomicBool,
    clock_output: AtomicBool,
    reset_output: AtomicBool,
    clock_input_handler: RwLock<Option<PinHandler>>,
    reset_input_handler: RwLock<Option<PinHandler>>,
}

impl Dio {
    /// Gets the given mock DIO block. All pins start low.
    pub fn get(name: &str) -> Dio {
        Dio {
            name: name.to_string(),
            clock_input: AtomicBool::new(false),
            reset_input: AtomicBool::new(false),
            clock_output: AtomicBool::new(false),
            reset_output: AtomicBool::new(false),
            clock_input_handler: RwLock::new(None),
            reset_input_handler: RwLock::new(None),
        }
    }

    /// Drives the clock input pin and fires its edge handler.
    pub fn set_clock_input(&self, value: bool) {
        self.clock_input.store(value, Ordering::Relaxed);
        let handler = self.clock_input_handler.read();
        if let Some(handler) = handler.as_ref() {
            handler(value);
        }
    }

    /// Drives the reset input pin and fires its edge handler.
    pub fn set_reset_input(&self, value: bool) {
        self.reset_input.store(value, Ordering::Relaxed);
        let handler = self.reset_input_handler.read();
        if let Some(handler) = handler.as_ref() {
            handler(value);
        }
    }

    /// Sets the reset input level without firing the handler, for setting up
    /// pre-existing pin state.
    pub fn set_reset_input_level(&self, value: bool) {
        self.reset_input.store(value, Ordering::Relaxed);
    }

    /// The current level of the clock output pin.
    pub fn clock_output(&self) -> bool {
        self.clock_output.load(Ordering::Relaxed)
    }

    /// The current level of the reset output pin.
    pub fn reset_output(&self) -> bool {
        self.reset_output.load(Ordering::Relaxed)
    }
}

impl super::Dio for Dio {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn clock_input(&self) -> bool {
        self.clock_input.load(Ordering::Relaxed)
    }

    fn reset_input(&self) -> bool {
        self.reset_input.load(Ordering::Relaxed)
    }

    fn set_clock_output(&self, value: bool) {
        self.clock_output.store(value, Ordering::Relaxed);
    }

    fn set_reset_output(&self, value: bool) {
        self.reset_output.store(value, Ordering::Relaxed);
    }

    fn set_clock_input_handler(&self, handler: Option<PinHandler>) {
        *self.clock_input_handler.write() = handler;
    }

    fn set_reset_input_handler(&self, handler: Option<PinHandler>) {
        *self.reset_input_handler.write() = handler;
    }
}

impl fmt::Display for Dio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock gate output bank exposing the current bitfield.
pub struct GateOutput {
    name: String,
    bits: AtomicU16,
}

impl GateOutput {
    /// Gets the given mock gate output bank. All gates start low.
    pub fn get(name: &str) -> GateOutput {
        GateOutput {
            name: name.to_string(),
            bits: AtomicU16::new(0),
        }
    }

    /// The current gate bitfield.
    pub fn gates(&self) -> u16 {
        self.bits.load(Ordering::Relaxed)
    }

    /// The current level of a single gate.
    pub fn gate(&self, index: usize) -> bool {
        self.gates() & (1 << index) != 0
    }
}

impl super::GateOutput for GateOutput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_gate(&self, index: usize, value: bool) {
        if index >= TRACK_COUNT {
            return;
        }
        let mask = 1u16 << index;
        if value {
            self.bits.fetch_or(mask, Ordering::Relaxed);
        } else {
            self.bits.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    fn set_gates(&self, bits: u16) {
        self.bits.store(bits, Ordering::Relaxed);
    }
}

impl fmt::Display for GateOutput {
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

    use crate::drivers::{Dio as _, GateOutput as _};

    use super::*;

    #[test]
    fn test_dio_handler_fires_on_edges() {
        let dio = Dio::get("mock-dio");
        let edges = Arc::new(AtomicUsize::new(0));
        {
            let edges = edges.clone();
            dio.set_clock_input_handler(Some(Arc::new(move |_| {
                edges.fetch_add(1, Ordering::Relaxed);
            })));
        }

        dio.set_clock_input(true);
        dio.set_clock_input(false);
        assert_eq!(edges.load(Ordering::Relaxed), 2);

        // Level-only set must not fire the reset handler.
        dio.set_reset_input_handler(Some(Arc::new(|_| panic!("handler fired"))));
        dio.set_reset_input_level(true);
        assert!(dio.reset_input());
    }

    #[test]
    fn test_gate_bits() {
        let gates = GateOutput::get("mock-gates");
        gates.set_gate(0, true);
        gates.set_gate(3, true);
        assert_eq!(gates.gates(), 0b1001);
        assert!(gates.gate(3));

        gates.set_gate(0, false);
        assert_eq!(gates.gates(), 0b1000);

        gates.set_gates(0xff);
        assert_eq!(gates.gates(), 0xff);
    }
}
