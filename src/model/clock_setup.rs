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
use serde::Deserialize;

use crate::clock::PPQN;

/// The configured transport authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockSetupMode {
    #[default]
    Auto,
    Master,
    Slave,
}

/// How the external clock and reset input pins are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockInputMode {
    /// Reset line asserts reset; releasing it starts the transport.
    #[default]
    Reset,
    /// Reset line level gates the transport: high continues, low stops.
    Run,
    /// Reset line edges start and stop; stopping also rewinds.
    StartStop,
}

/// What the reset output pin carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockOutputMode {
    /// The transport reset state.
    #[default]
    Reset,
    /// The transport run state.
    Run,
    /// Leave the pin alone.
    Last,
}

/// Clock configuration. Mutations mark the setup dirty; the engine applies the
/// changes on its next cycle and clears the flag.
#[derive(Clone, Copy, Debug)]
pub struct ClockSetup {
    mode: ClockSetupMode,
    clock_input_divisor: u32,
    clock_input_mode: ClockInputMode,
    clock_output_divisor: u32,
    clock_output_pulse_ms: u32,
    clock_output_mode: ClockOutputMode,
    midi_rx: bool,
    midi_tx: bool,
    usb_rx: bool,
    usb_tx: bool,
    dirty: bool,
}

impl ClockSetup {
    pub fn new() -> ClockSetup {
        ClockSetup {
            mode: ClockSetupMode::default(),
            // DIN sync runs at 24 pulses per quarter.
            clock_input_divisor: PPQN / 24,
            clock_input_mode: ClockInputMode::default(),
            clock_output_divisor: PPQN / 4,
            clock_output_pulse_ms: 1,
            clock_output_mode: ClockOutputMode::default(),
            midi_rx: true,
            midi_tx: true,
            usb_rx: true,
            usb_tx: false,
            // Dirty from the start so the engine applies the setup at init.
            dirty: true,
        }
    }

    pub fn mode(&self) -> ClockSetupMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ClockSetupMode) {
        self.mode = mode;
        self.dirty = true;
    }

    pub fn clock_input_divisor(&self) -> u32 {
        self.clock_input_divisor
    }

    pub fn set_clock_input_divisor(&mut self, divisor: u32) {
        self.clock_input_divisor = divisor.max(1);
        self.dirty = true;
    }

    pub fn clock_input_mode(&self) -> ClockInputMode {
        self.clock_input_mode
    }

    pub fn set_clock_input_mode(&mut self, mode: ClockInputMode) {
        self.clock_input_mode = mode;
        self.dirty = true;
    }

    pub fn clock_output_divisor(&self) -> u32 {
        self.clock_output_divisor
    }

    pub fn set_clock_output_divisor(&mut self, divisor: u32) {
        self.clock_output_divisor = divisor.max(1);
        self.dirty = true;
    }

    pub fn clock_output_pulse_ms(&self) -> u32 {
        self.clock_output_pulse_ms
    }

    pub fn set_clock_output_pulse_ms(&mut self, pulse_ms: u32) {
        self.clock_output_pulse_ms = pulse_ms.clamp(1, 20);
        self.dirty = true;
    }

    pub fn clock_output_mode(&self) -> ClockOutputMode {
        self.clock_output_mode
    }

    pub fn set_clock_output_mode(&mut self, mode: ClockOutputMode) {
        self.clock_output_mode = mode;
        self.dirty = true;
    }

    pub fn midi_rx(&self) -> bool {
        self.midi_rx
    }

    pub fn set_midi_rx(&mut self, enabled: bool) {
        self.midi_rx = enabled;
        self.dirty = true;
    }

    pub fn midi_tx(&self) -> bool {
        self.midi_tx
    }

    pub fn set_midi_tx(&mut self, enabled: bool) {
        self.midi_tx = enabled;
        self.dirty = true;
    }

    pub fn usb_rx(&self) -> bool {
        self.usb_rx
    }

    pub fn set_usb_rx(&mut self, enabled: bool) {
        self.usb_rx = enabled;
        self.dirty = true;
    }

    pub fn usb_tx(&self) -> bool {
        self.usb_tx
    }

    pub fn set_usb_tx(&mut self, enabled: bool) {
        self.usb_tx = enabled;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Default for ClockSetup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_starts_dirty() {
        let setup = ClockSetup::new();
        assert!(setup.is_dirty());
    }

    #[test]
    fn test_mutation_marks_dirty() {
        let mut setup = ClockSetup::new();
        setup.clear_dirty();
        assert!(!setup.is_dirty());

        setup.set_mode(ClockSetupMode::Slave);
        assert!(setup.is_dirty());

        setup.clear_dirty();
        setup.set_clock_input_mode(ClockInputMode::Run);
        assert!(setup.is_dirty());
    }

    #[test]
    fn test_pulse_is_clamped() {
        let mut setup = ClockSetup::new();
        setup.set_clock_output_pulse_ms(0);
        assert_eq!(setup.clock_output_pulse_ms(), 1);
        setup.set_clock_output_pulse_ms(100);
        assert_eq!(setup.clock_output_pulse_ms(), 20);
    }
}
