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
use midly::{live::LiveEvent, MidiMessage as MidlyMessage};

use super::note_to_volts;
use crate::midi::{MidiMessage, PortId};
use crate::model::Track;

/// Velocity CV full-scale voltage.
const VELOCITY_RANGE_VOLTS: f32 = 5.0;

/// Translates incoming MIDI notes into a gate plus pitch and velocity CV.
/// Monophonic, last note priority. CV sub-channel 0 is pitch, 1 is velocity.
pub struct MidiCvTrackEngine {
    mute: bool,
    gate: bool,
    active_note: Option<u8>,
    pitch_cv: f32,
    velocity_cv: f32,
}

impl MidiCvTrackEngine {
    pub fn new() -> MidiCvTrackEngine {
        MidiCvTrackEngine {
            mute: false,
            gate: false,
            active_note: None,
            pitch_cv: 0.0,
            velocity_cv: 0.0,
        }
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn set_fill(&mut self, _fill: bool) {}

    pub fn set_pattern(&mut self, _pattern: usize) {}

    pub fn reset(&mut self) {
        self.gate = false;
        self.active_note = None;
    }

    pub fn tick(&mut self, _tick: u32) {}

    pub fn update(&mut self, _dt: f32, _track: &Track) {}

    pub fn receive_midi(&mut self, _port: PortId, channel: u8, track: &Track, message: &MidiMessage) {
        if channel != track.midi_channel() {
            return;
        }

        let event = match message.to_live() {
            Some(event) => event,
            None => return,
        };

        let midly_message = match event {
            LiveEvent::Midi { message, .. } => message,
            _ => return,
        };

        match midly_message {
            MidlyMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                self.active_note = Some(key.as_int());
                self.pitch_cv = note_to_volts(key.as_int());
                self.velocity_cv = vel.as_int() as f32 / 127.0 * VELOCITY_RANGE_VOLTS;
                self.gate = true;
            }
            MidlyMessage::NoteOn { key, .. } | MidlyMessage::NoteOff { key, .. } => {
                // Only the active note releases the gate; stale note offs
                // from earlier overlapping notes are ignored.
                if self.active_note == Some(key.as_int()) {
                    self.active_note = None;
                    self.gate = false;
                }
            }
            _ => {}
        }
    }

    pub fn gate_output(&self, index: usize) -> bool {
        index == 0 && self.gate && !self.mute
    }

    pub fn cv_output(&self, index: usize) -> f32 {
        match index {
            1 => self.velocity_cv,
            _ => self.pitch_cv,
        }
    }
}

impl Default for MidiCvTrackEngine {
    fn default() -> Self {
        Self::new()
    }
}
