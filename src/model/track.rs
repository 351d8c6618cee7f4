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

/// Number of patterns per track.
pub const PATTERN_COUNT: usize = 16;

/// Number of steps per pattern.
pub const STEP_COUNT: usize = 16;

/// The playback algorithm a track runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackMode {
    /// Step sequenced gates and pitch CV.
    #[default]
    Note,
    /// Continuous modulation curves.
    Curve,
    /// MIDI input translated to gate and CV.
    MidiCv,
}

/// One step of a note pattern. Note 60 maps to 0 V, one volt per octave.
#[derive(Clone, Copy, Debug)]
pub struct NoteStep {
    pub gate: bool,
    pub note: u8,
}

impl Default for NoteStep {
    fn default() -> Self {
        NoteStep {
            gate: false,
            note: 60,
        }
    }
}

/// A note pattern: a fixed grid of steps.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotePattern {
    pub steps: [NoteStep; STEP_COUNT],
}

/// How curve values are interpolated between steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CurveShape {
    /// Hold each step's value.
    Step,
    /// Linear ramp to the next step.
    #[default]
    Ramp,
    /// Cosine-eased ramp to the next step.
    Smooth,
}

/// A curve pattern: one value per step plus the interpolation shape.
#[derive(Clone, Copy, Debug)]
pub struct CurvePattern {
    pub values: [f32; STEP_COUNT],
    pub shape: CurveShape,
}

impl Default for CurvePattern {
    fn default() -> Self {
        CurvePattern {
            values: [0.0; STEP_COUNT],
            shape: CurveShape::default(),
        }
    }
}

/// One track of the project.
#[derive(Clone)]
pub struct Track {
    mode: TrackMode,
    link_track: i32,
    midi_channel: u8,
    divisor: u32,
    note_patterns: [NotePattern; PATTERN_COUNT],
    curve_patterns: [CurvePattern; PATTERN_COUNT],
}

impl Track {
    pub fn new() -> Track {
        Track {
            mode: TrackMode::default(),
            link_track: -1,
            midi_channel: 0,
            // Sixteenth notes.
            divisor: PPQN / 4,
            note_patterns: [NotePattern::default(); PATTERN_COUNT],
            curve_patterns: [CurvePattern::default(); PATTERN_COUNT],
        }
    }

    pub fn track_mode(&self) -> TrackMode {
        self.mode
    }

    pub fn set_track_mode(&mut self, mode: TrackMode) {
        self.mode = mode;
    }

    /// The lower-indexed track this one follows, or -1 for none.
    pub fn link_track(&self) -> i32 {
        self.link_track
    }

    /// Sets the link target. The caller is responsible for only ever linking
    /// to an index below this track's own.
    pub fn set_link_track(&mut self, link_track: i32) {
        self.link_track = link_track;
    }

    /// The MIDI channel a MIDI/CV track listens on.
    pub fn midi_channel(&self) -> u8 {
        self.midi_channel
    }

    pub fn set_midi_channel(&mut self, channel: u8) {
        self.midi_channel = channel & 0x0f;
    }

    /// Ticks per sequencer step.
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn set_divisor(&mut self, divisor: u32) {
        self.divisor = divisor.max(1);
    }

    pub fn note_pattern(&self, index: usize) -> &NotePattern {
        &self.note_patterns[index % PATTERN_COUNT]
    }

    pub fn note_pattern_mut(&mut self, index: usize) -> &mut NotePattern {
        &mut self.note_patterns[index % PATTERN_COUNT]
    }

    pub fn curve_pattern(&self, index: usize) -> &CurvePattern {
        &self.curve_patterns[index % PATTERN_COUNT]
    }

    pub fn curve_pattern_mut(&mut self, index: usize) -> &mut CurvePattern {
        &mut self.curve_patterns[index % PATTERN_COUNT]
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let track = Track::new();
        assert_eq!(track.track_mode(), TrackMode::Note);
        assert_eq!(track.link_track(), -1);
        assert_eq!(track.divisor(), PPQN / 4);
        assert!(!track.note_pattern(0).steps[0].gate);
    }

    #[test]
    fn test_pattern_index_wraps() {
        let mut track = Track::new();
        track.note_pattern_mut(0).steps[0].gate = true;
        assert!(track.note_pattern(PATTERN_COUNT).steps[0].gate);
    }

    #[test]
    fn test_midi_channel_is_masked() {
        let mut track = Track::new();
        track.set_midi_channel(0x1f);
        assert_eq!(track.midi_channel(), 0x0f);
    }
}
