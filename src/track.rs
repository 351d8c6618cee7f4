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
use crate::midi::{MidiMessage, PortId};
use crate::model::{Track, TrackMode};

mod curve;
mod midi_cv;
mod note;

pub use self::curve::CurveTrackEngine;
pub use self::midi_cv::MidiCvTrackEngine;
pub use self::note::NoteTrackEngine;

/// Converts a MIDI note number to volts, one volt per octave around note 60.
pub(crate) fn note_to_volts(note: u8) -> f32 {
    (note as f32 - 60.0) / 12.0
}

/// One track's playback engine. A tagged variant rather than a boxed trait:
/// the slot's storage is the enum itself, so switching modes never allocates.
pub enum TrackEngine {
    Note(NoteTrackEngine),
    Curve(CurveTrackEngine),
    MidiCv(MidiCvTrackEngine),
}

impl TrackEngine {
    /// Builds the engine variant for the track's current mode. The link
    /// target index is captured here; the coordinator resolves it to an
    /// engine reference at tick time.
    pub fn for_track(track: &Track) -> TrackEngine {
        let link_track = if track.link_track() >= 0 {
            Some(track.link_track() as usize)
        } else {
            None
        };

        match track.track_mode() {
            TrackMode::Note => TrackEngine::Note(NoteTrackEngine::new(link_track)),
            TrackMode::Curve => TrackEngine::Curve(CurveTrackEngine::new(link_track)),
            TrackMode::MidiCv => TrackEngine::MidiCv(MidiCvTrackEngine::new()),
        }
    }

    /// The mode this engine implements.
    pub fn track_mode(&self) -> TrackMode {
        match self {
            TrackEngine::Note(_) => TrackMode::Note,
            TrackEngine::Curve(_) => TrackMode::Curve,
            TrackEngine::MidiCv(_) => TrackMode::MidiCv,
        }
    }

    /// The lower-indexed track this engine follows, if any.
    pub fn link_track(&self) -> Option<usize> {
        match self {
            TrackEngine::Note(engine) => engine.link_track(),
            TrackEngine::Curve(engine) => engine.link_track(),
            TrackEngine::MidiCv(_) => None,
        }
    }

    pub fn set_mute(&mut self, mute: bool) {
        match self {
            TrackEngine::Note(engine) => engine.set_mute(mute),
            TrackEngine::Curve(engine) => engine.set_mute(mute),
            TrackEngine::MidiCv(engine) => engine.set_mute(mute),
        }
    }

    pub fn set_fill(&mut self, fill: bool) {
        match self {
            TrackEngine::Note(engine) => engine.set_fill(fill),
            TrackEngine::Curve(engine) => engine.set_fill(fill),
            TrackEngine::MidiCv(engine) => engine.set_fill(fill),
        }
    }

    pub fn set_pattern(&mut self, pattern: usize) {
        match self {
            TrackEngine::Note(engine) => engine.set_pattern(pattern),
            TrackEngine::Curve(engine) => engine.set_pattern(pattern),
            TrackEngine::MidiCv(engine) => engine.set_pattern(pattern),
        }
    }

    /// The active pattern. MIDI/CV tracks have no pattern and report zero.
    pub fn pattern(&self) -> usize {
        match self {
            TrackEngine::Note(engine) => engine.pattern(),
            TrackEngine::Curve(engine) => engine.pattern(),
            TrackEngine::MidiCv(_) => 0,
        }
    }

    pub fn set_swing(&mut self, swing: u8) {
        match self {
            TrackEngine::Note(engine) => engine.set_swing(swing),
            TrackEngine::Curve(engine) => engine.set_swing(swing),
            TrackEngine::MidiCv(_) => {}
        }
    }

    /// Rewinds playback state to the start of the pattern.
    pub fn reset(&mut self) {
        match self {
            TrackEngine::Note(engine) => engine.reset(),
            TrackEngine::Curve(engine) => engine.reset(),
            TrackEngine::MidiCv(engine) => engine.reset(),
        }
    }

    /// Advances per-tick playback state.
    pub fn tick(&mut self, tick: u32, track: &Track, linked: Option<&TrackEngine>) {
        match self {
            TrackEngine::Note(engine) => engine.tick(tick, track, linked),
            TrackEngine::Curve(engine) => engine.tick(tick, track, linked),
            TrackEngine::MidiCv(engine) => engine.tick(tick),
        }
    }

    /// Advances continuous state (slews, envelopes) by dt seconds.
    pub fn update(&mut self, dt: f32, track: &Track) {
        match self {
            TrackEngine::Note(engine) => engine.update(dt, track),
            TrackEngine::Curve(engine) => engine.update(dt, track),
            TrackEngine::MidiCv(engine) => engine.update(dt, track),
        }
    }

    /// Offers a received MIDI message to the engine. Every engine sees every
    /// message; each decides whether the channel concerns it.
    pub fn receive_midi(&mut self, port: PortId, channel: u8, track: &Track, message: &MidiMessage) {
        match self {
            TrackEngine::Note(_) | TrackEngine::Curve(_) => {}
            TrackEngine::MidiCv(engine) => engine.receive_midi(port, channel, track, message),
        }
    }

    /// The current sequence step, or -1 before the first trigger. Linked
    /// engines follow this.
    pub fn current_step(&self) -> i32 {
        match self {
            TrackEngine::Note(engine) => engine.current_step(),
            TrackEngine::Curve(engine) => engine.current_step(),
            TrackEngine::MidiCv(_) => -1,
        }
    }

    /// Whether this engine currently presents an idle preview output.
    pub fn idle_output(&self) -> bool {
        match self {
            TrackEngine::Note(engine) => engine.idle_output(),
            TrackEngine::Curve(engine) => engine.idle_output(),
            TrackEngine::MidiCv(_) => false,
        }
    }

    pub fn clear_idle_output(&mut self) {
        match self {
            TrackEngine::Note(engine) => engine.clear_idle_output(),
            TrackEngine::Curve(engine) => engine.clear_idle_output(),
            TrackEngine::MidiCv(_) => {}
        }
    }

    /// The gate value of the given sub-channel.
    pub fn gate_output(&self, index: usize) -> bool {
        match self {
            TrackEngine::Note(engine) => engine.gate_output(index),
            TrackEngine::Curve(_) => false,
            TrackEngine::MidiCv(engine) => engine.gate_output(index),
        }
    }

    /// The idle preview gate value of the given sub-channel.
    pub fn idle_gate_output(&self, index: usize) -> bool {
        match self {
            TrackEngine::Note(engine) => engine.idle_gate_output(index),
            TrackEngine::Curve(_) => false,
            TrackEngine::MidiCv(_) => false,
        }
    }

    /// The CV value of the given sub-channel in volts.
    pub fn cv_output(&self, index: usize) -> f32 {
        match self {
            TrackEngine::Note(engine) => engine.cv_output(index),
            TrackEngine::Curve(engine) => engine.cv_output(index),
            TrackEngine::MidiCv(engine) => engine.cv_output(index),
        }
    }

    /// The idle preview CV value of the given sub-channel in volts.
    pub fn idle_cv_output(&self, index: usize) -> f32 {
        match self {
            TrackEngine::Note(engine) => engine.idle_cv_output(index),
            TrackEngine::Curve(engine) => engine.idle_cv_output(index),
            TrackEngine::MidiCv(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Track;

    #[test]
    fn test_factory_matches_mode() {
        for mode in [TrackMode::Note, TrackMode::Curve, TrackMode::MidiCv] {
            let mut track = Track::new();
            track.set_track_mode(mode);
            let engine = TrackEngine::for_track(&track);
            assert_eq!(engine.track_mode(), mode);
        }
    }

    #[test]
    fn test_factory_captures_link() {
        let mut track = Track::new();
        track.set_link_track(2);
        let engine = TrackEngine::for_track(&track);
        assert_eq!(engine.link_track(), Some(2));

        track.set_link_track(-1);
        let engine = TrackEngine::for_track(&track);
        assert_eq!(engine.link_track(), None);
    }

    #[test]
    fn test_note_to_volts() {
        assert_eq!(note_to_volts(60), 0.0);
        assert_eq!(note_to_volts(72), 1.0);
        assert_eq!(note_to_volts(48), -1.0);
        assert!((note_to_volts(61) - 1.0 / 12.0).abs() < 1e-6);
    }
}
