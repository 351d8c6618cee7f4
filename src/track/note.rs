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
use super::{note_to_volts, TrackEngine};
use crate::model::{Track, STEP_COUNT};

/// Steps a gate/pitch sequence. Gates open at step onset (shifted by swing on
/// odd steps) and close after half a step.
pub struct NoteTrackEngine {
    link_track: Option<usize>,
    mute: bool,
    fill: bool,
    pattern: usize,
    swing: u8,
    current_step: i32,
    gate: bool,
    gate_off_tick: Option<u32>,
    cv: f32,
    idle: bool,
    idle_gate: bool,
    idle_cv: f32,
}

impl NoteTrackEngine {
    pub fn new(link_track: Option<usize>) -> NoteTrackEngine {
        NoteTrackEngine {
            link_track,
            mute: false,
            fill: false,
            pattern: 0,
            swing: 50,
            current_step: -1,
            gate: false,
            gate_off_tick: None,
            cv: 0.0,
            idle: false,
            idle_gate: false,
            idle_cv: 0.0,
        }
    }

    pub fn link_track(&self) -> Option<usize> {
        self.link_track
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
        if mute {
            self.gate = false;
            self.gate_off_tick = None;
        }
    }

    pub fn set_fill(&mut self, fill: bool) {
        self.fill = fill;
    }

    pub fn set_pattern(&mut self, pattern: usize) {
        self.pattern = pattern;
    }

    pub fn pattern(&self) -> usize {
        self.pattern
    }

    pub fn set_swing(&mut self, swing: u8) {
        self.swing = swing.clamp(50, 75);
    }

    pub fn reset(&mut self) {
        self.current_step = -1;
        self.gate = false;
        self.gate_off_tick = None;
    }

    /// Swing shift in ticks for odd steps: zero at 50%, half a step at 75%.
    fn swing_ticks(&self, divisor: u32) -> u32 {
        divisor * (self.swing as u32 - 50) / 50
    }

    pub fn tick(&mut self, tick: u32, track: &Track, linked: Option<&TrackEngine>) {
        let divisor = track.divisor();
        let step = ((tick / divisor) as usize) % STEP_COUNT;
        let phase = tick % divisor;

        let onset = if step % 2 == 1 {
            self.swing_ticks(divisor)
        } else {
            0
        };

        if phase == onset {
            // A linked track plays the step its link target is on.
            let step = match linked {
                Some(linked) if linked.current_step() >= 0 => {
                    linked.current_step() as usize % STEP_COUNT
                }
                _ => step,
            };
            self.trigger(tick, step, track);
        }

        if self.gate_off_tick == Some(tick) {
            self.gate = false;
            self.gate_off_tick = None;
        }
    }

    fn trigger(&mut self, tick: u32, step: usize, track: &Track) {
        self.current_step = step as i32;

        let note_step = track.note_pattern(self.pattern).steps[step];
        self.cv = note_to_volts(note_step.note);

        // The last played step stays visible as the idle preview.
        self.idle = true;
        self.idle_gate = note_step.gate;
        self.idle_cv = self.cv;

        if !self.mute && (note_step.gate || self.fill) {
            self.gate = true;
            self.gate_off_tick = Some(tick + (track.divisor() / 2).max(1));
        }
    }

    pub fn update(&mut self, _dt: f32, _track: &Track) {}

    pub fn current_step(&self) -> i32 {
        self.current_step
    }

    pub fn idle_output(&self) -> bool {
        self.idle
    }

    pub fn clear_idle_output(&mut self) {
        self.idle = false;
    }

    pub fn gate_output(&self, index: usize) -> bool {
        index == 0 && self.gate
    }

    pub fn idle_gate_output(&self, index: usize) -> bool {
        index == 0 && self.idle_gate
    }

    pub fn cv_output(&self, _index: usize) -> f32 {
        self.cv
    }

    pub fn idle_cv_output(&self, _index: usize) -> f32 {
        self.idle_cv
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::PPQN;

    fn track_with_gates(gates: &[usize]) -> Track {
        let mut track = Track::new();
        for &step in gates {
            track.note_pattern_mut(0).steps[step].gate = true;
        }
        track
    }

    #[test]
    fn test_gate_opens_on_step_onset() {
        let track = track_with_gates(&[0]);
        let mut engine = NoteTrackEngine::new(None);

        engine.tick(0, &track, None);
        assert!(engine.gate_output(0));
        assert_eq!(engine.current_step(), 0);

        // Gate closes after half a step.
        let half = track.divisor() / 2;
        for tick in 1..=half {
            engine.tick(tick, &track, None);
        }
        assert!(!engine.gate_output(0));
    }

    #[test]
    fn test_ungated_step_stays_silent() {
        let track = track_with_gates(&[1]);
        let mut engine = NoteTrackEngine::new(None);

        engine.tick(0, &track, None);
        assert!(!engine.gate_output(0));

        engine.tick(track.divisor(), &track, None);
        assert!(engine.gate_output(0));
    }

    #[test]
    fn test_mute_suppresses_gates() {
        let track = track_with_gates(&[0]);
        let mut engine = NoteTrackEngine::new(None);
        engine.set_mute(true);

        engine.tick(0, &track, None);
        assert!(!engine.gate_output(0));
        // The step still advances and the CV still tracks the pattern.
        assert_eq!(engine.current_step(), 0);
    }

    #[test]
    fn test_fill_plays_every_step() {
        let track = track_with_gates(&[]);
        let mut engine = NoteTrackEngine::new(None);
        engine.set_fill(true);

        engine.tick(0, &track, None);
        assert!(engine.gate_output(0));
    }

    #[test]
    fn test_cv_follows_note() {
        let mut track = Track::new();
        track.note_pattern_mut(0).steps[0].gate = true;
        track.note_pattern_mut(0).steps[0].note = 72;

        let mut engine = NoteTrackEngine::new(None);
        engine.tick(0, &track, None);
        assert_eq!(engine.cv_output(0), 1.0);
    }

    #[test]
    fn test_swing_shifts_odd_steps() {
        let track = track_with_gates(&[0, 1]);
        let mut engine = NoteTrackEngine::new(None);
        engine.set_swing(75);

        let divisor = track.divisor();
        engine.tick(0, &track, None);
        assert_eq!(engine.current_step(), 0);

        // Step 1 does not trigger at its straight onset.
        engine.tick(divisor, &track, None);
        assert_eq!(engine.current_step(), 0);

        // It triggers half a step late.
        engine.tick(divisor + divisor / 2, &track, None);
        assert_eq!(engine.current_step(), 1);
    }

    #[test]
    fn test_pattern_wraps_after_last_step() {
        let track = track_with_gates(&[0]);
        let mut engine = NoteTrackEngine::new(None);

        let wrap_tick = track.divisor() * STEP_COUNT as u32;
        engine.tick(wrap_tick, &track, None);
        assert_eq!(engine.current_step(), 0);
        assert!(engine.gate_output(0));
    }

    #[test]
    fn test_linked_engine_follows_target_step() {
        let track = track_with_gates(&[0]);
        let mut leader = NoteTrackEngine::new(None);
        let divisor = track.divisor();
        leader.tick(divisor * 5, &track, None);
        assert_eq!(leader.current_step(), 5);
        let leader = TrackEngine::Note(leader);

        let mut follower = NoteTrackEngine::new(Some(0));
        // The follower is at step 0 by its own clock but follows the leader.
        follower.tick(0, &track, Some(&leader));
        assert_eq!(follower.current_step(), 5);
    }

    #[test]
    fn test_idle_preview_persists_and_clears() {
        let track = track_with_gates(&[0]);
        let mut engine = NoteTrackEngine::new(None);
        assert!(!engine.idle_output());

        engine.tick(0, &track, None);
        assert!(engine.idle_output());
        assert!(engine.idle_gate_output(0));
        assert_eq!(engine.idle_cv_output(0), 0.0);

        engine.clear_idle_output();
        assert!(!engine.idle_output());
    }

    #[test]
    fn test_gate_length_with_sixteenth_divisor() {
        let track = track_with_gates(&[0]);
        let mut engine = NoteTrackEngine::new(None);

        engine.tick(0, &track, None);
        let mut high_ticks = 1;
        for tick in 1..PPQN {
            engine.tick(tick, &track, None);
            if engine.gate_output(0) {
                high_ticks += 1;
            }
        }
        assert_eq!(high_ticks, (track.divisor() / 2) as usize);
    }
}
