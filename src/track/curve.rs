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
use std::f32::consts::PI;

use super::TrackEngine;
use crate::model::{CurveShape, Track, STEP_COUNT};

/// Curve values span this many volts: a pattern value of 1.0 is 5 V.
const CURVE_RANGE_VOLTS: f32 = 5.0;

/// Slew rate toward the target value, in fraction per second.
const SLEW_RATE: f32 = 200.0;

/// Renders a modulation curve across the pattern steps, slewing the output
/// toward the interpolated target.
pub struct CurveTrackEngine {
    link_track: Option<usize>,
    mute: bool,
    pattern: usize,
    current_step: i32,
    target: f32,
    cv: f32,
    idle: bool,
    idle_cv: f32,
}

impl CurveTrackEngine {
    pub fn new(link_track: Option<usize>) -> CurveTrackEngine {
        CurveTrackEngine {
            link_track,
            mute: false,
            pattern: 0,
            current_step: -1,
            target: 0.0,
            cv: 0.0,
            idle: false,
            idle_cv: 0.0,
        }
    }

    pub fn link_track(&self) -> Option<usize> {
        self.link_track
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn set_fill(&mut self, _fill: bool) {}

    pub fn set_pattern(&mut self, pattern: usize) {
        self.pattern = pattern;
    }

    pub fn pattern(&self) -> usize {
        self.pattern
    }

    /// Curves are continuous; swing does not apply.
    pub fn set_swing(&mut self, _swing: u8) {}

    pub fn reset(&mut self) {
        self.current_step = -1;
        self.target = 0.0;
    }

    pub fn tick(&mut self, tick: u32, track: &Track, linked: Option<&TrackEngine>) {
        let divisor = track.divisor();
        let step = match linked {
            Some(linked) if linked.current_step() >= 0 => {
                linked.current_step() as usize % STEP_COUNT
            }
            None | Some(_) => ((tick / divisor) as usize) % STEP_COUNT,
        };
        let fraction = (tick % divisor) as f32 / divisor as f32;

        self.current_step = step as i32;

        let pattern = track.curve_pattern(self.pattern);
        let from = pattern.values[step];
        let to = pattern.values[(step + 1) % STEP_COUNT];

        let value = match pattern.shape {
            CurveShape::Step => from,
            CurveShape::Ramp => from + (to - from) * fraction,
            CurveShape::Smooth => {
                let eased = (1.0 - (fraction * PI).cos()) * 0.5;
                from + (to - from) * eased
            }
        };

        self.target = if self.mute {
            0.0
        } else {
            value * CURVE_RANGE_VOLTS
        };

        if fraction == 0.0 {
            self.idle = true;
            self.idle_cv = self.target;
        }
    }

    pub fn update(&mut self, dt: f32, _track: &Track) {
        let alpha = (dt * SLEW_RATE).min(1.0);
        self.cv += (self.target - self.cv) * alpha;
    }

    pub fn current_step(&self) -> i32 {
        self.current_step
    }

    pub fn idle_output(&self) -> bool {
        self.idle
    }

    pub fn clear_idle_output(&mut self) {
        self.idle = false;
    }

    pub fn cv_output(&self, _index: usize) -> f32 {
        self.cv
    }

    pub fn idle_cv_output(&self, _index: usize) -> f32 {
        self.idle_cv
    }
}
