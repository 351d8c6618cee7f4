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
use std::sync::Arc;

use crate::drivers::Dac;
use crate::model::{Model, TRACK_COUNT};

/// Holds the per-channel output voltages and writes them through the DAC with
/// the calibration from the settings applied.
pub struct CvOutput {
    dac: Arc<dyn Dac>,
    model: Arc<Model>,
    channels: [f32; TRACK_COUNT],
}

impl CvOutput {
    pub fn new(dac: Arc<dyn Dac>, model: Arc<Model>) -> CvOutput {
        CvOutput {
            dac,
            model,
            channels: [0.0; TRACK_COUNT],
        }
    }

    /// Sets the target voltage for a channel. Written out on the next update.
    pub fn set_channel(&mut self, index: usize, volts: f32) {
        if let Some(channel) = self.channels.get_mut(index) {
            *channel = volts;
        }
    }

    /// The current target voltage of a channel.
    pub fn channel(&self, index: usize) -> f32 {
        self.channels.get(index).copied().unwrap_or(0.0)
    }

    /// Applies calibration and writes every channel to the DAC.
    pub fn update(&mut self) {
        let settings = self.model.settings();
        let calibration = settings.calibration();
        for (index, volts) in self.channels.iter().enumerate() {
            self.dac.write(index, calibration.dac_value(index, *volts));
        }
    }
}
