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

use crate::drivers::Adc;

/// Number of CV input channels.
pub const CV_INPUT_COUNT: usize = 4;

/// The CV input range in volts, mapped across the full ADC scale.
const CV_INPUT_RANGE: f32 = 5.0;

/// Samples the ADC each update and converts raw codes to volts.
pub struct CvInput {
    adc: Arc<dyn Adc>,
    channels: [f32; CV_INPUT_COUNT],
}

impl CvInput {
    pub fn new(adc: Arc<dyn Adc>) -> CvInput {
        CvInput {
            adc,
            channels: [0.0; CV_INPUT_COUNT],
        }
    }

    /// Samples all channels.
    pub fn update(&mut self) {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let code = self.adc.read(index);
            *channel = (code as f32 / u16::MAX as f32) * 2.0 * CV_INPUT_RANGE - CV_INPUT_RANGE;
        }
    }

    /// The most recently sampled voltage of a channel.
    pub fn channel(&self, index: usize) -> f32 {
        self.channels.get(index).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers;

    #[test]
    fn test_converts_codes_to_volts() {
        let adc = Arc::new(drivers::test::Adc::get("mock-adc"));
        let mut input = CvInput::new(adc.clone());

        adc.set_channel(0, 0);
        adc.set_channel(1, u16::MAX);
        adc.set_channel(2, u16::MAX / 2);
        input.update();

        assert!((input.channel(0) + 5.0).abs() < 0.01);
        assert!((input.channel(1) - 5.0).abs() < 0.01);
        assert!(input.channel(2).abs() < 0.01);
        // Out of range reads as 0.
        assert_eq!(input.channel(CV_INPUT_COUNT), 0.0);
    }
}
