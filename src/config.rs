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
use std::{fs, path::Path, sync::Arc};

use serde::Deserialize;
use tracing::debug;

use crate::model::{
    ClockInputMode, ClockOutputMode, ClockSetupMode, Model, TrackMode, TRACK_COUNT,
};

mod error;

pub use self::error::ConfigError;

/// Host configuration for bringing the engine up: device names, initial
/// project values and the clock setup. This is bring-up data, not a project
/// store.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Engine {
    midi_device: String,
    usb_midi_device: String,
    adc_device: String,
    dac_device: String,
    dio_device: String,
    gate_device: String,
    bpm: f32,
    swing: u8,
    sync_measure: u32,
    tracks: Vec<Track>,
    clock: Clock,
}

impl Default for Engine {
    fn default() -> Engine {
        Engine {
            midi_device: "mock-midi".to_string(),
            usb_midi_device: "mock-usb-midi".to_string(),
            adc_device: "mock-adc".to_string(),
            dac_device: "mock-dac".to_string(),
            dio_device: "mock-dio".to_string(),
            gate_device: "mock-gates".to_string(),
            bpm: 120.0,
            swing: 50,
            sync_measure: 1,
            tracks: Vec::new(),
            clock: Clock::default(),
        }
    }
}

/// Per-track configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Track {
    mode: TrackMode,
    link_track: i32,
    midi_channel: u8,
}

impl Default for Track {
    fn default() -> Track {
        Track {
            mode: TrackMode::Note,
            link_track: -1,
            midi_channel: 0,
        }
    }
}

/// Clock setup configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Clock {
    mode: ClockSetupMode,
    input_mode: ClockInputMode,
    output_mode: ClockOutputMode,
    midi_rx: bool,
    midi_tx: bool,
    usb_rx: bool,
    usb_tx: bool,
}

impl Default for Clock {
    fn default() -> Clock {
        Clock {
            mode: ClockSetupMode::Auto,
            input_mode: ClockInputMode::Reset,
            output_mode: ClockOutputMode::Reset,
            midi_rx: true,
            midi_tx: true,
            usb_rx: true,
            usb_tx: false,
        }
    }
}

impl Engine {
    /// Deserializes the engine config from a YAML file and validates it.
    pub fn deserialize(path: &Path) -> Result<Engine, ConfigError> {
        debug!("Loading engine config from {path:?}");
        let config: Engine = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tracks.len() > TRACK_COUNT {
            return Err(ConfigError::Invalid(format!(
                "{} tracks configured, the device has {}",
                self.tracks.len(),
                TRACK_COUNT
            )));
        }

        for (index, track) in self.tracks.iter().enumerate() {
            if track.link_track >= 0 && track.link_track as usize >= index {
                return Err(ConfigError::Invalid(format!(
                    "track {} links to track {}, link targets must be lower-indexed",
                    index, track.link_track
                )));
            }
            if track.midi_channel > 15 {
                return Err(ConfigError::Invalid(format!(
                    "track {} listens on MIDI channel {}, must be 0-15",
                    index, track.midi_channel
                )));
            }
        }

        Ok(())
    }

    /// Builds a model seeded with this configuration.
    pub fn build_model(&self) -> Arc<Model> {
        let model = Arc::new(Model::new());
        {
            let mut project = model.project_mut();
            project.set_bpm(self.bpm);
            project.set_swing(self.swing);
            project.set_sync_measure(self.sync_measure);

            for (index, track) in self.tracks.iter().enumerate() {
                let model_track = project.track_mut(index);
                model_track.set_track_mode(track.mode);
                model_track.set_link_track(track.link_track);
                model_track.set_midi_channel(track.midi_channel);
            }

            let clock_setup = project.clock_setup_mut();
            clock_setup.set_mode(self.clock.mode);
            clock_setup.set_clock_input_mode(self.clock.input_mode);
            clock_setup.set_clock_output_mode(self.clock.output_mode);
            clock_setup.set_midi_rx(self.clock.midi_rx);
            clock_setup.set_midi_tx(self.clock.midi_tx);
            clock_setup.set_usb_rx(self.clock.usb_rx);
            clock_setup.set_usb_tx(self.clock.usb_tx);
        }
        model
    }

    pub fn midi_device(&self) -> &str {
        &self.midi_device
    }

    pub fn usb_midi_device(&self) -> &str {
        &self.usb_midi_device
    }

    pub fn adc_device(&self) -> &str {
        &self.adc_device
    }

    pub fn dac_device(&self) -> &str {
        &self.dac_device
    }

    pub fn dio_device(&self) -> &str {
        &self.dio_device
    }

    pub fn gate_device(&self) -> &str {
        &self.gate_device
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn parse(contents: &str) -> Result<Engine, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().expect("unable to create temp file");
        file.write_all(contents.as_bytes()).expect("unable to write");
        Engine::deserialize(file.path())
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            Engine::deserialize(Path::new("assets/gridseq.yaml")).expect("example config parses");
        assert_eq!(config.midi_device(), "mock-midi");
        assert!(!config.tracks.is_empty());
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = parse("bpm: 140\n").expect("valid config");
        assert_eq!(config.bpm, 140.0);
        assert_eq!(config.swing, 50);
        assert_eq!(config.midi_device(), "mock-midi");

        let model = config.build_model();
        assert_eq!(model.project().bpm(), 140.0);
        assert!(model.project().clock_setup().is_dirty());
    }

    #[test]
    fn test_track_modes_apply_to_model() {
        let config = parse(
            "tracks:\n  - mode: note\n  - mode: curve\n  - mode: midi-cv\n    midi-channel: 3\n",
        )
        .expect("valid config");
        let model = config.build_model();

        let project = model.project();
        assert_eq!(project.track(0).track_mode(), TrackMode::Note);
        assert_eq!(project.track(1).track_mode(), TrackMode::Curve);
        assert_eq!(project.track(2).track_mode(), TrackMode::MidiCv);
        assert_eq!(project.track(2).midi_channel(), 3);
    }

    #[test]
    fn test_forward_link_is_rejected() {
        let result = parse("tracks:\n  - mode: note\n    link-track: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = parse("tracks:\n  - mode: note\n  - mode: note\n    link-track: 0\n");
        assert!(result.is_ok());
    }

    #[test]
    fn test_too_many_tracks_rejected() {
        let mut contents = String::from("tracks:\n");
        for _ in 0..TRACK_COUNT + 1 {
            contents.push_str("  - mode: note\n");
        }
        assert!(matches!(parse(&contents), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_midi_channel_rejected() {
        let result = parse("tracks:\n  - mode: midi-cv\n    midi-channel: 16\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Engine::deserialize(Path::new("does/not/exist.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let result = parse(": not yaml {{{");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
