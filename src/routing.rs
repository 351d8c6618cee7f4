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

use arrayvec::ArrayVec;
use midly::{live::LiveEvent, MidiMessage as MidlyMessage};

use crate::engine::cv_input::CvInput;
use crate::midi::{MidiMessage, PortId};
use crate::model::{Model, Route, RouteSource, RouteTarget, ROUTE_COUNT};

/// The CV input voltage that maps to a normalized 1.0.
const CV_NORMALIZE_RANGE: f32 = 5.0;

/// Applies the project's parameter routes each cycle: CV inputs are sampled
/// from the refreshed snapshot, MIDI controllers from the latest received
/// value. A target is only written when its source value changed, so manual
/// edits survive until the source moves again.
pub struct RoutingEngine {
    model: Arc<Model>,
    cc_values: [Option<f32>; ROUTE_COUNT],
    applied: [Option<f32>; ROUTE_COUNT],
}

impl RoutingEngine {
    pub fn new(model: Arc<Model>) -> RoutingEngine {
        RoutingEngine {
            model,
            cc_values: [None; ROUTE_COUNT],
            applied: [None; ROUTE_COUNT],
        }
    }

    /// Advances all routes against the current CV snapshot.
    pub fn update(&mut self, cv_input: &CvInput) {
        let routes: ArrayVec<Route, ROUTE_COUNT> = {
            let project = self.model.project();
            project.routes().iter().copied().collect()
        };

        for (index, route) in routes.iter().enumerate() {
            let normalized = match route.source {
                RouteSource::CvIn(channel) => {
                    // Bipolar input folded onto 0..1.
                    Some(((cv_input.channel(channel) / CV_NORMALIZE_RANGE) + 1.0) * 0.5)
                }
                RouteSource::MidiCc { .. } => self.cc_values[index],
            };

            let normalized = match normalized {
                Some(normalized) => normalized.clamp(0.0, 1.0),
                None => continue,
            };

            if self.applied[index] == Some(normalized) {
                continue;
            }
            self.applied[index] = Some(normalized);

            let value = route.min + (route.max - route.min) * normalized;
            let mut project = self.model.project_mut();
            match route.target {
                RouteTarget::Bpm => project.set_bpm(value),
                RouteTarget::Swing => project.set_swing(value as u8),
                RouteTarget::TrackMute(track_index) => {
                    project
                        .play_state_mut()
                        .track_state_mut(track_index)
                        .set_mute(normalized > 0.5);
                }
            }
        }
    }

    /// Records controller values for MIDI-sourced routes. Applied on the next
    /// update pass.
    pub fn receive_midi(&mut self, _port: PortId, message: &MidiMessage) {
        let (channel, controller, value) = match message.to_live() {
            Some(LiveEvent::Midi {
                channel,
                message: MidlyMessage::Controller { controller, value },
            }) => (channel.as_int(), controller.as_int(), value.as_int()),
            _ => return,
        };

        let routes: ArrayVec<Route, ROUTE_COUNT> = {
            let project = self.model.project();
            project.routes().iter().copied().collect()
        };

        for (index, route) in routes.iter().enumerate() {
            if let RouteSource::MidiCc {
                channel: route_channel,
                controller: route_controller,
            } = route.source
            {
                if route_channel == channel && route_controller == controller {
                    self.cc_values[index] = Some(value as f32 / 127.0);
                }
            }
        }
    }
}

/// What a MIDI-learn pass latched onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiLearnResult {
    Controller { port: PortId, channel: u8, controller: u8 },
    Note { port: PortId, channel: u8, note: u8 },
    PitchBend { port: PortId, channel: u8 },
}

/// The handler invoked when MIDI-learn latches a control.
pub type MidiLearnHandler = Box<dyn Fn(MidiLearnResult) + Send>;

/// Latches the first eligible incoming control while armed. The UI arms it,
/// the engine feeds it every inbound message.
pub struct MidiLearn {
    armed: bool,
    handler: Option<MidiLearnHandler>,
    last: Option<MidiLearnResult>,
}

impl MidiLearn {
    pub fn new() -> MidiLearn {
        MidiLearn {
            armed: false,
            handler: None,
            last: None,
        }
    }

    /// Arms learning. The next eligible message latches and disarms.
    pub fn arm(&mut self, handler: Option<MidiLearnHandler>) {
        self.armed = true;
        self.handler = handler;
        self.last = None;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
        self.handler = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The most recently latched control.
    pub fn last(&self) -> Option<MidiLearnResult> {
        self.last
    }

    pub fn receive_midi(&mut self, port: PortId, message: &MidiMessage) {
        if !self.armed {
            return;
        }

        let (channel, midly_message) = match message.to_live() {
            Some(LiveEvent::Midi { channel, message }) => (channel.as_int(), message),
            _ => return,
        };

        let result = match midly_message {
            MidlyMessage::Controller { controller, .. } => MidiLearnResult::Controller {
                port,
                channel,
                controller: controller.as_int(),
            },
            MidlyMessage::NoteOn { key, vel } if vel.as_int() > 0 => MidiLearnResult::Note {
                port,
                channel,
                note: key.as_int(),
            },
            MidlyMessage::PitchBend { .. } => MidiLearnResult::PitchBend { port, channel },
            _ => return,
        };

        self.last = Some(result);
        if let Some(handler) = self.handler.as_ref() {
            handler(result);
        }
        self.disarm();
    }
}

impl Default for MidiLearn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers;
    use crate::model::Model;

    fn model_with_route(route: Route) -> Arc<Model> {
        let model = Arc::new(Model::new());
        model.project_mut().add_route(route);
        model
    }

    fn cv_input_at(volts: f32) -> CvInput {
        let adc = Arc::new(drivers::test::Adc::get("mock-adc"));
        let code = ((volts + 5.0) / 10.0 * u16::MAX as f32) as u16;
        adc.set_channel(0, code);
        let mut cv_input = CvInput::new(adc);
        cv_input.update();
        cv_input
    }

    #[test]
    fn test_cv_route_drives_bpm() {
        let model = model_with_route(Route {
            source: RouteSource::CvIn(0),
            target: RouteTarget::Bpm,
            min: 60.0,
            max: 180.0,
        });
        let mut routing = RoutingEngine::new(model.clone());

        // +5V = normalized 1.0 = max of the range.
        routing.update(&cv_input_at(5.0));
        assert!((model.project().bpm() - 180.0).abs() < 1.0);

        routing.update(&cv_input_at(-5.0));
        assert!((model.project().bpm() - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_unchanged_source_does_not_rewrite() {
        let model = model_with_route(Route {
            source: RouteSource::CvIn(0),
            target: RouteTarget::Bpm,
            min: 60.0,
            max: 180.0,
        });
        let mut routing = RoutingEngine::new(model.clone());

        let cv_input = cv_input_at(0.0);
        routing.update(&cv_input);

        // A manual edit survives further updates while the source sits still.
        model.project_mut().set_bpm(99.0);
        routing.update(&cv_input);
        assert_eq!(model.project().bpm(), 99.0);
    }

    #[test]
    fn test_cc_route_drives_mute() {
        let model = model_with_route(Route {
            source: RouteSource::MidiCc {
                channel: 0,
                controller: 80,
            },
            target: RouteTarget::TrackMute(2),
            min: 0.0,
            max: 1.0,
        });
        let mut routing = RoutingEngine::new(model.clone());
        let cv_input = cv_input_at(0.0);

        let cc = MidiMessage::new(&[0xb0, 80, 127]).expect("valid message");
        routing.receive_midi(PortId::Midi, &cc);
        routing.update(&cv_input);
        assert!(model.project().play_state().track_state(2).mute());

        let cc = MidiMessage::new(&[0xb0, 80, 0]).expect("valid message");
        routing.receive_midi(PortId::Midi, &cc);
        routing.update(&cv_input);
        assert!(!model.project().play_state().track_state(2).mute());
    }

    #[test]
    fn test_unrelated_cc_is_ignored() {
        let model = model_with_route(Route {
            source: RouteSource::MidiCc {
                channel: 0,
                controller: 80,
            },
            target: RouteTarget::Bpm,
            min: 60.0,
            max: 180.0,
        });
        let mut routing = RoutingEngine::new(model.clone());

        let cc = MidiMessage::new(&[0xb1, 80, 127]).expect("valid message");
        routing.receive_midi(PortId::Midi, &cc);
        routing.update(&cv_input_at(0.0));
        assert_eq!(model.project().bpm(), 120.0);
    }

    #[test]
    fn test_midi_learn_latches_once() {
        let mut learn = MidiLearn::new();
        learn.arm(None);
        assert!(learn.is_armed());

        let cc = MidiMessage::new(&[0xb3, 21, 64]).expect("valid message");
        learn.receive_midi(PortId::UsbMidi, &cc);

        assert!(!learn.is_armed());
        assert_eq!(
            learn.last(),
            Some(MidiLearnResult::Controller {
                port: PortId::UsbMidi,
                channel: 3,
                controller: 21,
            })
        );

        // Disarmed: further messages don't overwrite.
        let note = MidiMessage::new(&[0x90, 60, 100]).expect("valid message");
        learn.receive_midi(PortId::Midi, &note);
        assert!(matches!(
            learn.last(),
            Some(MidiLearnResult::Controller { .. })
        ));
    }

    #[test]
    fn test_midi_learn_ignores_realtime() {
        let mut learn = MidiLearn::new();
        learn.arm(None);

        learn.receive_midi(PortId::Midi, &MidiMessage::from_status(0xf8));
        assert!(learn.is_armed());
        assert_eq!(learn.last(), None);
    }
}
