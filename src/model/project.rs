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
use arrayvec::ArrayVec;

use crate::model::{ClockSetup, PlayState, Song, Track, TRACK_COUNT};

/// Maximum number of parameter routes in a project.
pub const ROUTE_COUNT: usize = 8;

/// Where a routed value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteSource {
    /// A CV input channel.
    CvIn(usize),
    /// A MIDI continuous controller on a channel.
    MidiCc { channel: u8, controller: u8 },
}

/// The model parameter a route drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTarget {
    Bpm,
    Swing,
    TrackMute(usize),
}

/// A single parameter route: a normalized source value mapped onto a target
/// range.
#[derive(Clone, Copy, Debug)]
pub struct Route {
    pub source: RouteSource,
    pub target: RouteTarget,
    pub min: f32,
    pub max: f32,
}

/// The project: everything the musician edits.
pub struct Project {
    bpm: f32,
    swing: u8,
    sync_measure: u32,
    selected_track_index: usize,
    tracks: [Track; TRACK_COUNT],
    gate_output_tracks: [usize; TRACK_COUNT],
    cv_output_tracks: [usize; TRACK_COUNT],
    play_state: PlayState,
    song: Song,
    clock_setup: ClockSetup,
    routes: ArrayVec<Route, ROUTE_COUNT>,
}

impl Project {
    pub fn new() -> Project {
        Project {
            bpm: 120.0,
            swing: 50,
            sync_measure: 1,
            selected_track_index: 0,
            tracks: std::array::from_fn(|_| Track::new()),
            gate_output_tracks: std::array::from_fn(|i| i),
            cv_output_tracks: std::array::from_fn(|i| i),
            play_state: PlayState::new(),
            song: Song::new(),
            clock_setup: ClockSetup::new(),
            routes: ArrayVec::new(),
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(20.0, 500.0);
    }

    /// Swing in percent, 50 (straight) to 75.
    pub fn swing(&self) -> u8 {
        self.swing
    }

    pub fn set_swing(&mut self, swing: u8) {
        self.swing = swing.clamp(50, 75);
    }

    /// The sync measure length in bars.
    pub fn sync_measure(&self) -> u32 {
        self.sync_measure
    }

    pub fn set_sync_measure(&mut self, sync_measure: u32) {
        self.sync_measure = sync_measure.max(1);
    }

    /// The track currently selected in the UI. Only this track may present
    /// idle preview output.
    pub fn selected_track_index(&self) -> usize {
        self.selected_track_index
    }

    pub fn set_selected_track_index(&mut self, index: usize) {
        if index < TRACK_COUNT {
            self.selected_track_index = index;
        }
    }

    pub fn track(&self, index: usize) -> &Track {
        &self.tracks[index]
    }

    pub fn track_mut(&mut self, index: usize) -> &mut Track {
        &mut self.tracks[index]
    }

    /// Which track feeds each physical gate output.
    pub fn gate_output_tracks(&self) -> &[usize; TRACK_COUNT] {
        &self.gate_output_tracks
    }

    pub fn set_gate_output_track(&mut self, output: usize, track: usize) {
        if output < TRACK_COUNT && track < TRACK_COUNT {
            self.gate_output_tracks[output] = track;
        }
    }

    /// Which track feeds each physical CV output.
    pub fn cv_output_tracks(&self) -> &[usize; TRACK_COUNT] {
        &self.cv_output_tracks
    }

    pub fn set_cv_output_track(&mut self, output: usize, track: usize) {
        if output < TRACK_COUNT && track < TRACK_COUNT {
            self.cv_output_tracks[output] = track;
        }
    }

    pub fn play_state(&self) -> &PlayState {
        &self.play_state
    }

    pub fn play_state_mut(&mut self) -> &mut PlayState {
        &mut self.play_state
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn song_mut(&mut self) -> &mut Song {
        &mut self.song
    }

    /// Simultaneous mutable play state and shared song access, used by the
    /// engine's arbitration pass.
    pub fn play_state_and_song(&mut self) -> (&mut PlayState, &Song) {
        (&mut self.play_state, &self.song)
    }

    pub fn clock_setup(&self) -> &ClockSetup {
        &self.clock_setup
    }

    pub fn clock_setup_mut(&mut self) -> &mut ClockSetup {
        &mut self.clock_setup
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Adds a route. Returns false when the route table is full.
    pub fn add_route(&mut self, route: Route) -> bool {
        self.routes.try_push(route).is_ok()
    }

    pub fn clear_routes(&mut self) {
        self.routes.clear();
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let project = Project::new();
        assert_eq!(project.bpm(), 120.0);
        assert_eq!(project.swing(), 50);
        assert_eq!(project.sync_measure(), 1);
        assert_eq!(project.gate_output_tracks()[3], 3);
        assert_eq!(project.cv_output_tracks()[5], 5);
    }

    #[test]
    fn test_clamps() {
        let mut project = Project::new();
        project.set_bpm(1.0);
        assert_eq!(project.bpm(), 20.0);
        project.set_bpm(9000.0);
        assert_eq!(project.bpm(), 500.0);

        project.set_swing(10);
        assert_eq!(project.swing(), 50);
        project.set_swing(90);
        assert_eq!(project.swing(), 75);

        project.set_sync_measure(0);
        assert_eq!(project.sync_measure(), 1);
    }

    #[test]
    fn test_route_capacity() {
        let mut project = Project::new();
        let route = Route {
            source: RouteSource::CvIn(0),
            target: RouteTarget::Bpm,
            min: 60.0,
            max: 180.0,
        };
        for _ in 0..ROUTE_COUNT {
            assert!(project.add_route(route));
        }
        assert!(!project.add_route(route));
        assert_eq!(project.routes().len(), ROUTE_COUNT);
    }

    #[test]
    fn test_output_mapping_bounds() {
        let mut project = Project::new();
        project.set_gate_output_track(0, TRACK_COUNT);
        assert_eq!(project.gate_output_tracks()[0], 0);
        project.set_gate_output_track(0, 4);
        assert_eq!(project.gate_output_tracks()[0], 4);
    }
}
