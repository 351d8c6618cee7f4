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
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

mod clock_setup;
mod play_state;
mod project;
mod settings;
mod song;
mod track;

pub use self::clock_setup::{ClockInputMode, ClockOutputMode, ClockSetup, ClockSetupMode};
pub use self::play_state::{ExecuteType, PlayState, SongState, TrackState};
pub use self::project::{Project, Route, RouteSource, RouteTarget, ROUTE_COUNT};
pub use self::settings::{Calibration, Settings};
pub use self::song::{Song, SongSlot, SONG_SLOT_COUNT};
pub use self::track::{CurvePattern, CurveShape, NotePattern, NoteStep, Track, TrackMode, PATTERN_COUNT, STEP_COUNT};

/// Number of tracks, and with it gate and CV output channels.
pub const TRACK_COUNT: usize = 8;

/// The model of the device: project data and device settings. The engine owns
/// the model logically while unlocked; other actors must bracket structural
/// mutation with the engine lock protocol. Play-state request flags are the
/// exception and may be set at any time.
pub struct Model {
    project: RwLock<Project>,
    settings: RwLock<Settings>,
}

impl Model {
    pub fn new() -> Model {
        Model {
            project: RwLock::new(Project::new()),
            settings: RwLock::new(Settings::new()),
        }
    }

    pub fn project(&self) -> RwLockReadGuard<'_, Project> {
        self.project.read()
    }

    pub fn project_mut(&self) -> RwLockWriteGuard<'_, Project> {
        self.project.write()
    }

    pub fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read()
    }

    pub fn settings_mut(&self) -> RwLockWriteGuard<'_, Settings> {
        self.settings.write()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
