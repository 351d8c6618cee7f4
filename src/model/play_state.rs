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
use crate::model::TRACK_COUNT;

/// When a play-state request takes effect: on the next engine cycle, on the
/// next measure boundary, or when the UI releases its latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecuteType {
    Immediate,
    Synced,
    Latched,
}

/// Per-track play state plus its pending requests.
#[derive(Clone, Copy, Debug)]
pub struct TrackState {
    mute: bool,
    fill: bool,
    pattern: usize,
    requested_mute: bool,
    requested_pattern: usize,
    requests: u8,
}

impl TrackState {
    pub const IMMEDIATE_MUTE_REQUEST: u8 = 1 << 0;
    pub const SYNCED_MUTE_REQUEST: u8 = 1 << 1;
    pub const LATCHED_MUTE_REQUEST: u8 = 1 << 2;
    pub const IMMEDIATE_PATTERN_REQUEST: u8 = 1 << 3;
    pub const SYNCED_PATTERN_REQUEST: u8 = 1 << 4;
    pub const LATCHED_PATTERN_REQUEST: u8 = 1 << 5;

    pub const MUTE_REQUESTS: u8 = Self::IMMEDIATE_MUTE_REQUEST
        | Self::SYNCED_MUTE_REQUEST
        | Self::LATCHED_MUTE_REQUEST;
    pub const PATTERN_REQUESTS: u8 = Self::IMMEDIATE_PATTERN_REQUEST
        | Self::SYNCED_PATTERN_REQUEST
        | Self::LATCHED_PATTERN_REQUEST;

    fn new() -> TrackState {
        TrackState {
            mute: false,
            fill: false,
            pattern: 0,
            requested_mute: false,
            requested_pattern: 0,
            requests: 0,
        }
    }

    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn fill(&self) -> bool {
        self.fill
    }

    pub fn set_fill(&mut self, fill: bool) {
        self.fill = fill;
    }

    pub fn pattern(&self) -> usize {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: usize) {
        self.pattern = pattern;
    }

    pub fn requested_mute(&self) -> bool {
        self.requested_mute
    }

    pub fn requested_pattern(&self) -> usize {
        self.requested_pattern
    }

    pub fn has_requests(&self, mask: u8) -> bool {
        self.requests & mask != 0
    }

    pub fn set_requests(&mut self, mask: u8) {
        self.requests |= mask;
    }

    pub fn clear_requests(&mut self, mask: u8) {
        self.requests &= !mask;
    }
}

/// Song play state plus its pending requests.
#[derive(Clone, Copy, Debug)]
pub struct SongState {
    playing: bool,
    current_slot: usize,
    current_repeat: u32,
    requested_slot: i32,
    requests: u8,
}

impl SongState {
    pub const IMMEDIATE_PLAY_REQUEST: u8 = 1 << 0;
    pub const SYNCED_PLAY_REQUEST: u8 = 1 << 1;
    pub const LATCHED_PLAY_REQUEST: u8 = 1 << 2;
    pub const IMMEDIATE_STOP_REQUEST: u8 = 1 << 3;
    pub const SYNCED_STOP_REQUEST: u8 = 1 << 4;
    pub const LATCHED_STOP_REQUEST: u8 = 1 << 5;

    pub const PLAY_REQUESTS: u8 = Self::IMMEDIATE_PLAY_REQUEST
        | Self::SYNCED_PLAY_REQUEST
        | Self::LATCHED_PLAY_REQUEST;
    pub const STOP_REQUESTS: u8 = Self::IMMEDIATE_STOP_REQUEST
        | Self::SYNCED_STOP_REQUEST
        | Self::LATCHED_STOP_REQUEST;

    fn new() -> SongState {
        SongState {
            playing: false,
            current_slot: 0,
            current_repeat: 0,
            requested_slot: -1,
            requests: 0,
        }
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn set_current_slot(&mut self, slot: usize) {
        self.current_slot = slot;
    }

    pub fn current_repeat(&self) -> u32 {
        self.current_repeat
    }

    pub fn set_current_repeat(&mut self, repeat: u32) {
        self.current_repeat = repeat;
    }

    pub fn requested_slot(&self) -> i32 {
        self.requested_slot
    }

    pub fn has_requests(&self, mask: u8) -> bool {
        self.requests & mask != 0
    }

    pub fn set_requests(&mut self, mask: u8) {
        self.requests |= mask;
    }

    pub fn clear_requests(&mut self, mask: u8) {
        self.requests &= !mask;
    }
}

/// The play state of the whole device: per-track states, the song state, and
/// aggregate request flags the engine polls each cycle.
#[derive(Clone, Copy, Debug)]
pub struct PlayState {
    track_states: [TrackState; TRACK_COUNT],
    song_state: SongState,
    immediate_requests: bool,
    synced_requests: bool,
    latched_requests: bool,
    execute_latched_requests: bool,
}

impl PlayState {
    pub fn new() -> PlayState {
        PlayState {
            track_states: [TrackState::new(); TRACK_COUNT],
            song_state: SongState::new(),
            immediate_requests: false,
            synced_requests: false,
            latched_requests: false,
            execute_latched_requests: false,
        }
    }

    pub fn track_state(&self, index: usize) -> &TrackState {
        &self.track_states[index]
    }

    pub fn track_state_mut(&mut self, index: usize) -> &mut TrackState {
        &mut self.track_states[index]
    }

    pub fn song_state(&self) -> &SongState {
        &self.song_state
    }

    pub fn song_state_mut(&mut self) -> &mut SongState {
        &mut self.song_state
    }

    /// Requests a mute change on a track.
    pub fn mute_track(&mut self, index: usize, mute: bool, execute: ExecuteType) {
        let state = &mut self.track_states[index];
        state.requested_mute = mute;
        state.set_requests(match execute {
            ExecuteType::Immediate => TrackState::IMMEDIATE_MUTE_REQUEST,
            ExecuteType::Synced => TrackState::SYNCED_MUTE_REQUEST,
            ExecuteType::Latched => TrackState::LATCHED_MUTE_REQUEST,
        });
        self.note_request(execute);
    }

    /// Requests a pattern change on a track.
    pub fn select_track_pattern(&mut self, index: usize, pattern: usize, execute: ExecuteType) {
        let state = &mut self.track_states[index];
        state.requested_pattern = pattern;
        state.set_requests(match execute {
            ExecuteType::Immediate => TrackState::IMMEDIATE_PATTERN_REQUEST,
            ExecuteType::Synced => TrackState::SYNCED_PATTERN_REQUEST,
            ExecuteType::Latched => TrackState::LATCHED_PATTERN_REQUEST,
        });
        self.note_request(execute);
    }

    /// Sets a track's fill flag. Fill is a live performance control and takes
    /// effect directly.
    pub fn fill_track(&mut self, index: usize, fill: bool) {
        self.track_states[index].set_fill(fill);
    }

    /// Requests song playback from the given slot.
    pub fn play_song(&mut self, slot: i32, execute: ExecuteType) {
        self.song_state.requested_slot = slot;
        self.song_state.set_requests(match execute {
            ExecuteType::Immediate => SongState::IMMEDIATE_PLAY_REQUEST,
            ExecuteType::Synced => SongState::SYNCED_PLAY_REQUEST,
            ExecuteType::Latched => SongState::LATCHED_PLAY_REQUEST,
        });
        self.note_request(execute);
    }

    /// Requests the song to stop.
    pub fn stop_song(&mut self, execute: ExecuteType) {
        self.song_state.set_requests(match execute {
            ExecuteType::Immediate => SongState::IMMEDIATE_STOP_REQUEST,
            ExecuteType::Synced => SongState::SYNCED_STOP_REQUEST,
            ExecuteType::Latched => SongState::LATCHED_STOP_REQUEST,
        });
        self.note_request(execute);
    }

    /// Marks latched requests ready to fire; the engine consumes them on its
    /// next arbitration pass.
    pub fn commit_latched_requests(&mut self) {
        self.execute_latched_requests = true;
    }

    fn note_request(&mut self, execute: ExecuteType) {
        match execute {
            ExecuteType::Immediate => self.immediate_requests = true,
            ExecuteType::Synced => self.synced_requests = true,
            ExecuteType::Latched => self.latched_requests = true,
        }
    }

    pub fn has_immediate_requests(&self) -> bool {
        self.immediate_requests
    }

    pub fn has_synced_requests(&self) -> bool {
        self.synced_requests
    }

    pub fn has_latched_requests(&self) -> bool {
        self.latched_requests
    }

    pub fn execute_latched_requests(&self) -> bool {
        self.execute_latched_requests
    }

    pub fn clear_immediate_requests(&mut self) {
        self.immediate_requests = false;
    }

    pub fn clear_synced_requests(&mut self) {
        self.synced_requests = false;
    }

    pub fn clear_latched_requests(&mut self) {
        self.latched_requests = false;
        self.execute_latched_requests = false;
    }
}

impl Default for PlayState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mute_request_sets_flags() {
        let mut play_state = PlayState::new();
        play_state.mute_track(2, true, ExecuteType::Synced);

        assert!(play_state.has_synced_requests());
        assert!(!play_state.has_immediate_requests());

        let state = play_state.track_state(2);
        assert!(state.has_requests(TrackState::SYNCED_MUTE_REQUEST));
        assert!(state.requested_mute());
        assert!(!state.mute(), "request must not take effect directly");
    }

    #[test]
    fn test_pattern_request_sets_flags() {
        let mut play_state = PlayState::new();
        play_state.select_track_pattern(0, 7, ExecuteType::Immediate);

        assert!(play_state.has_immediate_requests());
        let state = play_state.track_state(0);
        assert!(state.has_requests(TrackState::IMMEDIATE_PATTERN_REQUEST));
        assert_eq!(state.requested_pattern(), 7);
        assert_eq!(state.pattern(), 0);
    }

    #[test]
    fn test_clear_requests_is_masked() {
        let mut play_state = PlayState::new();
        play_state.mute_track(0, true, ExecuteType::Immediate);
        play_state.select_track_pattern(0, 1, ExecuteType::Synced);

        let state = play_state.track_state_mut(0);
        state.clear_requests(TrackState::MUTE_REQUESTS);
        assert!(!state.has_requests(TrackState::MUTE_REQUESTS));
        assert!(state.has_requests(TrackState::SYNCED_PATTERN_REQUEST));
    }

    #[test]
    fn test_latched_requests_wait_for_commit() {
        let mut play_state = PlayState::new();
        play_state.mute_track(1, true, ExecuteType::Latched);

        assert!(play_state.has_latched_requests());
        assert!(!play_state.execute_latched_requests());

        play_state.commit_latched_requests();
        assert!(play_state.execute_latched_requests());

        play_state.clear_latched_requests();
        assert!(!play_state.has_latched_requests());
        assert!(!play_state.execute_latched_requests());
    }

    #[test]
    fn test_song_requests() {
        let mut play_state = PlayState::new();
        play_state.play_song(3, ExecuteType::Immediate);
        assert!(play_state
            .song_state()
            .has_requests(SongState::IMMEDIATE_PLAY_REQUEST));
        assert_eq!(play_state.song_state().requested_slot(), 3);

        play_state.stop_song(ExecuteType::Synced);
        assert!(play_state
            .song_state()
            .has_requests(SongState::SYNCED_STOP_REQUEST));
    }
}
