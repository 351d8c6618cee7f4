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
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use parking_lot::Mutex;
use tracing::{debug, info, span, Level};

use crate::clock::{
    timer::ClockTimer, Clock, ClockEvent, ClockListener, ClockMode, ClockSource, OutputState,
    MIDI_CLOCK_DIVISOR, PPQN,
};
use crate::drivers::{Adc, Dac, Dio, GateOutput};
use crate::midi::{MidiMessage, MidiPort, PortId};
use crate::model::{
    ClockInputMode, ClockOutputMode, ClockSetupMode, Model, SongState, TrackState, TRACK_COUNT,
};
use crate::routing::{MidiLearn, RoutingEngine};
use crate::track::TrackEngine;

pub mod cv_input;
pub mod cv_output;
mod tempo;

use self::cv_input::CvInput;
use self::cv_output::CvOutput;
use self::tempo::{NudgeTempo, TapTempo};

/// Invoked to surface an informational message to the user, with a display
/// duration in milliseconds.
pub type MessageHandler = Box<dyn Fn(&str, u32) + Send>;

/// Invoked for every MIDI message the engine receives.
pub type MidiReceiveHandler = Box<dyn Fn(PortId, &MidiMessage) + Send>;

/// Invoked when a USB MIDI device connects, with vendor and product ids.
pub type UsbConnectHandler = Box<dyn Fn(u16, u16) + Send>;

/// Invoked when a USB MIDI device disconnects.
pub type UsbDisconnectHandler = Box<dyn Fn() + Send>;

/// State shared between the engine and non-realtime actors: the lock
/// protocol flags and the output overrides. All atomics; setting a request
/// never blocks the caller or the realtime thread.
struct EngineShared {
    locked: AtomicBool,
    request_lock: AtomicBool,
    request_unlock: AtomicBool,
    gate_output_override: AtomicBool,
    gate_output_override_value: AtomicU16,
    cv_output_override: AtomicBool,
    cv_output_override_values: [AtomicU32; TRACK_COUNT],
}

impl EngineShared {
    fn new() -> EngineShared {
        EngineShared {
            locked: AtomicBool::new(false),
            request_lock: AtomicBool::new(false),
            request_unlock: AtomicBool::new(false),
            gate_output_override: AtomicBool::new(false),
            gate_output_override_value: AtomicU16::new(0),
            cv_output_override: AtomicBool::new(false),
            cv_output_override_values: std::array::from_fn(|_| AtomicU32::new(0.0f32.to_bits())),
        }
    }
}

/// A cloneable handle onto the engine for non-realtime actors: UI, storage
/// I/O, control surfaces running on their own threads.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Pauses the engine. Spins until the realtime thread acknowledges; the
    /// realtime thread must keep calling update() or this never returns.
    /// Not re-entrant: nested locks deadlock.
    pub fn lock(&self) {
        while !self.is_locked() {
            self.shared.request_lock.store(true, Ordering::Release);
            thread::yield_now();
        }
    }

    /// Resumes the engine. Spins until the realtime thread acknowledges.
    pub fn unlock(&self) {
        while self.is_locked() {
            self.shared.request_unlock.store(true, Ordering::Release);
            thread::yield_now();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    pub fn set_gate_output_override(&self, enabled: bool) {
        self.shared.gate_output_override.store(enabled, Ordering::Release);
    }

    pub fn gate_output_override(&self) -> bool {
        self.shared.gate_output_override.load(Ordering::Acquire)
    }

    pub fn set_gate_output_override_value(&self, bits: u16) {
        self.shared
            .gate_output_override_value
            .store(bits, Ordering::Release);
    }

    pub fn gate_output_override_value(&self) -> u16 {
        self.shared.gate_output_override_value.load(Ordering::Acquire)
    }

    pub fn set_cv_output_override(&self, enabled: bool) {
        self.shared.cv_output_override.store(enabled, Ordering::Release);
    }

    pub fn cv_output_override(&self) -> bool {
        self.shared.cv_output_override.load(Ordering::Acquire)
    }

    pub fn set_cv_output_override_value(&self, channel: usize, volts: f32) {
        if let Some(value) = self.shared.cv_output_override_values.get(channel) {
            value.store(volts.to_bits(), Ordering::Release);
        }
    }

    pub fn cv_output_override_value(&self, channel: usize) -> f32 {
        self.shared
            .cv_output_override_values
            .get(channel)
            .map(|value| f32::from_bits(value.load(Ordering::Acquire)))
            .unwrap_or(0.0)
    }
}

/// The engine coordinator: owns the clock, the track engines and all I/O,
/// and drives them from a single realtime update loop.
pub struct Engine {
    model: Arc<Model>,
    dio: Arc<dyn Dio>,
    gate_output: Arc<dyn GateOutput>,
    midi: Arc<dyn MidiPort>,
    usb_midi: Arc<dyn MidiPort>,
    cv_input: CvInput,
    cv_output: CvOutput,
    clock: Clock,
    routing_engine: RoutingEngine,
    midi_learn: MidiLearn,
    track_engines: [Option<TrackEngine>; TRACK_COUNT],
    tick: u32,
    running: bool,
    last_update: Option<Instant>,
    nudge_tempo: NudgeTempo,
    tap_tempo: TapTempo,
    shared: Arc<EngineShared>,
    message_handler: Option<MessageHandler>,
    midi_receive_handler: Option<MidiReceiveHandler>,
    usb_midi_connect_handler: Arc<Mutex<Option<UsbConnectHandler>>>,
    usb_midi_disconnect_handler: Arc<Mutex<Option<UsbDisconnectHandler>>>,
}

#[allow(clippy::too_many_arguments)]
impl Engine {
    /// Creates a new engine borrowing the model and all hardware
    /// collaborators. Call init() before the first update().
    pub fn new(
        model: Arc<Model>,
        clock_timer: Arc<dyn ClockTimer>,
        adc: Arc<dyn Adc>,
        dac: Arc<dyn Dac>,
        dio: Arc<dyn Dio>,
        gate_output: Arc<dyn GateOutput>,
        midi: Arc<dyn MidiPort>,
        usb_midi: Arc<dyn MidiPort>,
    ) -> Engine {
        let usb_midi_connect_handler: Arc<Mutex<Option<UsbConnectHandler>>> =
            Arc::new(Mutex::new(None));
        let usb_midi_disconnect_handler: Arc<Mutex<Option<UsbDisconnectHandler>>> =
            Arc::new(Mutex::new(None));

        // Hotplug callbacks arrive on the transport's own thread; they only
        // forward to whatever host handler is installed at that moment.
        {
            let handler = usb_midi_connect_handler.clone();
            usb_midi.set_connect_handler(Some(Arc::new(move |vendor_id, product_id| {
                let handler = handler.lock();
                if let Some(handler) = handler.as_ref() {
                    handler(vendor_id, product_id);
                }
            })));
        }
        {
            let handler = usb_midi_disconnect_handler.clone();
            usb_midi.set_disconnect_handler(Some(Arc::new(move || {
                let handler = handler.lock();
                if let Some(handler) = handler.as_ref() {
                    handler();
                }
            })));
        }

        Engine {
            cv_input: CvInput::new(adc),
            cv_output: CvOutput::new(dac, model.clone()),
            clock: Clock::new(clock_timer),
            routing_engine: RoutingEngine::new(model.clone()),
            midi_learn: MidiLearn::new(),
            model,
            dio,
            gate_output,
            midi,
            usb_midi,
            track_engines: std::array::from_fn(|_| None),
            tick: 0,
            running: false,
            last_update: None,
            nudge_tempo: NudgeTempo::new(),
            tap_tempo: TapTempo::new(),
            shared: Arc::new(EngineShared::new()),
            message_handler: None,
            midi_receive_handler: None,
            usb_midi_connect_handler,
            usb_midi_disconnect_handler,
        }
    }

    /// Brings up the clock wiring and the track engines. After init the
    /// engine is unlocked and not running.
    pub fn init(&mut self) {
        let init_span = span!(Level::INFO, "engine init");
        let _enter = init_span.enter();

        self.init_clock();
        self.update_clock_setup();
        self.update_track_setups();
        self.update_track_sequences();
        self.reset_track_engines();
        self.last_update = None;

        info!("Engine initialized.");
    }

    /// The single realtime entry point. Called at high frequency by the host.
    pub fn update(&mut self) {
        let now = Instant::now();
        let dt = match self.last_update {
            Some(last) => (now - last).as_secs_f32(),
            None => 0.0,
        };
        self.last_update = Some(now);

        // Lock transitions. The realtime thread is the sole mutator of the
        // locked flag and always passes through a master-stopped state.
        if self.shared.request_lock.load(Ordering::Acquire) {
            self.clock.master_stop();
            self.shared.request_lock.store(false, Ordering::Release);
            self.shared.locked.store(true, Ordering::Release);
            debug!("Engine locked.");
        }
        if self.shared.request_unlock.load(Ordering::Acquire) {
            self.shared.request_unlock.store(false, Ordering::Release);
            self.shared.locked.store(false, Ordering::Release);
            debug!("Engine unlocked.");
        }

        if self.shared.locked.load(Ordering::Acquire) {
            // Keep the queues from overflowing and the outputs alive, but
            // run nothing else.
            while self.clock.check_tick().is_some() {}
            while self.midi.recv().is_some() {}
            while self.usb_midi.recv().is_some() {}

            self.update_overrides();
            self.cv_output.update();
            return;
        }

        // Transport events.
        while let Some(event) = self.clock.check_event() {
            match event {
                ClockEvent::Start => {
                    debug!("Transport start.");
                    self.running = true;
                    self.reset_track_engines();
                }
                ClockEvent::Stop => {
                    debug!("Transport stop.");
                    self.running = false;
                }
                ClockEvent::Continue => {
                    debug!("Transport continue.");
                    self.running = true;
                }
                ClockEvent::Reset => {
                    debug!("Transport reset.");
                    self.running = false;
                    self.reset_track_engines();
                }
            }
        }

        self.receive_midi();

        // Tempo.
        self.nudge_tempo.update(dt);
        let bpm = self.model.project().bpm() + self.nudge_tempo.strength() * 10.0;
        self.clock.set_master_bpm(bpm);

        self.update_clock_setup();
        self.update_track_setups();

        // Arbitration between ticks: immediate and latched requests land
        // with minimal latency.
        self.update_play_state(false);

        self.cv_input.update();
        self.routing_engine.update(&self.cv_input);

        let mut update_outputs = true;
        while let Some(tick) = self.clock.check_tick() {
            self.tick = tick;

            // Arbitration at the tick boundary: synced requests and song
            // slot advancement anchor here.
            self.update_play_state(true);

            self.tick_track_engines(tick);
            self.update_track_outputs();
            update_outputs = false;
        }

        if update_outputs {
            self.update_track_outputs();
        }

        self.update_track_engines(dt);
        self.update_overrides();
        self.cv_output.update();
    }

    /// Pauses the engine from its owning thread, pumping update() until the
    /// lock lands. Hosts with a separate realtime thread use EngineHandle.
    // TODO: make re-entrant
    pub fn lock(&mut self) {
        while !self.is_locked() {
            self.shared.request_lock.store(true, Ordering::Release);
            self.update();
        }
    }

    /// Resumes the engine from its owning thread.
    pub fn unlock(&mut self) {
        while self.is_locked() {
            self.shared.request_unlock.store(true, Ordering::Release);
            self.update();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    /// A handle for non-realtime actors.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn clock_start(&mut self) {
        self.clock.master_start();
    }

    pub fn clock_stop(&mut self) {
        self.clock.master_stop();
    }

    pub fn clock_continue(&mut self) {
        self.clock.master_continue();
    }

    pub fn clock_reset(&mut self) {
        self.clock.master_reset();
    }

    /// Whether the transport is currently running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The most recently consumed tick.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn tap_tempo_reset(&mut self) {
        let bpm = self.model.project().bpm();
        self.tap_tempo.reset(bpm);
    }

    pub fn tap_tempo_tap(&mut self) {
        self.tap_tempo.tap();
        let bpm = self.tap_tempo.bpm();
        self.model.project_mut().set_bpm(bpm);
    }

    pub fn nudge_tempo_set_direction(&mut self, direction: i32) {
        self.nudge_tempo.set_direction(direction);
    }

    pub fn nudge_tempo_strength(&self) -> f32 {
        self.nudge_tempo.strength()
    }

    /// Position within the sync measure as a fraction in [0, 1).
    pub fn sync_measure_fraction(&self) -> f32 {
        let measure_divisor = self.model.project().sync_measure() * PPQN * 4;
        (self.tick % measure_divisor) as f32 / measure_divisor as f32
    }

    /// Sends a message out the given port. Returns the transport's verdict.
    pub fn send_midi(&self, port: PortId, message: &MidiMessage) -> bool {
        match port {
            PortId::Midi => self.midi.send(message),
            PortId::UsbMidi => self.usb_midi.send(message),
        }
    }

    /// Surfaces an informational message to the host, if it installed a
    /// handler.
    pub fn show_message(&self, text: &str, duration_ms: u32) {
        info!(message = text, "Showing message.");
        if let Some(handler) = self.message_handler.as_ref() {
            handler(text, duration_ms);
        }
    }

    pub fn set_message_handler(&mut self, handler: Option<MessageHandler>) {
        self.message_handler = handler;
    }

    pub fn set_midi_receive_handler(&mut self, handler: Option<MidiReceiveHandler>) {
        self.midi_receive_handler = handler;
    }

    pub fn set_usb_midi_connect_handler(&mut self, handler: Option<UsbConnectHandler>) {
        *self.usb_midi_connect_handler.lock() = handler;
    }

    pub fn set_usb_midi_disconnect_handler(&mut self, handler: Option<UsbDisconnectHandler>) {
        *self.usb_midi_disconnect_handler.lock() = handler;
    }

    /// Arms MIDI-learn; the next eligible control latches.
    pub fn midi_learn(&mut self) -> &mut MidiLearn {
        &mut self.midi_learn
    }

    /// The engine running a track slot, if the slot is populated.
    pub fn track_engine(&self, index: usize) -> Option<&TrackEngine> {
        self.track_engines.get(index).and_then(|slot| slot.as_ref())
    }

    /// Applies the clock's output pin state according to the configured
    /// output mode.
    fn apply_clock_output(dio: &Arc<dyn Dio>, model: &Arc<Model>, state: OutputState) {
        dio.set_clock_output(state.clock);
        let mode = model.project().clock_setup().clock_output_mode();
        match mode {
            ClockOutputMode::Reset => dio.set_reset_output(state.reset),
            ClockOutputMode::Run => dio.set_reset_output(state.run),
            ClockOutputMode::Last => {}
        }
    }

    /// Wires the clock listener, the external input interrupt handlers and
    /// the MIDI receive filters. Handlers run in interrupt or receive
    /// context and only touch the clock's ISR-safe entry points.
    fn init_clock(&mut self) {
        {
            let dio = self.dio.clone();
            let model = self.model.clone();
            let midi = self.midi.clone();
            let usb_midi = self.usb_midi.clone();
            let tx_model = self.model.clone();
            self.clock.set_listener(Some(ClockListener {
                on_output: Box::new(move |state| {
                    Engine::apply_clock_output(&dio, &model, state);
                }),
                on_midi: Box::new(move |byte| {
                    let (midi_tx, usb_tx) = {
                        let project = tx_model.project();
                        let setup = project.clock_setup();
                        (setup.midi_tx(), setup.usb_tx())
                    };
                    let message = MidiMessage::from_status(byte);
                    if midi_tx {
                        midi.send(&message);
                    }
                    if usb_tx {
                        usb_midi.send(&message);
                    }
                }),
            }));
        }

        // External clock input. Interrupt context.
        {
            let handle = self.clock.handle();
            let model = self.model.clone();
            let dio = Arc::downgrade(&self.dio);
            self.dio.set_clock_input_handler(Some(Arc::new(move |value| {
                // Start on the first pulse if reset is not held and the
                // clock is not running.
                let input_mode = model.project().clock_setup().clock_input_mode();
                if input_mode == ClockInputMode::Reset && !handle.is_running() {
                    let reset_held = dio
                        .upgrade()
                        .map(|dio| dio.reset_input())
                        .unwrap_or(false);
                    if !reset_held {
                        handle.slave_start(ClockSource::External);
                    }
                }
                if value {
                    handle.slave_tick(ClockSource::External);
                }
            })));
        }

        // Reset or run/stop input. Interrupt context.
        {
            let handle = self.clock.handle();
            let model = self.model.clone();
            self.dio.set_reset_input_handler(Some(Arc::new(move |value| {
                let input_mode = model.project().clock_setup().clock_input_mode();
                match input_mode {
                    ClockInputMode::Reset => {
                        if value {
                            handle.slave_reset(ClockSource::External);
                        } else {
                            handle.slave_start(ClockSource::External);
                        }
                    }
                    ClockInputMode::Run => {
                        if value {
                            handle.slave_continue(ClockSource::External);
                        } else {
                            handle.slave_stop(ClockSource::External);
                        }
                    }
                    ClockInputMode::StartStop => {
                        if value {
                            handle.slave_start(ClockSource::External);
                        } else {
                            handle.slave_stop(ClockSource::External);
                            handle.slave_reset(ClockSource::External);
                        }
                    }
                }
            })));
        }

        // Divert MIDI real-time bytes into the clock ahead of the message
        // queue, so sync never waits on message-level processing.
        {
            let handle = self.clock.handle();
            self.midi.set_recv_filter(Some(Arc::new(move |byte| {
                if MidiMessage::is_clock_message(byte) {
                    handle.slave_handle_midi(ClockSource::Midi, byte);
                    return true;
                }
                false
            })));
        }
        {
            let handle = self.clock.handle();
            self.usb_midi.set_recv_filter(Some(Arc::new(move |byte| {
                if MidiMessage::is_clock_message(byte) {
                    handle.slave_handle_midi(ClockSource::UsbMidi, byte);
                    return true;
                }
                false
            })));
        }
    }

    /// Applies a dirty clock setup: mode, slave divisors, output stream, and
    /// a slave-state sync against the current reset input level.
    fn update_clock_setup(&mut self) {
        let setup = {
            let project = self.model.project();
            let setup = *project.clock_setup();
            if !setup.is_dirty() {
                return;
            }
            setup
        };

        match setup.mode() {
            ClockSetupMode::Auto => self.clock.set_mode(ClockMode::Auto),
            ClockSetupMode::Master => self.clock.set_mode(ClockMode::Master),
            ClockSetupMode::Slave => self.clock.set_mode(ClockMode::Slave),
        }

        self.clock
            .slave_configure(ClockSource::External, setup.clock_input_divisor(), true);
        self.clock
            .slave_configure(ClockSource::Midi, MIDI_CLOCK_DIVISOR, setup.midi_rx());
        self.clock
            .slave_configure(ClockSource::UsbMidi, MIDI_CLOCK_DIVISOR, setup.usb_rx());

        // Sync slave state to the current reset level so that entering a
        // mode between edges still lands in a coherent state. Only an
        // explicit slave setup synthesizes a start this way; in auto mode an
        // actual edge is required, so an unconnected device stays idle.
        let reset_input = self.dio.reset_input();
        let running = self.clock.is_running();
        let explicit_slave = setup.mode() == ClockSetupMode::Slave;
        let handle = self.clock.handle();
        match setup.clock_input_mode() {
            ClockInputMode::Reset => {
                if reset_input && running {
                    handle.slave_reset(ClockSource::External);
                } else if !reset_input && !running && explicit_slave {
                    handle.slave_start(ClockSource::External);
                }
            }
            ClockInputMode::Run => {
                if reset_input && !running && explicit_slave {
                    handle.slave_continue(ClockSource::External);
                } else if !reset_input && running {
                    handle.slave_stop(ClockSource::External);
                }
            }
            ClockInputMode::StartStop => {
                if reset_input && !running && explicit_slave {
                    handle.slave_start(ClockSource::External);
                } else if !reset_input && running {
                    handle.slave_reset(ClockSource::External);
                }
            }
        }

        self.clock
            .output_configure(setup.clock_output_divisor(), setup.clock_output_pulse_ms());
        Engine::apply_clock_output(&self.dio, &self.model, self.clock.output_state());

        self.model.project_mut().clock_setup_mut().clear_dirty();
        debug!("Applied clock setup.");
    }

    /// Reconciles every track slot with its model track: recreates engines
    /// whose mode drifted and propagates swing.
    fn update_track_setups(&mut self) {
        let model = self.model.clone();
        let project = model.project();

        for index in 0..TRACK_COUNT {
            let track = project.track(index);

            let recreate = match &self.track_engines[index] {
                None => true,
                Some(engine) => engine.track_mode() != track.track_mode(),
            };

            if recreate {
                let mut engine = TrackEngine::for_track(track);

                let track_state = project.play_state().track_state(index);
                engine.set_mute(track_state.mute());
                engine.set_fill(track_state.fill());
                engine.set_pattern(track_state.pattern());

                debug!(track = index, mode = ?track.track_mode(), "Created track engine.");
                self.track_engines[index] = Some(engine);
            }

            if let Some(engine) = self.track_engines[index].as_mut() {
                engine.set_swing(project.swing());
            }
        }
    }

    /// Pushes each track state's pattern into its engine.
    fn update_track_sequences(&mut self) {
        let model = self.model.clone();
        let project = model.project();

        for index in 0..TRACK_COUNT {
            if let Some(engine) = self.track_engines[index].as_mut() {
                engine.set_pattern(project.play_state().track_state(index).pattern());
            }
        }
    }

    fn reset_track_engines(&mut self) {
        for engine in self.track_engines.iter_mut().flatten() {
            engine.reset();
        }
    }

    /// Arbitrates pending mute, pattern and song requests. Runs both between
    /// ticks (ticked = false: immediate and latched requests) and at every
    /// tick boundary (ticked = true: synced requests and song advancement).
    fn update_play_state(&mut self, ticked: bool) {
        let model = self.model.clone();
        let mut project = model.project_mut();
        let sync_measure = project.sync_measure();
        let (play_state, song) = project.play_state_and_song();

        let has_immediate_requests = play_state.has_immediate_requests();
        let has_synced_requests = play_state.has_synced_requests();
        let handle_latched_requests = play_state.execute_latched_requests();
        let has_requests = has_immediate_requests || has_synced_requests || handle_latched_requests;

        let measure_divisor = sync_measure * PPQN * 4;
        // The (divisor - 1) window catches requests arriving one tick short
        // of the boundary.
        let handle_synced_requests = self.tick % measure_divisor == 0
            || self.tick % measure_divisor == measure_divisor - 1;
        // The song advances one tick ahead of the boundary so the new
        // patterns are in place when the measure starts.
        let mut switch_to_next_slot =
            ticked && (self.tick % measure_divisor == measure_divisor - 1);

        // Mute and pattern requests.

        let mut changed_patterns = false;

        if has_requests {
            let mute_requests = TrackState::IMMEDIATE_MUTE_REQUEST
                | if handle_synced_requests {
                    TrackState::SYNCED_MUTE_REQUEST
                } else {
                    0
                }
                | if handle_latched_requests {
                    TrackState::LATCHED_MUTE_REQUEST
                } else {
                    0
                };

            let pattern_requests = TrackState::IMMEDIATE_PATTERN_REQUEST
                | if handle_synced_requests {
                    TrackState::SYNCED_PATTERN_REQUEST
                } else {
                    0
                }
                | if handle_latched_requests {
                    TrackState::LATCHED_PATTERN_REQUEST
                } else {
                    0
                };

            for index in 0..TRACK_COUNT {
                let track_state = play_state.track_state_mut(index);

                if track_state.has_requests(mute_requests) {
                    track_state.set_mute(track_state.requested_mute());
                }

                if track_state.has_requests(pattern_requests) {
                    track_state.set_pattern(track_state.requested_pattern());
                    changed_patterns = true;
                }

                track_state.clear_requests(mute_requests | pattern_requests);
            }
        }

        // Song requests.

        if has_requests {
            let play_requests = SongState::IMMEDIATE_PLAY_REQUEST
                | if handle_synced_requests {
                    SongState::SYNCED_PLAY_REQUEST
                } else {
                    0
                }
                | if handle_latched_requests {
                    SongState::LATCHED_PLAY_REQUEST
                } else {
                    0
                };

            let stop_requests = SongState::IMMEDIATE_STOP_REQUEST
                | if handle_synced_requests {
                    SongState::SYNCED_STOP_REQUEST
                } else {
                    0
                }
                | if handle_latched_requests {
                    SongState::LATCHED_STOP_REQUEST
                } else {
                    0
                };

            if play_state.song_state().has_requests(play_requests) {
                let requested_slot = play_state.song_state().requested_slot();
                // A slot index against a shrunken song is a stale request
                // and is dropped; the flag is still cleared below.
                if requested_slot >= 0 && (requested_slot as usize) < song.slot_count() {
                    let slot = *song.slot(requested_slot as usize);
                    for index in 0..TRACK_COUNT {
                        play_state
                            .track_state_mut(index)
                            .set_pattern(slot.pattern(index));
                    }

                    let song_state = play_state.song_state_mut();
                    song_state.set_current_slot(requested_slot as usize);
                    song_state.set_current_repeat(0);
                    song_state.set_playing(true);
                    // The slot was just set; don't advance past it below.
                    switch_to_next_slot = false;
                }
            }

            if changed_patterns || play_state.song_state().has_requests(stop_requests) {
                play_state.song_state_mut().set_playing(false);
            }

            play_state
                .song_state_mut()
                .clear_requests(play_requests | stop_requests);
        }

        // Clear the global request buckets.

        if has_requests {
            play_state.clear_immediate_requests();
            if handle_synced_requests {
                play_state.clear_synced_requests();
            }
            if handle_latched_requests {
                play_state.clear_latched_requests();
            }
        }

        // Song slot advancement.

        if play_state.song_state().playing()
            && switch_to_next_slot
            && play_state.song_state().current_slot() < song.slot_count()
        {
            let current_slot = play_state.song_state().current_slot();
            let current_repeat = play_state.song_state().current_repeat();
            let repeats = song.slot(current_slot).repeats();

            {
                let song_state = play_state.song_state_mut();
                if current_repeat + 1 < repeats {
                    song_state.set_current_repeat(current_repeat + 1);
                } else {
                    song_state.set_current_repeat(0);
                    if current_slot + 1 < song.slot_count() {
                        song_state.set_current_slot(current_slot + 1);
                    } else {
                        song_state.set_current_slot(0);
                    }
                }
            }

            let slot = *song.slot(play_state.song_state().current_slot());
            for index in 0..TRACK_COUNT {
                play_state.track_state_mut(index).set_pattern(slot.pattern(index));
                if let Some(engine) = self.track_engines[index].as_mut() {
                    engine.reset();
                }
            }
        }

        // Push the resolved state into the engines.

        if has_requests || switch_to_next_slot {
            for index in 0..TRACK_COUNT {
                let track_state = *play_state.track_state(index);
                if let Some(engine) = self.track_engines[index].as_mut() {
                    engine.set_mute(track_state.mute());
                    engine.set_fill(track_state.fill());
                    engine.set_pattern(track_state.pattern());
                }
            }
        }
    }

    /// Drains both MIDI ports and dispatches every message.
    fn receive_midi(&mut self) {
        while let Some(message) = self.midi.recv() {
            self.receive_midi_message(PortId::Midi, &message);
        }
        while let Some(message) = self.usb_midi.recv() {
            self.receive_midi_message(PortId::UsbMidi, &message);
        }
    }

    /// Offers a message to MIDI-learn, routing, the host handler, and every
    /// track engine. Broadcast delivery: each engine checks the channel
    /// against its own configuration.
    fn receive_midi_message(&mut self, port: PortId, message: &MidiMessage) {
        self.midi_learn.receive_midi(port, message);
        self.routing_engine.receive_midi(port, message);

        if let Some(handler) = self.midi_receive_handler.as_ref() {
            handler(port, message);
        }

        let channel = message.channel();
        let model = self.model.clone();
        let project = model.project();
        for index in 0..TRACK_COUNT {
            if let Some(engine) = self.track_engines[index].as_mut() {
                engine.receive_midi(port, channel, project.track(index), message);
            }
        }
    }

    /// Advances every track engine's per-tick state. Link targets resolve to
    /// lower indices, so the left split always holds a linked engine.
    fn tick_track_engines(&mut self, tick: u32) {
        let model = self.model.clone();
        let project = model.project();

        for index in 0..TRACK_COUNT {
            let (left, rest) = self.track_engines.split_at_mut(index);
            if let Some(engine) = rest[0].as_mut() {
                let linked = engine
                    .link_track()
                    .and_then(|link| left.get(link))
                    .and_then(|slot| slot.as_ref());
                engine.tick(tick, project.track(index), linked);
            }
        }
    }

    /// Advances every track engine's continuous state by dt seconds.
    fn update_track_engines(&mut self, dt: f32) {
        let model = self.model.clone();
        let project = model.project();

        for index in 0..TRACK_COUNT {
            if let Some(engine) = self.track_engines[index].as_mut() {
                engine.update(dt, project.track(index));
            }
        }
    }

    /// Wires track engine outputs to the physical gate and CV channels.
    /// Outputs sourcing the same track draw consecutive sub-channels in
    /// physical index order.
    fn update_track_outputs(&mut self) {
        let is_idle = self.clock.is_idle();
        let model = self.model.clone();
        let project = model.project();
        let selected = project.selected_track_index();

        // Only the selected track may present an idle preview.
        for index in 0..TRACK_COUNT {
            if index != selected {
                if let Some(engine) = self.track_engines[index].as_mut() {
                    engine.clear_idle_output();
                }
            }
        }

        let gate_override = self.shared.gate_output_override.load(Ordering::Acquire);
        let cv_override = self.shared.cv_output_override.load(Ordering::Acquire);

        let mut track_gate_index = [0usize; TRACK_COUNT];
        let mut track_cv_index = [0usize; TRACK_COUNT];

        for index in 0..TRACK_COUNT {
            let gate_source = project.gate_output_tracks()[index];
            if !gate_override {
                if let Some(engine) = self.track_engines[gate_source].as_ref() {
                    let sub_index = track_gate_index[gate_source];
                    track_gate_index[gate_source] += 1;
                    let value = if is_idle && engine.idle_output() {
                        engine.idle_gate_output(sub_index)
                    } else {
                        engine.gate_output(sub_index)
                    };
                    self.gate_output.set_gate(index, value);
                }
            }

            let cv_source = project.cv_output_tracks()[index];
            if !cv_override {
                if let Some(engine) = self.track_engines[cv_source].as_ref() {
                    let sub_index = track_cv_index[cv_source];
                    track_cv_index[cv_source] += 1;
                    let value = if is_idle && engine.idle_output() {
                        engine.idle_cv_output(sub_index)
                    } else {
                        engine.cv_output(sub_index)
                    };
                    self.cv_output.set_channel(index, value);
                }
            }
        }
    }

    /// Applies the output overrides wholesale, replacing whatever the track
    /// pass produced.
    fn update_overrides(&mut self) {
        if self.shared.gate_output_override.load(Ordering::Acquire) {
            self.gate_output
                .set_gates(self.shared.gate_output_override_value.load(Ordering::Acquire));
        }
        if self.shared.cv_output_override.load(Ordering::Acquire) {
            for (index, value) in self.shared.cv_output_override_values.iter().enumerate() {
                self.cv_output
                    .set_channel(index, f32::from_bits(value.load(Ordering::Acquire)));
            }
        }
    }
}
