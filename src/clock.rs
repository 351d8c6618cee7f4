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
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
    Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

pub mod timer;

use self::timer::ClockTimer;

/// Internal tick resolution in pulses per quarter note.
pub const PPQN: u32 = 192;

/// MIDI real-time clock runs at 24 PPQN.
pub const MIDI_CLOCK_DIVISOR: u32 = PPQN / 24;

/// How many pending ticks the clock buffers. Sized for bursts when the
/// realtime thread was held off for several periods.
const TICK_QUEUE_SIZE: usize = 2048;

/// How many pending transport events the clock buffers.
const EVENT_QUEUE_SIZE: usize = 16;

/// Who is allowed to drive the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockMode {
    /// Master until a slave source produces events, and vice versa.
    Auto,
    /// Internal clock only; slave events are ignored.
    Master,
    /// External sources only; master control is ignored.
    Slave,
}

/// An external clock source feeding slave events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    External,
    Midi,
    UsbMidi,
}

/// Number of slave clock sources.
pub const CLOCK_SOURCE_COUNT: usize = 3;

impl ClockSource {
    fn index(self) -> usize {
        match self {
            ClockSource::External => 0,
            ClockSource::Midi => 1,
            ClockSource::UsbMidi => 2,
        }
    }
}

/// A transport event produced by the clock and consumed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockEvent {
    Start,
    Stop,
    Continue,
    Reset,
}

/// The state of the clock output pins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputState {
    /// The divided clock pulse.
    pub clock: bool,
    /// Asserted while the transport sits in the reset state.
    pub reset: bool,
    /// Asserted while the transport is running.
    pub run: bool,
}

impl OutputState {
    fn pack(self) -> u8 {
        (self.clock as u8) | (self.reset as u8) << 1 | (self.run as u8) << 2
    }

    fn unpack(bits: u8) -> OutputState {
        OutputState {
            clock: bits & 1 != 0,
            reset: bits & 2 != 0,
            run: bits & 4 != 0,
        }
    }
}

/// Callbacks the owner installs to observe output state changes and MIDI
/// clock bytes. Both may fire from timer or receive context.
pub struct ClockListener {
    pub on_output: Box<dyn Fn(OutputState) + Send + Sync>,
    pub on_midi: Box<dyn Fn(u8) + Send + Sync>,
}

// active_source encodings.
const SOURCE_NONE: u8 = 0;
const SOURCE_MASTER: u8 = 1;
const SOURCE_SLAVE_BASE: u8 = 2;

struct SlaveState {
    divisor: AtomicU32,
    enabled: AtomicBool,
}

/// State shared between the consumer side and the interrupt-context entry
/// points. Everything here is atomics and lock-free queues; the listener lock
/// is only write-locked once at init.
struct Inner {
    mode: AtomicU8,
    running: AtomicBool,
    reset_state: AtomicBool,
    active_source: AtomicU8,
    master_bpm_bits: AtomicU32,
    tick: AtomicU32,
    tick_tx: Sender<u32>,
    event_tx: Sender<ClockEvent>,
    slaves: [SlaveState; CLOCK_SOURCE_COUNT],
    output_divisor: AtomicU32,
    output_pulse_ms: AtomicU32,
    output_state: AtomicU8,
    listener: RwLock<Option<ClockListener>>,
}

impl Inner {
    fn mode(&self) -> ClockMode {
        match self.mode.load(Ordering::Relaxed) {
            1 => ClockMode::Master,
            2 => ClockMode::Slave,
            _ => ClockMode::Auto,
        }
    }

    fn master_bpm(&self) -> f32 {
        f32::from_bits(self.master_bpm_bits.load(Ordering::Relaxed))
    }

    fn push_event(&self, event: ClockEvent) {
        // Queue full means the engine stalled; dropping beats blocking here.
        let _ = self.event_tx.try_send(event);
    }

    fn send_midi(&self, byte: u8) {
        let listener = self.listener.read();
        if let Some(listener) = listener.as_ref() {
            (listener.on_midi)(byte);
        }
    }

    /// Emits one internal tick: queues it, taps the MIDI clock stream and
    /// refreshes the output pulse.
    fn emit_tick(&self) {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel);
        let _ = self.tick_tx.try_send(tick);

        if tick % MIDI_CLOCK_DIVISOR == 0 {
            self.send_midi(0xf8);
        }

        self.update_output_state();
    }

    /// Recomputes the output pin state and notifies the listener on change.
    fn update_output_state(&self) {
        let running = self.running.load(Ordering::Acquire);

        let clock = if running {
            let divisor = self.output_divisor.load(Ordering::Relaxed).max(1);
            let pulse_ticks = self.output_pulse_ticks();
            // tick holds the next tick number; the current one is tick - 1.
            let current = self.tick.load(Ordering::Acquire).wrapping_sub(1);
            (current % divisor) < pulse_ticks
        } else {
            false
        };

        let state = OutputState {
            clock,
            reset: self.reset_state.load(Ordering::Relaxed),
            run: running,
        };

        let packed = state.pack();
        if self.output_state.swap(packed, Ordering::AcqRel) != packed {
            let listener = self.listener.read();
            if let Some(listener) = listener.as_ref() {
                (listener.on_output)(state);
            }
        }
    }

    /// The configured pulse width in ticks at the current tempo, at least one.
    fn output_pulse_ticks(&self) -> u32 {
        let pulse_ms = self.output_pulse_ms.load(Ordering::Relaxed) as f32;
        let ticks_per_ms = self.master_bpm() * PPQN as f32 / 60_000.0;
        ((pulse_ms * ticks_per_ms) as u32).max(1)
    }

    // Slave entry points. Interrupt context: bounded work, enqueue only.

    fn slave_enabled(&self, source: ClockSource) -> bool {
        self.slaves[source.index()].enabled.load(Ordering::Relaxed)
    }

    fn slave_start(&self, source: ClockSource) {
        if self.mode() == ClockMode::Master || !self.slave_enabled(source) {
            return;
        }
        self.reset_state.store(false, Ordering::Relaxed);
        self.tick.store(0, Ordering::Release);
        self.active_source
            .store(SOURCE_SLAVE_BASE + source.index() as u8, Ordering::Release);
        self.running.store(true, Ordering::Release);
        self.push_event(ClockEvent::Start);
        self.update_output_state();
    }

    fn slave_continue(&self, source: ClockSource) {
        if self.mode() == ClockMode::Master || !self.slave_enabled(source) {
            return;
        }
        if self.running.load(Ordering::Acquire) {
            return;
        }
        self.reset_state.store(false, Ordering::Relaxed);
        self.active_source
            .store(SOURCE_SLAVE_BASE + source.index() as u8, Ordering::Release);
        self.running.store(true, Ordering::Release);
        self.push_event(ClockEvent::Continue);
        self.update_output_state();
    }

    fn slave_stop(&self, source: ClockSource) {
        let active = self.active_source.load(Ordering::Acquire);
        if active != SOURCE_SLAVE_BASE + source.index() as u8 {
            return;
        }
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.active_source.store(SOURCE_NONE, Ordering::Release);
        self.push_event(ClockEvent::Stop);
        self.update_output_state();
    }

    fn slave_reset(&self, source: ClockSource) {
        if self.mode() == ClockMode::Master || !self.slave_enabled(source) {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.active_source.store(SOURCE_NONE, Ordering::Release);
        self.tick.store(0, Ordering::Release);
        self.reset_state.store(true, Ordering::Relaxed);
        self.push_event(ClockEvent::Reset);
        self.update_output_state();
    }

    fn slave_tick(&self, source: ClockSource) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let active = self.active_source.load(Ordering::Acquire);
        if active != SOURCE_SLAVE_BASE + source.index() as u8 {
            return;
        }
        let divisor = self.slaves[source.index()].divisor.load(Ordering::Relaxed).max(1);
        for _ in 0..divisor {
            self.emit_tick();
        }
    }

    fn slave_handle_midi(&self, source: ClockSource, byte: u8) {
        match byte {
            0xf8 => self.slave_tick(source),
            0xfa => self.slave_start(source),
            0xfb => self.slave_continue(source),
            0xfc => self.slave_stop(source),
            // Song position pointer: matched by the filter, but there is no
            // song position chase.
            _ => {}
        }
    }
}

/// The ISR-facing half of the clock. Clones are cheap; every entry point is
/// safe to call from interrupt or receive context.
#[derive(Clone)]
pub struct ClockHandle {
    inner: Arc<Inner>,
}

impl ClockHandle {
    pub fn slave_start(&self, source: ClockSource) {
        self.inner.slave_start(source);
    }

    pub fn slave_continue(&self, source: ClockSource) {
        self.inner.slave_continue(source);
    }

    pub fn slave_stop(&self, source: ClockSource) {
        self.inner.slave_stop(source);
    }

    pub fn slave_reset(&self, source: ClockSource) {
        self.inner.slave_reset(source);
    }

    pub fn slave_tick(&self, source: ClockSource) {
        self.inner.slave_tick(source);
    }

    pub fn slave_handle_midi(&self, source: ClockSource, byte: u8) {
        self.inner.slave_handle_midi(source, byte);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

/// The tempo and transport state machine. Owned by the engine; external
/// sources reach it through a ClockHandle.
pub struct Clock {
    inner: Arc<Inner>,
    timer: Arc<dyn ClockTimer>,
    tick_rx: Receiver<u32>,
    event_rx: Receiver<ClockEvent>,
}

impl Clock {
    pub fn new(timer: Arc<dyn ClockTimer>) -> Clock {
        let (tick_tx, tick_rx) = bounded(TICK_QUEUE_SIZE);
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_SIZE);

        let inner = Arc::new(Inner {
            mode: AtomicU8::new(0),
            running: AtomicBool::new(false),
            reset_state: AtomicBool::new(false),
            active_source: AtomicU8::new(SOURCE_NONE),
            master_bpm_bits: AtomicU32::new(120.0f32.to_bits()),
            tick: AtomicU32::new(0),
            tick_tx,
            event_tx,
            slaves: std::array::from_fn(|_| SlaveState {
                divisor: AtomicU32::new(1),
                enabled: AtomicBool::new(false),
            }),
            output_divisor: AtomicU32::new(PPQN / 4),
            output_pulse_ms: AtomicU32::new(1),
            output_state: AtomicU8::new(0),
            listener: RwLock::new(None),
        });

        {
            let inner = inner.clone();
            timer.set_handler(Some(Arc::new(move || {
                // Timer interrupt: only the master emits ticks here.
                if inner.running.load(Ordering::Acquire)
                    && inner.active_source.load(Ordering::Acquire) == SOURCE_MASTER
                {
                    inner.emit_tick();
                }
            })));
        }

        Clock {
            inner,
            timer,
            tick_rx,
            event_rx,
        }
    }

    /// Installs the listener for output-state and MIDI clock byte events.
    pub fn set_listener(&self, listener: Option<ClockListener>) {
        *self.inner.listener.write() = listener;
    }

    /// The ISR-facing handle.
    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn set_mode(&self, mode: ClockMode) {
        let value = match mode {
            ClockMode::Auto => 0,
            ClockMode::Master => 1,
            ClockMode::Slave => 2,
        };
        self.inner.mode.store(value, Ordering::Relaxed);
    }

    pub fn mode(&self) -> ClockMode {
        self.inner.mode()
    }

    // Master control.

    pub fn master_start(&self) {
        if self.inner.mode() == ClockMode::Slave {
            return;
        }
        self.inner.reset_state.store(false, Ordering::Relaxed);
        self.inner.tick.store(0, Ordering::Release);
        self.inner.active_source.store(SOURCE_MASTER, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);
        self.update_timer_period();
        self.timer.start();
        self.inner.push_event(ClockEvent::Start);
        self.inner.send_midi(0xfa);
        self.inner.update_output_state();
    }

    pub fn master_stop(&self) {
        self.timer.stop();
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.active_source.store(SOURCE_NONE, Ordering::Release);
        self.inner.push_event(ClockEvent::Stop);
        self.inner.send_midi(0xfc);
        self.inner.update_output_state();
    }

    pub fn master_continue(&self) {
        if self.inner.mode() == ClockMode::Slave {
            return;
        }
        if self.inner.running.load(Ordering::Acquire) {
            return;
        }
        self.inner.reset_state.store(false, Ordering::Relaxed);
        self.inner.active_source.store(SOURCE_MASTER, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);
        self.update_timer_period();
        self.timer.start();
        self.inner.push_event(ClockEvent::Continue);
        self.inner.send_midi(0xfb);
        self.inner.update_output_state();
    }

    pub fn master_reset(&self) {
        if self.inner.mode() == ClockMode::Slave {
            return;
        }
        self.timer.stop();
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);
        self.inner.active_source.store(SOURCE_NONE, Ordering::Release);
        self.inner.tick.store(0, Ordering::Release);
        self.inner.reset_state.store(true, Ordering::Relaxed);
        self.inner.push_event(ClockEvent::Reset);
        if was_running {
            self.inner.send_midi(0xfc);
        }
        self.inner.update_output_state();
    }

    /// Sets the master tempo and reprograms the timer period.
    pub fn set_master_bpm(&self, bpm: f32) {
        let bpm = bpm.clamp(1.0, 1000.0);
        self.inner.master_bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
        self.update_timer_period();
    }

    fn update_timer_period(&self) {
        let bpm = self.inner.master_bpm();
        let period_us = (60_000_000.0 / (bpm * PPQN as f32)) as u32;
        self.timer.set_period_us(period_us.max(1));
    }

    // Slave configuration.

    pub fn slave_configure(&self, source: ClockSource, divisor: u32, enabled: bool) {
        let slave = &self.inner.slaves[source.index()];
        slave.divisor.store(divisor.max(1), Ordering::Relaxed);
        slave.enabled.store(enabled, Ordering::Relaxed);
    }

    // Consumer side.

    /// Pops the next pending tick, if any.
    pub fn check_tick(&self) -> Option<u32> {
        self.tick_rx.try_recv().ok()
    }

    /// Pops the next pending transport event, if any.
    pub fn check_event(&self) -> Option<ClockEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_running()
    }

    /// Configures the output pulse stream: divisor in ticks, pulse width in
    /// milliseconds.
    pub fn output_configure(&self, divisor: u32, pulse_ms: u32) {
        self.inner.output_divisor.store(divisor.max(1), Ordering::Relaxed);
        self.inner.output_pulse_ms.store(pulse_ms.max(1), Ordering::Relaxed);
        self.inner.update_output_state();
    }

    /// The current output pin state.
    pub fn output_state(&self) -> OutputState {
        OutputState::unpack(self.inner.output_state.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::timer::MockTimer;
    use super::*;

    fn clock_with_timer() -> (Clock, Arc<MockTimer>) {
        let timer = Arc::new(MockTimer::new());
        let clock = Clock::new(timer.clone());
        (clock, timer)
    }

    fn drain_ticks(clock: &Clock) -> Vec<u32> {
        let mut ticks = Vec::new();
        while let Some(tick) = clock.check_tick() {
            ticks.push(tick);
        }
        ticks
    }

    fn drain_events(clock: &Clock) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        while let Some(event) = clock.check_event() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_master_start_emits_ticks() {
        let (clock, timer) = clock_with_timer();
        clock.master_start();

        assert!(clock.is_running());
        assert_eq!(drain_events(&clock), vec![ClockEvent::Start]);

        timer.fire(4);
        assert_eq!(drain_ticks(&clock), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_master_bpm_sets_timer_period() {
        let (clock, timer) = clock_with_timer();
        clock.set_master_bpm(120.0);
        // 60e6 / (120 * 192) = 2604 us.
        assert_eq!(timer.period_us(), 2604);

        clock.set_master_bpm(240.0);
        assert_eq!(timer.period_us(), 1302);
    }

    #[test]
    fn test_master_stop_and_continue() {
        let (clock, timer) = clock_with_timer();
        clock.master_start();
        timer.fire(2);
        clock.master_stop();
        assert!(clock.is_idle());

        // Stopped timers produce no ticks.
        timer.fire(2);
        clock.master_continue();
        timer.fire(2);

        assert_eq!(drain_ticks(&clock), vec![0, 1, 2, 3]);
        assert_eq!(
            drain_events(&clock),
            vec![ClockEvent::Start, ClockEvent::Stop, ClockEvent::Continue]
        );
    }

    #[test]
    fn test_master_reset_rewinds() {
        let (clock, timer) = clock_with_timer();
        clock.master_start();
        timer.fire(10);
        clock.master_reset();
        drain_ticks(&clock);
        drain_events(&clock);

        clock.master_start();
        timer.fire(1);
        assert_eq!(drain_ticks(&clock), vec![0]);
    }

    #[test]
    fn test_idle_stop_is_silent() {
        let (clock, _timer) = clock_with_timer();
        clock.master_stop();
        assert_eq!(drain_events(&clock), vec![]);
    }

    #[test]
    fn test_slave_mode_blocks_master() {
        let (clock, timer) = clock_with_timer();
        clock.set_mode(ClockMode::Slave);
        clock.master_start();
        assert!(clock.is_idle());
        timer.fire(4);
        assert_eq!(drain_ticks(&clock), Vec::<u32>::new());
    }

    #[test]
    fn test_master_mode_blocks_slaves() {
        let (clock, _timer) = clock_with_timer();
        clock.set_mode(ClockMode::Master);
        clock.slave_configure(ClockSource::External, 1, true);

        let handle = clock.handle();
        handle.slave_start(ClockSource::External);
        assert!(clock.is_idle());
    }

    #[test]
    fn test_disabled_slave_source_is_ignored() {
        let (clock, _timer) = clock_with_timer();
        clock.slave_configure(ClockSource::Midi, MIDI_CLOCK_DIVISOR, false);

        let handle = clock.handle();
        handle.slave_start(ClockSource::Midi);
        assert!(clock.is_idle());
    }

    #[test]
    fn test_slave_tick_applies_divisor() {
        let (clock, _timer) = clock_with_timer();
        clock.slave_configure(ClockSource::Midi, MIDI_CLOCK_DIVISOR, true);

        let handle = clock.handle();
        handle.slave_start(ClockSource::Midi);
        handle.slave_tick(ClockSource::Midi);
        handle.slave_tick(ClockSource::Midi);

        let ticks = drain_ticks(&clock);
        assert_eq!(ticks.len(), 2 * MIDI_CLOCK_DIVISOR as usize);
        assert_eq!(ticks[0], 0);
        assert_eq!(*ticks.last().unwrap(), 2 * MIDI_CLOCK_DIVISOR - 1);
    }

    #[test]
    fn test_slave_midi_real_time_bytes() {
        let (clock, _timer) = clock_with_timer();
        clock.slave_configure(ClockSource::UsbMidi, MIDI_CLOCK_DIVISOR, true);

        let handle = clock.handle();
        handle.slave_handle_midi(ClockSource::UsbMidi, 0xfa);
        handle.slave_handle_midi(ClockSource::UsbMidi, 0xf8);
        handle.slave_handle_midi(ClockSource::UsbMidi, 0xfc);
        handle.slave_handle_midi(ClockSource::UsbMidi, 0xfb);

        assert_eq!(
            drain_events(&clock),
            vec![ClockEvent::Start, ClockEvent::Stop, ClockEvent::Continue]
        );
        assert_eq!(drain_ticks(&clock).len(), MIDI_CLOCK_DIVISOR as usize);
    }

    #[test]
    fn test_inactive_source_ticks_ignored() {
        let (clock, _timer) = clock_with_timer();
        clock.slave_configure(ClockSource::External, 1, true);
        clock.slave_configure(ClockSource::Midi, MIDI_CLOCK_DIVISOR, true);

        let handle = clock.handle();
        handle.slave_start(ClockSource::External);
        drain_events(&clock);

        // The MIDI source didn't claim the transport; its ticks are dropped.
        handle.slave_tick(ClockSource::Midi);
        assert_eq!(drain_ticks(&clock), Vec::<u32>::new());

        handle.slave_tick(ClockSource::External);
        assert_eq!(drain_ticks(&clock), vec![0]);
    }

    #[test]
    fn test_listener_midi_clock_stream() {
        let (clock, timer) = clock_with_timer();
        let bytes = Arc::new(Mutex::new(Vec::new()));
        {
            let bytes = bytes.clone();
            clock.set_listener(Some(ClockListener {
                on_output: Box::new(|_| {}),
                on_midi: Box::new(move |byte| bytes.lock().unwrap().push(byte)),
            }));
        }

        clock.master_start();
        timer.fire(MIDI_CLOCK_DIVISOR * 2);
        clock.master_stop();

        let bytes = bytes.lock().unwrap();
        assert_eq!(bytes[0], 0xfa);
        assert_eq!(*bytes.last().unwrap(), 0xfc);
        let clocks = bytes.iter().filter(|&&b| b == 0xf8).count();
        assert_eq!(clocks, 2);
    }

    #[test]
    fn test_output_state_pulses() {
        let (clock, timer) = clock_with_timer();
        let changes = Arc::new(AtomicUsize::new(0));
        {
            let changes = changes.clone();
            clock.set_listener(Some(ClockListener {
                on_output: Box::new(move |_| {
                    changes.fetch_add(1, Ordering::Relaxed);
                }),
                on_midi: Box::new(|_| {}),
            }));
        }
        clock.output_configure(PPQN / 4, 1);

        clock.master_start();
        timer.fire(1);
        let state = clock.output_state();
        assert!(state.clock, "first divisor tick should pulse high");
        assert!(state.run);
        assert!(!state.reset);

        // Pulse width at 120 bpm / 1ms is ~3 ticks; well before the next
        // divisor boundary the pulse must drop.
        timer.fire(PPQN / 8);
        assert!(!clock.output_state().clock);
        assert!(changes.load(Ordering::Relaxed) >= 2);

        clock.master_reset();
        let state = clock.output_state();
        assert!(state.reset);
        assert!(!state.run);
    }
}
