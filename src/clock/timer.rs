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
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use tracing::info;

/// The callback a clock timer fires once per period. Runs on the timer's own
/// execution context, which stands in for the hardware timer interrupt.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// A periodic timer driving the master clock.
pub trait ClockTimer: Send + Sync {
    /// Sets the timer period in microseconds. Takes effect on the next tick.
    fn set_period_us(&self, period_us: u32);

    /// Starts firing the handler.
    fn start(&self);

    /// Stops firing the handler.
    fn stop(&self);

    /// Installs the tick handler.
    fn set_handler(&self, handler: Option<TimerHandler>);
}

/// A manually fired timer for tests and externally paced hosts.
pub struct MockTimer {
    period_us: AtomicU32,
    started: AtomicBool,
    handler: RwLock<Option<TimerHandler>>,
}

impl MockTimer {
    pub fn new() -> MockTimer {
        MockTimer {
            period_us: AtomicU32::new(0),
            started: AtomicBool::new(false),
            handler: RwLock::new(None),
        }
    }

    /// Fires the handler the given number of times, if the timer is started.
    pub fn fire(&self, count: u32) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        for _ in 0..count {
            let handler = self.handler.read();
            if let Some(handler) = handler.as_ref() {
                handler();
            }
        }
    }

    /// The currently configured period.
    pub fn period_us(&self) -> u32 {
        self.period_us.load(Ordering::Relaxed)
    }

    /// Whether the timer is currently running.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockTimer for MockTimer {
    fn set_period_us(&self, period_us: u32) {
        self.period_us.store(period_us, Ordering::Relaxed);
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    fn set_handler(&self, handler: Option<TimerHandler>) {
        *self.handler.write() = handler;
    }
}

/// A timer backed by a spin-sleeping thread. Keeps an absolute deadline so
/// that handler execution time does not accumulate as drift.
pub struct ThreadTimer {
    period_us: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    handler: Arc<RwLock<Option<TimerHandler>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadTimer {
    pub fn new(period_us: u32) -> ThreadTimer {
        ThreadTimer {
            period_us: Arc::new(AtomicU32::new(period_us)),
            running: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(RwLock::new(None)),
            join: Mutex::new(None),
        }
    }
}

impl ClockTimer for ThreadTimer {
    fn set_period_us(&self, period_us: u32) {
        self.period_us.store(period_us.max(1), Ordering::Relaxed);
    }

    fn start(&self) {
        let mut join = self.join.lock();
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let period_us = self.period_us.clone();
        let running = self.running.clone();
        let handler = self.handler.clone();

        *join = Some(thread::spawn(move || {
            info!("Clock timer thread started.");
            let sleeper = spin_sleep::SpinSleeper::default();
            let mut deadline = Instant::now();
            while running.load(Ordering::Acquire) {
                deadline += Duration::from_micros(period_us.load(Ordering::Relaxed) as u64);
                let now = Instant::now();
                if deadline > now {
                    sleeper.sleep(deadline - now);
                } else {
                    // Fell behind; re-anchor instead of bursting to catch up.
                    deadline = now;
                }

                let handler = handler.read();
                if let Some(handler) = handler.as_ref() {
                    handler();
                }
            }
            info!("Clock timer thread stopped.");
        }));
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let join = self.join.lock().take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }

    fn set_handler(&self, handler: Option<TimerHandler>) {
        *self.handler.write() = handler;
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_mock_timer_fires_only_when_started() {
        let timer = MockTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            timer.set_handler(Some(Arc::new(move || {
                fired.fetch_add(1, Ordering::Relaxed);
            })));
        }

        timer.fire(4);
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        timer.start();
        timer.fire(4);
        assert_eq!(fired.load(Ordering::Relaxed), 4);

        timer.stop();
        timer.fire(4);
        assert_eq!(fired.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_thread_timer_fires() {
        let timer = ThreadTimer::new(500);
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            timer.set_handler(Some(Arc::new(move || {
                fired.fetch_add(1, Ordering::Relaxed);
            })));
        }

        timer.start();
        crate::testutil::eventually(
            || fired.load(Ordering::Relaxed) >= 3,
            "timer never fired three times",
        );
        timer.stop();
    }
}
