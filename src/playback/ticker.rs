//! Periodic tick sources

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Callback invoked on every tick
pub type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Drives the executor's tick
///
/// `stop` may be called from inside the tick callback.
pub trait Ticker: Send + Sync {
    fn start(&self, interval: Duration, tick: TickFn);
    fn stop(&self);
    fn is_running(&self) -> bool;
}

struct Running {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

/// Ticks from a dedicated thread
#[derive(Default)]
pub struct ThreadTicker {
    running: Mutex<Option<Running>>,
}

impl ThreadTicker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ticker for ThreadTicker {
    fn start(&self, interval: Duration, tick: TickFn) {
        self.stop();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("light-sync-tick".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match handle {
            Ok(handle) => {
                let thread = handle.thread().id();
                if let Ok(mut slot) = self.running.lock() {
                    *slot = Some(Running {
                        stop_tx,
                        handle,
                        thread,
                    });
                }
            }
            Err(e) => log::error!("Failed to spawn tick thread: {}", e),
        }
    }

    fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(running) = running {
            let _ = running.stop_tx.try_send(());
            drop(running.stop_tx);
            // a tick that stops playback runs on the tick thread itself
            if running.thread != thread::current().id() {
                let _ = running.handle.join();
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ticks only when the host calls [`ManualTicker::fire`]
#[derive(Default)]
pub struct ManualTicker {
    running: AtomicBool,
    callback: Mutex<Option<TickFn>>,
    fired: AtomicUsize,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick if started; returns whether it ran
    pub fn fire(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let callback = self.callback.lock().ok().and_then(|c| c.clone());
        match callback {
            Some(tick) => {
                tick();
                self.fired.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Ticker for ManualTicker {
    fn start(&self, _interval: Duration, tick: TickFn) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(tick);
        }
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
