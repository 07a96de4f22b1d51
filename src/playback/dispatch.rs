//! Worker threads that perform device calls for the executor
//!
//! Jobs for the same device always land on the same worker, so a light sees
//! its commands in timeline order. Every job carries the epoch it was
//! submitted in; results from an older epoch are dropped.

use crate::device::DeviceApi;
use crate::model::ServiceCall;
use crate::playback::observer::{PlaybackEvent, PlaybackObserver};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Counters for commands handed to the workers
///
/// The average covers successful calls only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub average_latency_ms: f64,
}

impl DispatchStats {
    fn record(&mut self, latency_ms: f64, ok: bool) {
        self.executing = self.executing.saturating_sub(1);
        if ok {
            self.completed += 1;
            let n = self.completed as f64;
            self.average_latency_ms += (latency_ms - self.average_latency_ms) / n;
        } else {
            self.failed += 1;
        }
    }
}

struct Job {
    epoch: u64,
    device_id: String,
    timestamp: f64,
    call: ServiceCall,
    observer: Arc<dyn PlaybackObserver>,
}

/// Current epoch and its counters; always updated together
#[derive(Default)]
struct Ledger {
    epoch: u64,
    stats: DispatchStats,
}

struct DispatchState {
    ledger: Mutex<Ledger>,
}

impl DispatchState {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.ledger().epoch == epoch
    }

    /// Count a finished call unless its epoch has passed
    fn record(&self, epoch: u64, latency_ms: f64, ok: bool) -> bool {
        let mut ledger = self.ledger();
        if ledger.epoch != epoch {
            return false;
        }
        ledger.stats.record(latency_ms, ok);
        true
    }

    fn advance_epoch(&self, clear: bool) {
        let mut ledger = self.ledger();
        ledger.epoch += 1;
        if clear {
            ledger.stats = DispatchStats::default();
        } else {
            ledger.stats.executing = 0;
        }
    }
}

pub struct Dispatcher {
    senders: Vec<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<DispatchState>,
}

impl Dispatcher {
    /// Spawn `workers` threads (at least one)
    pub fn new(api: Arc<dyn DeviceApi>, workers: usize) -> Self {
        let state = Arc::new(DispatchState {
            ledger: Mutex::new(Ledger::default()),
        });

        let mut senders = Vec::new();
        let mut handles = Vec::new();
        for n in 0..workers.max(1) {
            let (tx, rx) = unbounded::<Job>();
            let api = api.clone();
            let state = state.clone();
            let spawned = thread::Builder::new()
                .name(format!("light-sync-dispatch-{}", n))
                .spawn(move || run_worker(rx, api, state));
            match spawned {
                Ok(handle) => {
                    senders.push(tx);
                    handles.push(handle);
                }
                Err(e) => log::error!("Failed to spawn dispatch worker {}: {}", n, e),
            }
        }

        Self {
            senders,
            workers: handles,
            state,
        }
    }

    /// Hand a device call to its worker
    pub fn submit(
        &self,
        device_id: &str,
        timestamp: f64,
        call: ServiceCall,
        observer: Arc<dyn PlaybackObserver>,
    ) {
        let epoch = {
            let mut ledger = self.state.ledger();
            ledger.stats.executing += 1;
            ledger.epoch
        };

        let job = Job {
            epoch,
            device_id: device_id.to_string(),
            timestamp,
            call,
            observer,
        };

        let sent = match self.worker_for(device_id) {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            log::warn!("No dispatch worker available for {}", device_id);
            self.state.record(epoch, 0.0, false);
        }
    }

    fn worker_for(&self, device_id: &str) -> Option<&Sender<Job>> {
        if self.senders.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        device_id.hash(&mut hasher);
        let slot = (hasher.finish() % self.senders.len() as u64) as usize;
        self.senders.get(slot)
    }

    pub fn stats(&self) -> DispatchStats {
        self.state.ledger().stats
    }

    /// Start a new run with empty statistics
    pub fn reset(&self) {
        self.state.advance_epoch(true);
    }

    /// Forget in-flight jobs; their results will not be counted
    pub fn discard_in_flight(&self) {
        self.state.advance_epoch(false);
    }

    /// Block until nothing is executing or `timeout` passes; returns whether idle
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.ledger().stats.executing == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.state.advance_epoch(false);
        self.senders.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_worker(rx: Receiver<Job>, api: Arc<dyn DeviceApi>, state: Arc<DispatchState>) {
    for job in rx {
        if !state.is_current(job.epoch) {
            continue;
        }

        let started = Instant::now();
        let result = api.call_service(&job.call);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !state.is_current(job.epoch) {
            log::debug!("Dropping late result for {}", job.device_id);
            continue;
        }
        let ok = result.is_ok();
        if let Err(e) = result {
            job.observer.on_event(&PlaybackEvent::CommandFailed {
                device_id: job.device_id.clone(),
                timestamp: job.timestamp,
                error: e.to_string(),
            });
        }
        if !state.record(job.epoch, latency_ms, ok) {
            log::debug!("Dropping late result for {}", job.device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDeviceApi;
    use crate::error::DeviceError;
    use crate::model::{EntityState, LightAttributes};
    use crate::playback::observer::RecordingObserver;

    fn light(id: &str) -> EntityState {
        EntityState {
            entity_id: id.to_string(),
            state: "off".to_string(),
            attributes: LightAttributes::default(),
        }
    }

    #[test]
    fn test_stats_running_average() {
        let mut stats = DispatchStats {
            executing: 3,
            ..Default::default()
        };
        stats.record(10.0, true);
        stats.record(20.0, false);
        stats.record(30.0, true);
        assert_eq!(stats.executing, 0);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.average_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_completed_and_failed_calls() {
        let api = Arc::new(
            SimulatedDeviceApi::new(vec![light("light.a"), light("light.b")])
                .with_failing("light.b"),
        );
        let observer = Arc::new(RecordingObserver::new());
        let dispatcher = Dispatcher::new(api.clone(), 2);

        for i in 0..5 {
            dispatcher.submit(
                "light.a",
                i as f64,
                ServiceCall::new("light", "turn_on", "light.a"),
                observer.clone(),
            );
        }
        dispatcher.submit(
            "light.b",
            0.5,
            ServiceCall::new("light", "turn_on", "light.b"),
            observer.clone(),
        );

        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        let stats = dispatcher.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 1);

        let failures: Vec<_> = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, PlaybackEvent::CommandFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_per_device_order() {
        let api = Arc::new(SimulatedDeviceApi::new(vec![light("light.a")]));
        let dispatcher = Dispatcher::new(api.clone(), 4);
        let observer: Arc<dyn PlaybackObserver> = Arc::new(RecordingObserver::new());

        for level in 1..=50u8 {
            let call = ServiceCall::new("light", "turn_on", "light.a")
                .with("brightness", serde_json::json!(level));
            dispatcher.submit("light.a", level as f64, call, observer.clone());
        }
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        let levels: Vec<u64> = api
            .calls()
            .iter()
            .filter_map(|c| c.data.get("brightness").and_then(|b| b.as_u64()))
            .collect();
        assert_eq!(levels, (1..=50).collect::<Vec<u64>>());
    }

    #[test]
    fn test_reset_clears_stats() {
        let api = Arc::new(SimulatedDeviceApi::new(vec![light("light.a")]));
        let dispatcher = Dispatcher::new(api, 1);
        let observer: Arc<dyn PlaybackObserver> = Arc::new(RecordingObserver::new());
        dispatcher.submit(
            "light.a",
            0.0,
            ServiceCall::new("light", "turn_on", "light.a"),
            observer,
        );
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(dispatcher.stats().completed, 1);

        dispatcher.reset();
        assert_eq!(dispatcher.stats(), DispatchStats::default());
    }

    /// Blocks every call until the test releases it
    struct GatedApi {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl DeviceApi for GatedApi {
        fn get_state(&self, _entity_id: &str) -> Result<Option<EntityState>, DeviceError> {
            Ok(None)
        }

        fn call_service(&self, _call: &ServiceCall) -> Result<(), DeviceError> {
            let _ = self.started.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
            Ok(())
        }

        fn list_states(&self) -> Result<Vec<EntityState>, DeviceError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_result_after_reset_is_not_counted() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let api = Arc::new(GatedApi {
            started: started_tx,
            release: release_rx,
        });
        let dispatcher = Dispatcher::new(api, 1);
        let observer: Arc<dyn PlaybackObserver> = Arc::new(RecordingObserver::new());

        dispatcher.submit(
            "light.a",
            0.0,
            ServiceCall::new("light", "turn_on", "light.a"),
            observer.clone(),
        );
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // the call is on the wire when the run is reset
        dispatcher.reset();
        release_tx.send(()).unwrap();

        dispatcher.submit(
            "light.a",
            1.0,
            ServiceCall::new("light", "turn_on", "light.a"),
            observer,
        );
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        let stats = dispatcher.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.executing, 0);
    }
}
