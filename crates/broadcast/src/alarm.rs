//! Tokio-backed alarm scheduler.
//!
//! Each alarm is a tokio task that sleeps for its duration and then runs the
//! callback. An alarm removes itself from the table before its callback runs,
//! and only runs the callback if it was still armed, so a cancel racing with
//! expiry either wins outright or is a no-op.

use crate::BroadcastError;
use parking_lot::Mutex;
use spos_core::{AlarmCallback, AlarmScheduler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Alarms {
    armed: HashMap<String, Armed>,
    next_generation: u64,
    closed: bool,
}

/// Alarm scheduler running callbacks on a tokio runtime.
pub struct TokioAlarmScheduler {
    runtime: Handle,
    alarms: Arc<Mutex<Alarms>>,
}

impl TokioAlarmScheduler {
    /// Scheduler bound to the runtime of the calling task.
    pub fn new() -> Result<Self, BroadcastError> {
        let runtime = Handle::try_current().map_err(|_| BroadcastError::NoRuntime)?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            alarms: Arc::new(Mutex::new(Alarms::default())),
        }
    }

    /// Number of alarms armed and not yet fired.
    pub fn active_count(&self) -> usize {
        self.alarms.lock().armed.len()
    }

    pub fn is_armed(&self, alarm_id: &str) -> bool {
        self.alarms.lock().armed.contains_key(alarm_id)
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn add(&self, callback: AlarmCallback, duration: Duration, alarm_id: String) {
        let mut alarms = self.alarms.lock();
        if alarms.closed {
            trace!(alarm_id, "Alarm ignored, scheduler closed");
            return;
        }

        let generation = alarms.next_generation;
        alarms.next_generation += 1;

        let table = self.alarms.clone();
        let id = alarm_id.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            let still_armed = {
                let mut alarms = table.lock();
                match alarms.armed.get(&id) {
                    Some(armed) if armed.generation == generation => {
                        alarms.armed.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if still_armed {
                trace!(alarm_id = %id, "Alarm expired");
                callback(id);
            }
        });

        if let Some(previous) = alarms.armed.insert(alarm_id.clone(), Armed { generation, handle }) {
            previous.handle.abort();
            trace!(alarm_id, "Alarm replaced");
        }
        debug!(alarm_id, ?duration, "Alarm set");
    }

    fn cancel(&self, alarm_id: &str) {
        if let Some(armed) = self.alarms.lock().armed.remove(alarm_id) {
            armed.handle.abort();
            debug!(alarm_id, "Alarm cancelled");
        }
    }

    fn close(&self) {
        let mut alarms = self.alarms.lock();
        alarms.closed = true;
        for (id, armed) in alarms.armed.drain() {
            armed.handle.abort();
            trace!(alarm_id = %id, "Alarm cancelled (shutdown)");
        }
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
