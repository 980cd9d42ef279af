//! Round driver.
//!
//! Walks the registered subrounds in order. A subround id of `-1` means the
//! current round is over; the next step refreshes the round handler and,
//! once its index has moved, opens the new round from the first subround.

use crate::consensus_state::ConsensusState;
use crate::subround::Subround;
use parking_lot::{Mutex, RwLock};
use spos_core::RoundHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Id meaning "no subround running".
pub const ROUND_FINISHED: i32 = -1;

/// Pause between two steps of the round loop.
const STEP_INTERVAL: Duration = Duration::from_millis(1);

/// Called with the new round index each time a round is opened.
pub type RoundRolloverFn = Arc<dyn Fn(i64) + Send + Sync>;

pub struct Chronology {
    genesis: Instant,
    round_handler: Arc<dyn RoundHandler>,
    consensus_state: Arc<ConsensusState>,
    subrounds: RwLock<Vec<Arc<Subround>>>,
    rollover_hooks: RwLock<Vec<RoundRolloverFn>>,
    subround_id: Mutex<i32>,
    /// Index of the last round opened, `None` before the first one.
    opened_round: Mutex<Option<i64>>,
}

impl Chronology {
    pub fn new(
        genesis: Instant,
        round_handler: Arc<dyn RoundHandler>,
        consensus_state: Arc<ConsensusState>,
    ) -> Self {
        Self {
            genesis,
            round_handler,
            consensus_state,
            subrounds: RwLock::new(Vec::new()),
            rollover_hooks: RwLock::new(Vec::new()),
            subround_id: Mutex::new(ROUND_FINISHED),
            opened_round: Mutex::new(None),
        }
    }

    pub fn add_subround(&self, subround: Arc<Subround>) {
        self.subrounds.write().push(subround);
    }

    pub fn remove_all_subrounds(&self) {
        self.subrounds.write().clear();
    }

    pub fn subround_count(&self) -> usize {
        self.subrounds.read().len()
    }

    /// Register a hook run after the consensus state is reset for a new
    /// round, e.g. [`crate::Worker::round_rollover_fn`].
    pub fn add_round_rollover_hook(&self, hook: RoundRolloverFn) {
        self.rollover_hooks.write().push(hook);
    }

    pub fn subround_id(&self) -> i32 {
        *self.subround_id.lock()
    }

    pub fn set_subround_id(&self, id: i32) {
        *self.subround_id.lock() = id;
    }

    /// Run rounds until `shutdown` flips to true or its sender is dropped.
    pub async fn start_rounds(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Chronology stopped");
                        return;
                    }
                }
                _ = tokio::time::sleep(STEP_INTERVAL) => {
                    self.start_round().await;
                }
            }
        }
    }

    /// Advance by one step: either open a new round or run the current
    /// subround.
    ///
    /// A subround that times out still hands over to its successor; the
    /// round only ends after the last registered subround.
    pub async fn start_round(&self) {
        let id = self.subround_id();
        if id == ROUND_FINISHED {
            self.update_round();
            if self.round_moved() {
                self.init_round();
            }
            return;
        }

        let Some(subround) = self.load_subround_handler(id) else {
            self.set_subround_id(ROUND_FINISHED);
            return;
        };

        debug!(
            round = self.round_handler.index(),
            subround = subround.name(),
            "SUBROUND BEGINS"
        );

        if !subround.do_work().await {
            debug!(
                round = self.round_handler.index(),
                subround = subround.name(),
                next = subround.next(),
                "Subround did not complete, moving on"
            );
        }

        // The round may have been restarted while the subround was working.
        if self.subround_id() != id {
            return;
        }
        let next = subround.next();
        if self.load_subround_handler(next).is_some() {
            self.set_subround_id(next);
        } else {
            debug!(round = self.round_handler.index(), "ROUND ENDS");
            self.set_subround_id(ROUND_FINISHED);
        }
    }

    fn update_round(&self) {
        let old_index = self.round_handler.index();
        self.round_handler.update_round(self.genesis, Instant::now());
        let index = self.round_handler.index();
        if index != old_index {
            info!(round = index, "ROUND BEGINS");
        }
    }

    fn round_moved(&self) -> bool {
        *self.opened_round.lock() != Some(self.round_handler.index())
    }

    fn init_round(&self) {
        self.set_subround_id(ROUND_FINISHED);
        if self.round_handler.before_genesis() {
            return;
        }

        let index = self.round_handler.index();
        *self.opened_round.lock() = Some(index);
        self.consensus_state.set_round_index(index);
        self.consensus_state.reset_consensus_state();

        let hooks = self.rollover_hooks.read().clone();
        for hook in hooks {
            hook(index);
        }

        let first = self.subrounds.read().first().map(|sr| sr.current().as_i32());
        if let Some(first) = first {
            self.set_subround_id(first);
        }
    }

    fn load_subround_handler(&self, id: i32) -> Option<Arc<Subround>> {
        self.subrounds
            .read()
            .iter()
            .find(|sr| sr.current().as_i32() == id)
            .cloned()
    }
}
