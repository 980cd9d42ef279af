//! Subround state machine.
//!
//! A round is a fixed sequence of subrounds. Each one runs its job once, then
//! waits until its check passes or the round deadline elapses. The wait is
//! driven by a level-triggered [`Notify`]: a wakeup only means "something
//! changed", so the check is always re-run.

use crate::consensus_state::ConsensusState;
use parking_lot::RwLock;
use spos_core::{NodeRedundancyHandler, RoundHandler};
use spos_messages::SubroundId;
use spos_types::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep_until;
use tracing::{debug, trace};

const SINGLE_KEY_START_MSG: &str = " (my turn)";
const MULTI_KEY_START_MSG: &str = " (my turn in multi-key)";

/// Performs the subround's action. Returns true when something was done.
pub type JobFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Idempotent: is the subround's goal reached.
pub type CheckFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Runs once when the subround timed out, with the id of that subround.
pub type ExtendFn = Arc<dyn Fn(SubroundId) + Send + Sync>;

/// Capabilities a subround needs from the rest of the node.
#[derive(Clone)]
pub struct SubroundContext {
    pub consensus_state: Arc<ConsensusState>,
    pub round_handler: Arc<dyn RoundHandler>,
    pub redundancy: Arc<dyn NodeRedundancyHandler>,
    /// Fired whenever a job-done flag changes.
    pub state_changed: Arc<Notify>,
    /// Replays messages buffered before the subround started.
    pub execute_stored_messages: Arc<dyn Fn() + Send + Sync>,
    pub chain_id: Vec<u8>,
    pub current_pid: PeerId,
    /// Share of the round duration after which a waiting subround gives up.
    pub max_threshold_percent: u32,
}

/// One phase of a round.
pub struct Subround {
    previous: i32,
    current: SubroundId,
    next: i32,
    start_time: Duration,
    end_time: Duration,
    name: String,
    ctx: SubroundContext,

    job: RwLock<Option<JobFn>>,
    check: RwLock<Option<CheckFn>>,
    extend: RwLock<Option<ExtendFn>>,
}

impl Subround {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        previous: i32,
        current: SubroundId,
        next: i32,
        start_time: Duration,
        end_time: Duration,
        name: impl Into<String>,
        ctx: SubroundContext,
    ) -> Self {
        Self {
            previous,
            current,
            next,
            start_time,
            end_time,
            name: name.into(),
            ctx,
            job: RwLock::new(None),
            check: RwLock::new(None),
            extend: RwLock::new(None),
        }
    }

    pub fn set_job(&self, job: JobFn) {
        *self.job.write() = Some(job);
    }

    pub fn set_check(&self, check: CheckFn) {
        *self.check.write() = Some(check);
    }

    pub fn set_extend(&self, extend: ExtendFn) {
        *self.extend.write() = Some(extend);
    }

    /// Run the subround to completion or timeout.
    ///
    /// Returns true when the check passed. On timeout the round is marked
    /// canceled, the extend hook runs once and false is returned.
    pub async fn do_work(&self) -> bool {
        let job = self.job.read().clone();
        let check = self.check.read().clone();
        let (Some(job), Some(check)) = (job, check) else {
            return false;
        };

        let execute = self.ctx.execute_stored_messages.clone();
        tokio::spawn(async move { execute() });

        let round_handler = &self.ctx.round_handler;
        let start = round_handler.time_stamp();
        let max = round_handler.time_duration() * self.ctx.max_threshold_percent / 100;
        let deadline = start + max;

        job();
        if check() {
            return true;
        }

        loop {
            tokio::select! {
                _ = self.ctx.state_changed.notified() => {
                    if check() {
                        return true;
                    }
                    trace!(subround = %self.current, "State changed, check not satisfied");
                }
                _ = sleep_until(deadline) => {
                    let extend = self.extend.read().clone();
                    if let Some(extend) = extend {
                        debug!(
                            subround = %self.current,
                            round = self.ctx.consensus_state.round_index(),
                            "Subround timed out, extending"
                        );
                        self.ctx.consensus_state.set_round_canceled(true);
                        extend(self.current);
                    }
                    return false;
                }
            }
        }
    }

    pub fn previous(&self) -> i32 {
        self.previous
    }

    pub fn current(&self) -> SubroundId {
        self.current
    }

    pub fn next(&self) -> i32 {
        self.next
    }

    /// Start offset within the round.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// End offset within the round.
    pub fn end_time(&self) -> Duration {
        self.end_time
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> &[u8] {
        &self.ctx.chain_id
    }

    pub fn current_pid(&self) -> &PeerId {
        &self.ctx.current_pid
    }

    pub fn consensus_state(&self) -> &Arc<ConsensusState> {
        &self.ctx.consensus_state
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Leadership helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// True unless this is a backup machine whose primary is still active.
    pub fn should_consider_self_key_in_consensus(&self) -> bool {
        let redundancy = &self.ctx.redundancy;
        !redundancy.is_redundancy_node() || !redundancy.is_main_machine_active()
    }

    /// Our own key or any managed key is in the committee.
    pub fn is_self_in_consensus_group(&self) -> bool {
        let committee = self.ctx.consensus_state.committee();
        committee.is_node_in_consensus_group(&committee.self_pub_key())
            || committee.is_multi_key_in_consensus_group()
    }

    /// Our own key or any managed key leads this round.
    pub fn is_self_leader(&self) -> bool {
        self.is_self_leader_in_current_round()
            || self
                .ctx
                .consensus_state
                .is_multi_key_leader_in_current_round()
    }

    /// Our own key leads this round and we are allowed to act on it.
    pub fn is_self_leader_in_current_round(&self) -> bool {
        self.ctx.consensus_state.is_self_leader_in_current_round()
            && self.should_consider_self_key_in_consensus()
    }

    /// Log suffix announcing that this node proposes the block.
    pub fn get_leader_start_round_message(&self) -> &'static str {
        if self
            .ctx
            .consensus_state
            .is_multi_key_leader_in_current_round()
        {
            return MULTI_KEY_START_MSG;
        }
        if self.is_self_leader_in_current_round() {
            return SINGLE_KEY_START_MSG;
        }
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::Round;
    use crate::round_consensus::RoundConsensus;
    use spos_test_helpers::{bls_keypair, StubKeysHandler, StubNodeRedundancy};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    const ROUND: Duration = Duration::from_millis(1000);

    fn context(keys: StubKeysHandler, redundancy: StubNodeRedundancy) -> SubroundContext {
        let rc = RoundConsensus::new(
            HashSet::new(),
            3,
            bls_keypair(0).public_key().to_bytes(),
            Arc::new(keys),
        );
        let now = Instant::now();
        SubroundContext {
            consensus_state: Arc::new(ConsensusState::new(rc)),
            round_handler: Arc::new(Round::new(now, now, ROUND, 0).unwrap()),
            redundancy: Arc::new(redundancy),
            state_changed: Arc::new(Notify::new()),
            execute_stored_messages: Arc::new(|| {}),
            chain_id: b"1".to_vec(),
            current_pid: PeerId::new(b"self".to_vec()),
            max_threshold_percent: 85,
        }
    }

    fn default_context() -> SubroundContext {
        context(
            StubKeysHandler::new(bls_keypair(0)),
            StubNodeRedundancy::default(),
        )
    }

    fn subround(ctx: SubroundContext) -> Subround {
        Subround::new(
            -1,
            SubroundId::StartRound,
            SubroundId::Block.as_i32(),
            Duration::ZERO,
            ROUND / 20,
            "(START_ROUND)",
            ctx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_work_without_job_or_check_fails() {
        let sr = subround(default_context());
        assert!(!sr.do_work().await);

        sr.set_job(Arc::new(|| true));
        assert!(!sr.do_work().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_work_returns_when_check_passes_immediately() {
        let sr = subround(default_context());
        let jobs = Arc::new(AtomicUsize::new(0));
        let counter = jobs.clone();
        sr.set_job(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));
        sr.set_check(Arc::new(|| true));

        assert!(sr.do_work().await);
        assert_eq!(jobs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_work_rechecks_on_state_change() {
        let ctx = default_context();
        let notify = ctx.state_changed.clone();
        let sr = Arc::new(subround(ctx));
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        sr.set_job(Arc::new(|| true));
        sr.set_check(Arc::new(move || flag.load(Ordering::SeqCst)));

        let worker = tokio::spawn({
            let sr = sr.clone();
            async move { sr.do_work().await }
        });

        // A wakeup without progress keeps waiting.
        notify.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!worker.is_finished());

        done.store(true, Ordering::SeqCst);
        notify.notify_one();
        assert!(worker.await.unwrap());
        assert!(!sr.consensus_state().round_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_work_times_out_and_extends() {
        let ctx = default_context();
        let sr = subround(ctx);
        let extended = Arc::new(parking_lot::Mutex::new(None));
        let record = extended.clone();
        sr.set_job(Arc::new(|| true));
        sr.set_check(Arc::new(|| false));
        sr.set_extend(Arc::new(move |id| *record.lock() = Some(id)));

        let started = Instant::now();
        assert!(!sr.do_work().await);
        assert!(started.elapsed() >= Duration::from_millis(850));
        assert_eq!(*extended.lock(), Some(SubroundId::StartRound));
        assert!(sr.consensus_state().round_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_extend_keeps_round() {
        let sr = subround(default_context());
        sr.set_job(Arc::new(|| true));
        sr.set_check(Arc::new(|| false));
        assert!(!sr.do_work().await);
        assert!(!sr.consensus_state().round_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_work_replays_stored_messages() {
        let mut ctx = default_context();
        let replayed = Arc::new(AtomicBool::new(false));
        let flag = replayed.clone();
        ctx.execute_stored_messages = Arc::new(move || flag.store(true, Ordering::SeqCst));
        let sr = subround(ctx);
        sr.set_job(Arc::new(|| true));
        sr.set_check(Arc::new(|| true));

        sr.do_work().await;
        tokio::task::yield_now().await;
        assert!(replayed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_accessors() {
        let sr = subround(default_context());
        assert_eq!(sr.previous(), -1);
        assert_eq!(sr.current(), SubroundId::StartRound);
        assert_eq!(sr.next(), 1);
        assert_eq!(sr.end_time(), Duration::from_millis(50));
        assert_eq!(sr.name(), "(START_ROUND)");
        assert_eq!(sr.chain_id(), b"1");
    }

    #[test]
    fn test_leader_messages() {
        let self_pk = bls_keypair(0).public_key().to_bytes();
        let sr = subround(default_context());
        let committee = sr.consensus_state().committee();
        committee.set_consensus_group(vec![self_pk.clone(), vec![1; 48]]);

        committee.set_leader(vec![1; 48]);
        assert!(sr.is_self_in_consensus_group());
        assert!(!sr.is_self_leader());
        assert_eq!(sr.get_leader_start_round_message(), "");

        committee.set_leader(self_pk);
        assert!(sr.is_self_leader());
        assert_eq!(sr.get_leader_start_round_message(), " (my turn)");
    }

    #[test]
    fn test_multi_key_leader_message_takes_priority() {
        let managed = bls_keypair(4);
        let managed_pk = managed.public_key().to_bytes();
        let keys = StubKeysHandler::new(bls_keypair(0)).with_managed_key(managed);
        let sr = subround(context(keys, StubNodeRedundancy::default()));
        let committee = sr.consensus_state().committee();
        committee.set_consensus_group(vec![vec![7; 48], managed_pk.clone()]);
        committee.set_leader(managed_pk);

        assert!(sr.is_self_in_consensus_group());
        assert!(sr.is_self_leader());
        assert_eq!(
            sr.get_leader_start_round_message(),
            " (my turn in multi-key)"
        );
    }

    #[test]
    fn test_backup_defers_to_active_main_machine() {
        let self_pk = bls_keypair(0).public_key().to_bytes();
        let redundancy = StubNodeRedundancy::default().backup(true);
        let sr = subround(context(StubKeysHandler::new(bls_keypair(0)), redundancy.clone()));
        let committee = sr.consensus_state().committee();
        committee.set_consensus_group(vec![self_pk.clone()]);
        committee.set_leader(self_pk);

        assert!(!sr.should_consider_self_key_in_consensus());
        assert!(!sr.is_self_leader_in_current_round());
        assert_eq!(sr.get_leader_start_round_message(), "");

        redundancy.set_main_machine_active(false);
        assert!(sr.should_consider_self_key_in_consensus());
        assert!(sr.is_self_leader_in_current_round());
    }
}
