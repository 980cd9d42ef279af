//! Round timing.

use crate::ConsensusError;
use parking_lot::RwLock;
use spos_core::RoundHandler;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct RoundInner {
    index: i64,
    time_stamp: Instant,
    before_genesis: bool,
}

/// Fixed-length rounds counted from a genesis instant.
///
/// Round `start_round` begins at genesis; round `start_round + k` begins
/// `k` round durations later.
#[derive(Debug)]
pub struct Round {
    inner: RwLock<RoundInner>,
    time_duration: Duration,
    start_round: i64,
}

impl Round {
    pub fn new(
        genesis: Instant,
        now: Instant,
        time_duration: Duration,
        start_round: i64,
    ) -> Result<Self, ConsensusError> {
        if time_duration.is_zero() {
            return Err(ConsensusError::InvalidRoundDuration);
        }
        let round = Self {
            inner: RwLock::new(RoundInner {
                index: start_round,
                time_stamp: genesis,
                before_genesis: false,
            }),
            time_duration,
            start_round,
        };
        round.update_round(genesis, now);
        Ok(round)
    }

    fn compute(&self, genesis: Instant, now: Instant) -> RoundInner {
        let duration = self.time_duration.as_nanos();
        if now >= genesis {
            let elapsed = (now - genesis).as_nanos() / duration;
            let offset = Duration::from_nanos((elapsed * duration) as u64);
            return RoundInner {
                index: self.start_round + elapsed as i64,
                time_stamp: genesis + offset,
                before_genesis: false,
            };
        }

        // Rounds before genesis count backwards so the first partial round
        // still ends at genesis.
        let ahead = (genesis - now).as_nanos().div_ceil(duration);
        let offset = Duration::from_nanos((ahead * duration) as u64);
        RoundInner {
            index: self.start_round - ahead as i64,
            time_stamp: genesis.checked_sub(offset).unwrap_or(now),
            before_genesis: true,
        }
    }
}

impl RoundHandler for Round {
    fn index(&self) -> i64 {
        self.inner.read().index
    }

    fn update_round(&self, genesis: Instant, now: Instant) {
        let next = self.compute(genesis, now);
        let mut inner = self.inner.write();
        if inner.index != next.index {
            trace!(from = inner.index, to = next.index, "Round updated");
        }
        *inner = next;
    }

    fn time_stamp(&self) -> Instant {
        self.inner.read().time_stamp
    }

    fn time_duration(&self) -> Duration {
        self.time_duration
    }

    fn remaining_time(&self, start: Instant, max: Duration) -> i64 {
        let deadline = start + max;
        let now = Instant::now();
        if deadline >= now {
            (deadline - now).as_millis() as i64
        } else {
            -((now - deadline).as_millis() as i64)
        }
    }

    fn revert_one_round(&self) {
        let mut inner = self.inner.write();
        inner.index -= 1;
        inner.time_stamp = inner
            .time_stamp
            .checked_sub(self.time_duration)
            .unwrap_or(inner.time_stamp);
    }

    fn before_genesis(&self) -> bool {
        self.inner.read().before_genesis
    }
}
