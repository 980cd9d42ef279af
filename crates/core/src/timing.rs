//! Round timing and delayed callbacks.

use std::time::Duration;
use tokio::time::Instant;

/// Source of round boundaries.
///
/// All instants are monotonic. Phase deadlines are computed from
/// [`RoundHandler::time_stamp`], never from a wall-clock read.
pub trait RoundHandler: Send + Sync {
    /// Current round index.
    fn index(&self) -> i64;

    /// Recompute the round from the genesis instant and `now`.
    fn update_round(&self, genesis: Instant, now: Instant);

    /// Start instant of the current round.
    fn time_stamp(&self) -> Instant;

    /// Duration of one round.
    fn time_duration(&self) -> Duration;

    /// Time left until `start + max`, in milliseconds. Negative once passed.
    fn remaining_time(&self, start: Instant, max: Duration) -> i64;

    /// Step back one round.
    fn revert_one_round(&self);

    /// True while the chain has not started yet.
    fn before_genesis(&self) -> bool;
}

/// Callback run when an alarm fires. Receives the alarm id.
pub type AlarmCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Delayed-callback facility keyed by string ids.
pub trait AlarmScheduler: Send + Sync {
    /// Arm `callback` to run after `duration`. Re-using an id replaces the
    /// pending alarm.
    fn add(&self, callback: AlarmCallback, duration: Duration, alarm_id: String);

    /// Disarm an alarm. Unknown ids are ignored.
    fn cancel(&self, alarm_id: &str);

    /// Disarm everything.
    fn close(&self);
}
