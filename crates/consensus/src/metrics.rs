//! Consensus metrics.
//!
//! Collectors are registered on a registry handed in by the caller; nothing
//! here touches the process-wide default registry.

use crate::ConsensusError;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use spos_messages::MessageKind;
use std::time::Duration;

/// Domain-specific metrics of the consensus runtime.
#[derive(Clone)]
pub struct ConsensusMetrics {
    /// Time from round start until the proposed block arrived.
    pub received_proposed_block_delay: Histogram,
    /// Rejected inbound messages by reason.
    pub rejected_messages: IntCounterVec,
    /// Accepted inbound messages by kind.
    pub processed_messages: IntCounterVec,
    /// Failover broadcasts performed by this node.
    pub delayed_broadcasts_fired: IntCounter,
}

impl ConsensusMetrics {
    /// Create the collectors and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, ConsensusError> {
        // Block delay buckets: 10ms to 10s
        let delay_buckets = vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0];

        let metrics = Self {
            received_proposed_block_delay: Histogram::with_opts(
                HistogramOpts::new(
                    "spos_received_proposed_block_delay_seconds",
                    "Delay between round start and receiving the proposed block",
                )
                .buckets(delay_buckets),
            )?,
            rejected_messages: IntCounterVec::new(
                Opts::new(
                    "spos_rejected_messages_total",
                    "Consensus messages rejected by the worker",
                ),
                &["reason"],
            )?,
            processed_messages: IntCounterVec::new(
                Opts::new(
                    "spos_processed_messages_total",
                    "Consensus messages accepted by the worker",
                ),
                &["kind"],
            )?,
            delayed_broadcasts_fired: IntCounter::new(
                "spos_delayed_broadcasts_fired_total",
                "Failover broadcasts performed after a leader stayed silent",
            )?,
        };

        registry.register(Box::new(metrics.received_proposed_block_delay.clone()))?;
        registry.register(Box::new(metrics.rejected_messages.clone()))?;
        registry.register(Box::new(metrics.processed_messages.clone()))?;
        registry.register(Box::new(metrics.delayed_broadcasts_fired.clone()))?;

        Ok(metrics)
    }

    pub fn record_rejected(&self, error: &ConsensusError) {
        self.rejected_messages
            .with_label_values(&[error.reason()])
            .inc();
    }

    pub fn record_processed(&self, kind: MessageKind) {
        self.processed_messages
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn observe_proposed_block_delay(&self, delay: Duration) {
        self.received_proposed_block_delay
            .observe(delay.as_secs_f64());
    }
}
