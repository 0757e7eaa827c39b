//! Events emitted by the balancer.
//!
//! Listeners are registered on the config builder and called synchronously
//! from the request path and the recovery loop, so they should be cheap.

use std::time::Instant;
use tower_resilience_core::ResilienceEvent;

/// Something that happened to a balancer or one of its endpoints.
#[derive(Debug, Clone)]
pub enum BalancerEvent {
    /// A request was handed to the executor.
    Dispatched {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
    },
    /// A request was rejected because no endpoint was healthy.
    Rejected {
        pattern_name: String,
        timestamp: Instant,
    },
    /// An endpoint left rotation after an executor error.
    Demoted {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
        healthy_remaining: usize,
    },
    /// An endpoint passed its probe and is back in rotation.
    Promoted {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
        healthy_remaining: usize,
    },
    /// A probe against an unhealthy endpoint failed.
    ProbeFailed {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
        reason: String,
    },
}

impl ResilienceEvent for BalancerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BalancerEvent::Dispatched { .. } => "dispatched",
            BalancerEvent::Rejected { .. } => "rejected",
            BalancerEvent::Demoted { .. } => "demoted",
            BalancerEvent::Promoted { .. } => "promoted",
            BalancerEvent::ProbeFailed { .. } => "probe_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BalancerEvent::Dispatched { timestamp, .. }
            | BalancerEvent::Rejected { timestamp, .. }
            | BalancerEvent::Demoted { timestamp, .. }
            | BalancerEvent::Promoted { timestamp, .. }
            | BalancerEvent::ProbeFailed { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            BalancerEvent::Dispatched { pattern_name, .. }
            | BalancerEvent::Rejected { pattern_name, .. }
            | BalancerEvent::Demoted { pattern_name, .. }
            | BalancerEvent::Promoted { pattern_name, .. }
            | BalancerEvent::ProbeFailed { pattern_name, .. } => pattern_name,
        }
    }
}

impl BalancerEvent {
    /// Address of the endpoint involved, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            BalancerEvent::Dispatched { endpoint, .. }
            | BalancerEvent::Demoted { endpoint, .. }
            | BalancerEvent::Promoted { endpoint, .. }
            | BalancerEvent::ProbeFailed { endpoint, .. } => Some(endpoint),
            BalancerEvent::Rejected { .. } => None,
        }
    }
}
