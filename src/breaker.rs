//! Circuit Breaker: per-credential closed/half-open/open state tracking.
//!
//! Backed by a `DashMap` sharded by credential id instead of one global
//! mutex, per the Design Notes — contention stays local to whichever
//! credential is actually being hammered.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

const FAILURE_THRESHOLD: u32 = 5;
const COOL_DOWN_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialBreaker {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<i64>,
    pub last_error: Option<String>,
}

impl Default for CredentialBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_error: None,
        }
    }
}

static BREAKERS: Lazy<DashMap<String, CredentialBreaker>> = Lazy::new(DashMap::new);

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Lazily promotes an `open` breaker to `half-open` once the cool-down has
/// elapsed, then reports availability.
pub fn is_available(credential_id: &str) -> bool {
    let mut entry = BREAKERS.entry(credential_id.to_string()).or_default();
    if entry.state == BreakerState::Open {
        let opened_at = entry.opened_at.unwrap_or(0);
        if now() - opened_at >= COOL_DOWN_SECS {
            entry.state = BreakerState::HalfOpen;
        }
    }
    entry.state != BreakerState::Open
}

/// Streaming responses that already received a 2xx header count as success
/// even if the body aborts mid-stream — the client observed progress.
pub fn record_success(credential_id: &str) {
    let mut entry = BREAKERS.entry(credential_id.to_string()).or_default();
    entry.consecutive_failures = 0;
    entry.state = BreakerState::Closed;
    entry.opened_at = None;
    entry.last_error = None;
}

pub fn record_failure(credential_id: &str, err_msg: &str) {
    let mut entry = BREAKERS.entry(credential_id.to_string()).or_default();
    entry.last_error = Some(err_msg.to_string());

    match entry.state {
        BreakerState::HalfOpen => {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now());
            entry.consecutive_failures += 1;
        }
        BreakerState::Closed => {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= FAILURE_THRESHOLD {
                entry.state = BreakerState::Open;
                entry.opened_at = Some(now());
            }
        }
        BreakerState::Open => {
            entry.consecutive_failures += 1;
        }
    }
}

pub fn status(credential_id: &str) -> Option<CredentialBreaker> {
    BREAKERS.get(credential_id).map(|entry| entry.clone())
}

pub fn reset(credential_id: &str) {
    BREAKERS.insert(credential_id.to_string(), CredentialBreaker::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let id = format!("cred-{}", uuid::Uuid::new_v4());
        for _ in 0..FAILURE_THRESHOLD {
            record_failure(&id, "boom");
        }
        assert!(!is_available(&id));
        assert_eq!(status(&id).unwrap().state, BreakerState::Open);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let id = format!("cred-{}", uuid::Uuid::new_v4());
        record_failure(&id, "boom");
        record_failure(&id, "boom");
        record_success(&id);
        assert_eq!(status(&id).unwrap().consecutive_failures, 0);
        assert!(is_available(&id));
    }

    #[test]
    fn half_open_failure_reopens() {
        let id = format!("cred-{}", uuid::Uuid::new_v4());
        for _ in 0..FAILURE_THRESHOLD {
            record_failure(&id, "boom");
        }
        {
            let mut entry = BREAKERS.get_mut(&id).unwrap();
            entry.state = BreakerState::HalfOpen;
        }
        record_failure(&id, "probe failed");
        assert_eq!(status(&id).unwrap().state, BreakerState::Open);
    }
}
