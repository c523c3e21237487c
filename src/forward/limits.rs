//! Request admission limiting: instance-wide RPM and concurrency caps, plus
//! a per-bot concurrency cap (§4.11 AMBIENT). Sits alongside per-bot budget
//! checks (`quota::check_budget`) as the same category of "is this request
//! allowed to proceed" gate, evaluated before a credential is ever resolved.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Response;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::{config, logger};

use super::error::{ForwardError, ForwardResult};

#[derive(Default)]
struct LimitState {
    rpm_window: VecDeque<Instant>,
    concurrent_total: u32,
    concurrent_by_bot: HashMap<String, u32>,
}

static LIMIT_STATE: Lazy<Arc<Mutex<LimitState>>> =
    Lazy::new(|| Arc::new(Mutex::new(LimitState::default())));

#[derive(Clone)]
pub struct LimitGuard {
    bot_id: Option<String>,
    state: Arc<Mutex<LimitState>>,
}

impl LimitGuard {
    fn new(bot_id: Option<String>) -> Self {
        Self {
            bot_id,
            state: Arc::clone(&LIMIT_STATE),
        }
    }
}

impl Drop for LimitGuard {
    fn drop(&mut self) {
        let bot_id = self.bot_id.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut guard = state.lock().await;
            if guard.concurrent_total > 0 {
                guard.concurrent_total -= 1;
            }
            if let Some(bot_id) = bot_id {
                if let Some(count) = guard.concurrent_by_bot.get_mut(&bot_id) {
                    if *count > 0 {
                        *count -= 1;
                    }
                    if *count == 0 {
                        guard.concurrent_by_bot.remove(&bot_id);
                    }
                }
            }
        });
    }
}

fn clean_rpm_window(window: &mut VecDeque<Instant>) {
    let cutoff = Instant::now() - Duration::from_secs(60);
    while matches!(window.front(), Some(ts) if *ts < cutoff) {
        window.pop_front();
    }
}

/// Checks every configured limit and, if all pass, reserves a concurrency
/// slot. Returns `None` when no limits are configured at all, in which case
/// there is nothing to release later.
pub async fn check_and_acquire(bot_id: Option<String>) -> ForwardResult<Option<LimitGuard>> {
    let limits = config::rate_limit_config();

    let has_limits =
        limits.rpm.is_some() || limits.max_concurrent.is_some() || limits.max_concurrent_per_bot.is_some();
    if !has_limits {
        return Ok(None);
    }

    let bot_key = bot_id.clone().unwrap_or_else(|| "anonymous".to_string());
    let mut state = LIMIT_STATE.lock().await;

    if let Some(rpm) = limits.rpm {
        if rpm == 0 {
            return Err(ForwardError::RateLimited("RPM limit is 0; all requests are blocked".to_string()));
        }
        clean_rpm_window(&mut state.rpm_window);
        if state.rpm_window.len() as u32 >= rpm {
            return Err(ForwardError::RateLimited(format!("RPM limit exceeded: {} per minute", rpm)));
        }
        state.rpm_window.push_back(Instant::now());
    }

    if let Some(max) = limits.max_concurrent {
        if max == 0 {
            return Err(ForwardError::RateLimited("Concurrency limit is 0; all requests are blocked".to_string()));
        }
        if state.concurrent_total + 1 > max {
            return Err(ForwardError::RateLimited(format!("Concurrency limit exceeded: {} in-flight", max)));
        }
    }

    if let Some(max) = limits.max_concurrent_per_bot {
        if max == 0 {
            return Err(ForwardError::RateLimited("Per-bot concurrency limit is 0; all requests are blocked".to_string()));
        }
        let current = state.concurrent_by_bot.get(&bot_key).copied().unwrap_or(0);
        if current + 1 > max {
            return Err(ForwardError::RateLimited(format!("Per-bot concurrency limit exceeded: {} in-flight", max)));
        }
    }

    state.concurrent_total += 1;
    if limits.max_concurrent_per_bot.is_some() {
        *state.concurrent_by_bot.entry(bot_key).or_insert(0) += 1;
    }

    logger::debug(
        "limits",
        &format!("acquired limit guard: total_in_flight={}, bot={:?}", state.concurrent_total, bot_id),
    );

    Ok(Some(LimitGuard::new(bot_id)))
}

pub fn attach_guard(mut response: Response, guard: Option<LimitGuard>) -> Response {
    if let Some(guard) = guard {
        response.extensions_mut().insert(guard);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_rpm_window_drops_entries_older_than_sixty_seconds() {
        let mut window = VecDeque::new();
        window.push_back(Instant::now() - Duration::from_secs(120));
        window.push_back(Instant::now());
        clean_rpm_window(&mut window);
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn no_configured_limits_yields_no_guard() {
        std::env::remove_var("FLEET_GATEWAY_RPM");
        std::env::remove_var("FLEET_GATEWAY_MAX_CONCURRENT");
        std::env::remove_var("FLEET_GATEWAY_MAX_CONCURRENT_PER_BOT");
        let guard = check_and_acquire(Some("bot-x".to_string())).await.unwrap();
        assert!(guard.is_none());
    }

    #[tokio::test]
    async fn zero_rpm_blocks_every_request() {
        std::env::set_var("FLEET_GATEWAY_RPM", "0");
        let result = check_and_acquire(Some("bot-y".to_string())).await;
        assert!(result.is_err());
        std::env::remove_var("FLEET_GATEWAY_RPM");
    }
}
