//! Credential Keyring: storage, listing, and selection of upstream API keys.
//!
//! Selection (§4.2) filters by vendor, then by tag overlap with fallback to
//! untagged credentials, then round-robins within the survivors using a
//! counter keyed per `(vendor, tag-bucket)` — the Open Question resolution
//! recorded in DESIGN.md.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

use crate::crypto::{self, Secret};
use crate::store::{self, ProviderCredential};

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("no credential available for vendor {0}")]
    NoKeyAvailable(String),
}

pub struct SelectedCredential {
    pub id: String,
    pub vendor: String,
    pub api_type: String,
    pub base_url: Option<String>,
    pub secret: Secret,
    pub metadata: Value,
}

static CURSORS: Lazy<Mutex<HashMap<String, AtomicU64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn tag_bucket(tags: &[String]) -> String {
    if tags.is_empty() {
        return "__untagged__".to_string();
    }
    let mut sorted = tags.to_vec();
    sorted.sort();
    sorted.join(",")
}

fn next_cursor(key: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let mut cursors = CURSORS.lock().unwrap();
    let counter = cursors.entry(key.to_string()).or_insert_with(|| AtomicU64::new(0));
    (counter.fetch_add(1, Ordering::Relaxed) as usize) % len
}

/// `listByVendorAndTag(vendor, tag?)`: all non-deleted credentials for a
/// vendor, optionally filtered to those carrying `tag`.
pub fn list_by_vendor_and_tag(vendor: &str, tag: Option<&str>) -> Vec<ProviderCredential> {
    let all = store::list_credentials_by_vendor(vendor);
    match tag {
        Some(tag) => all
            .into_iter()
            .filter(|c| c.tags.iter().any(|t| t == tag))
            .collect(),
        None => all,
    }
}

/// `selectForBot(vendor, botTags) -> Credential | null`.
pub fn select_for_bot(vendor: &str, bot_tags: &[String]) -> Result<SelectedCredential, KeyringError> {
    let by_vendor = store::list_credentials_by_vendor(vendor);
    if by_vendor.is_empty() {
        return Err(KeyringError::NoKeyAvailable(vendor.to_string()));
    }

    let tagged: Vec<&ProviderCredential> = if bot_tags.is_empty() {
        Vec::new()
    } else {
        by_vendor
            .iter()
            .filter(|c| c.tags.iter().any(|t| bot_tags.contains(t)))
            .collect()
    };

    let survivors: Vec<&ProviderCredential> = if !tagged.is_empty() {
        tagged
    } else {
        by_vendor.iter().filter(|c| c.tags.is_empty()).collect()
    };

    let survivors: Vec<&ProviderCredential> = if survivors.is_empty() {
        by_vendor.iter().collect()
    } else {
        survivors
    };

    let bucket = if bot_tags.is_empty() {
        "__untagged__".to_string()
    } else {
        tag_bucket(bot_tags)
    };
    let cursor_key = format!("{vendor}:{bucket}");
    let idx = next_cursor(&cursor_key, survivors.len());
    let chosen = survivors[idx];

    let secret = crypto::decrypt(&chosen.secret_ciphertext)
        .map_err(|_| KeyringError::NoKeyAvailable(vendor.to_string()))?;

    Ok(SelectedCredential {
        id: chosen.id.clone(),
        vendor: chosen.vendor.clone(),
        api_type: chosen.api_type.clone(),
        base_url: chosen.base_url.clone(),
        secret,
        metadata: chosen.metadata.clone(),
    })
}

pub fn create(
    vendor: &str,
    api_type: &str,
    base_url: Option<&str>,
    plaintext_secret: &str,
    tags: &[String],
    metadata: &Value,
    vendor_priority: i64,
) -> ProviderCredential {
    let id = uuid::Uuid::new_v4().to_string();
    let ciphertext = crypto::encrypt(plaintext_secret);
    store::create_credential(
        &id,
        vendor,
        api_type,
        base_url,
        &ciphertext,
        tags,
        metadata,
        vendor_priority,
    )
}

pub fn list_all() -> Vec<ProviderCredential> {
    store::list_all_credentials()
}

pub fn delete(id: &str) -> Result<(), String> {
    store::soft_delete_credential(id)
}

/// Health for the admin surface: a credential joined with its circuit
/// breaker and model-availability state.
pub fn health(id: &str) -> Option<serde_json::Value> {
    let cred = store::get_credential(id)?;
    let breaker = crate::breaker::status(&cred.id);
    Some(serde_json::json!({
        "id": cred.id,
        "vendor": cred.vendor,
        "apiType": cred.api_type,
        "breaker": breaker,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    fn ensure_env() {
        if std::env::var("BOT_MASTER_KEY").is_err() {
            std::env::set_var("BOT_MASTER_KEY", URL_SAFE_NO_PAD.encode([0x22u8; 32]));
        }
        let _ = crypto::init_master_key();
        let dir = std::env::temp_dir().join(format!("fleet-gateway-keyring-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
    }

    #[test]
    fn untagged_fallback_when_no_tag_overlap() {
        ensure_env();
        create("openai", "openai", None, "sk-a", &[], &serde_json::json!({}), 0);
        let selected = select_for_bot("openai", &["vision".to_string()]).unwrap();
        assert_eq!(selected.vendor, "openai");
    }

    #[test]
    fn missing_vendor_errors() {
        ensure_env();
        let err = select_for_bot("nonexistent-vendor", &[]);
        assert!(err.is_err());
    }

    #[test]
    fn round_robin_cursor_distributes_across_survivors() {
        ensure_env();
        create("gemini", "gemini", None, "key-1", &[], &serde_json::json!({}), 0);
        create("gemini", "gemini", None, "key-2", &[], &serde_json::json!({}), 0);
        let first = select_for_bot("gemini", &[]).unwrap();
        let second = select_for_bot("gemini", &[]).unwrap();
        assert_ne!(first.id, second.id);
    }
}
