//! Bot Token Service: mint/revoke/validate proxy tokens bound to (bot, credential).
//!
//! `validate` honors the zero-trust-vs-direct-mode precedence decided in
//! DESIGN.md: when `ZERO_TRUST_MODE` is set, only `ProxyToken` rows are
//! honored; otherwise a bot's `proxy_token_hash` column is checked as a
//! second, TTL-less lookup path.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::crypto::{self, Secret};
use crate::store;

const DEFAULT_TTL_SECS: i64 = 86_400;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn zero_trust_mode() -> bool {
    matches!(
        std::env::var("ZERO_TRUST_MODE").ok().as_deref(),
        Some("true") | Some("1")
    )
}

fn token_ttl_secs() -> i64 {
    std::env::var("PROXY_TOKEN_TTL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TTL_SECS)
}

#[derive(Debug, Serialize)]
pub struct Registration {
    pub plaintext_token: String,
    pub expires_at: i64,
}

/// `register(botId, vendor, credentialId, tags)`: replaces any prior token.
pub fn register(bot_id: &str, vendor: &str, credential_id: &str, tags: &[String]) -> Registration {
    let plaintext = crypto::mint_token();
    let hash = crypto::hash_token(&plaintext);
    let expires_at = now() + token_ttl_secs();
    store::put_proxy_token(bot_id, &hash, vendor, credential_id, tags, Some(expires_at));
    Registration {
        plaintext_token: plaintext,
        expires_at,
    }
}

pub struct Validation {
    pub bot_id: String,
    pub vendor: String,
    pub credential_id: String,
    pub api_key: Secret,
    pub api_type: String,
    pub base_url: Option<String>,
    pub metadata: Value,
}

static BUMP_SENDER: once_cell::sync::OnceCell<mpsc::Sender<String>> = once_cell::sync::OnceCell::new();

/// Spawns the single consumer that applies best-effort `lastUsedAt`/
/// `requestCount` bumps off the hot validation path.
pub fn spawn_bump_worker() {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    BUMP_SENDER.set(tx).ok();
    tokio::spawn(async move {
        while let Some(bot_id) = rx.recv().await {
            store::bump_token_usage(&bot_id);
        }
    });
}

fn bump_async(bot_id: &str) {
    if let Some(sender) = BUMP_SENDER.get() {
        let _ = sender.try_send(bot_id.to_string());
    } else {
        // Worker not started (e.g. in tests): fall back to a synchronous bump.
        store::bump_token_usage(bot_id);
    }
}

/// `validate(plaintextToken) -> Validation | None`.
pub fn validate(plaintext_token: &str) -> Option<Validation> {
    let hash = crypto::hash_token(plaintext_token);

    if zero_trust_mode() {
        let row = store::find_token_by_hash(&hash)?;
        if row.revoked_at.is_some() {
            return None;
        }
        if let Some(expires_at) = row.expires_at {
            if expires_at <= now() {
                return None;
            }
        }
        let credential = store::get_credential(&row.credential_id)?;
        let secret = crypto::decrypt(&credential.secret_ciphertext).ok()?;
        bump_async(&row.bot_id);
        return Some(Validation {
            bot_id: row.bot_id,
            vendor: row.vendor,
            credential_id: row.credential_id,
            api_key: secret,
            api_type: credential.api_type,
            base_url: credential.base_url,
            metadata: credential.metadata,
        });
    }

    let bot = store::find_bot_by_direct_token_hash(&hash)?;
    // Direct mode has no stored vendor/credential binding on the bot row
    // itself; resolve a credential for the bot's declared tags against the
    // first vendor that has one. Operators wire a single-vendor bot in
    // direct mode by tagging accordingly.
    let all = store::list_all_credentials();
    let vendor = all.iter().find(|c| {
        bot.tags.is_empty() || c.tags.iter().any(|t| bot.tags.contains(t))
    })?;
    let secret = crypto::decrypt(&vendor.secret_ciphertext).ok()?;
    Some(Validation {
        bot_id: bot.id,
        vendor: vendor.vendor.clone(),
        credential_id: vendor.id.clone(),
        api_key: secret,
        api_type: vendor.api_type.clone(),
        base_url: vendor.base_url.clone(),
        metadata: vendor.metadata.clone(),
    })
}

pub fn revoke(bot_id: &str) {
    store::revoke_token(bot_id);
}

pub fn delete_for_bot(bot_id: &str) {
    store::delete_token_for_bot(bot_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    fn ensure_env() {
        if std::env::var("BOT_MASTER_KEY").is_err() {
            std::env::set_var("BOT_MASTER_KEY", URL_SAFE_NO_PAD.encode([0x33u8; 32]));
        }
        let _ = crypto::init_master_key();
        let dir = std::env::temp_dir().join(format!("fleet-gateway-tokens-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        std::env::set_var("ZERO_TRUST_MODE", "true");
        store::init();
    }

    #[test]
    fn register_then_validate() {
        ensure_env();
        let cred = crate::keyring::create(
            "openai",
            "openai",
            None,
            "sk-live",
            &[],
            &serde_json::json!({}),
            0,
        );
        let reg = register("bot-1", "openai", &cred.id, &[]);
        let validation = validate(&reg.plaintext_token).unwrap();
        assert_eq!(validation.bot_id, "bot-1");
        assert_eq!(validation.api_key.as_str(), "sk-live");
    }

    #[test]
    fn revoked_token_fails_validation() {
        ensure_env();
        let cred = crate::keyring::create(
            "anthropic",
            "anthropic",
            None,
            "sk-live-2",
            &[],
            &serde_json::json!({}),
            0,
        );
        let reg = register("bot-2", "anthropic", &cred.id, &[]);
        revoke("bot-2");
        assert!(validate(&reg.plaintext_token).is_none());
    }

    #[test]
    fn reregister_replaces_prior_token() {
        ensure_env();
        let cred = crate::keyring::create(
            "gemini",
            "gemini",
            None,
            "sk-live-3",
            &[],
            &serde_json::json!({}),
            0,
        );
        let first = register("bot-3", "gemini", &cred.id, &[]);
        let second = register("bot-3", "gemini", &cred.id, &[]);
        assert!(validate(&first.plaintext_token).is_none());
        assert!(validate(&second.plaintext_token).is_some());
    }
}
