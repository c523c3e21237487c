//! Persistent store: schema and CRUD for every entity the gateway owns.
//!
//! One SQLite database, one table per entity, embedded the same way the
//! original desktop build embedded its usage-log database: a fresh
//! `Connection::open` per call (rusqlite connections are cheap and this
//! avoids a pool's lifetime bookkeeping), WAL mode, and `prepare_cached`
//! on the hot paths.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn db_path() -> PathBuf {
    if let Ok(p) = std::env::var("FLEET_GATEWAY_DB_PATH") {
        return PathBuf::from(p);
    }
    let mut p = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("fleet-gateway");
    std::fs::create_dir_all(&p).ok();
    p.push("gateway.db");
    p
}

pub fn open_conn() -> Connection {
    let conn = Connection::open(db_path()).expect("failed to open gateway database");
    optimize_connection(&conn);
    conn
}

fn optimize_connection(conn: &Connection) {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "cache_size", "-64000").ok();
    conn.pragma_update(None, "temp_store", "MEMORY").ok();
    conn.pragma_update(None, "mmap_size", "30000000000").ok();
}

pub fn init() {
    let conn = open_conn();
    conn.execute_batch(
        "create table if not exists provider_credential (
            id text primary key,
            vendor text not null,
            api_type text not null,
            base_url text,
            secret_ciphertext blob not null,
            tags text not null default '[]',
            metadata text not null default '{}',
            vendor_priority integer not null default 0,
            created_at integer not null,
            deleted integer not null default 0
        );
        create index if not exists idx_credential_vendor on provider_credential(vendor, deleted);

        create table if not exists proxy_token (
            bot_id text primary key,
            token_hash text not null unique,
            vendor text not null,
            credential_id text not null,
            tags text not null default '[]',
            expires_at integer,
            revoked_at integer,
            last_used_at integer,
            request_count integer not null default 0
        );
        create index if not exists idx_token_hash on proxy_token(token_hash);

        create table if not exists model_availability (
            credential_id text not null,
            model_name text not null,
            is_available integer not null default 1,
            vendor_priority integer not null default 0,
            health_score integer not null default 100,
            primary key (credential_id, model_name)
        );

        create table if not exists capability_tag (
            tag_id text primary key,
            name text not null,
            category text not null,
            priority integer not null default 0,
            required_protocol text,
            required_models text,
            required_skills text,
            requires_extended_thinking integer not null default 0,
            requires_cache_control integer not null default 0,
            requires_vision integer not null default 0,
            is_active integer not null default 1
        );

        create table if not exists fallback_chain (
            chain_id text primary key,
            name text not null,
            models text not null default '[]',
            trigger_status_codes text not null default '[429,500,502,503,504]',
            trigger_error_types text not null default '[\"rate_limit\",\"overloaded\",\"timeout\"]',
            trigger_timeout_ms integer not null default 120000,
            max_retries integer not null default 3,
            retry_delay_ms integer not null default 500,
            preserve_protocol integer not null default 0
        );

        create table if not exists cost_strategy (
            strategy_id text primary key,
            cost_weight real not null default 0.34,
            performance_weight real not null default 0.33,
            capability_weight real not null default 0.33,
            max_cost_per_request real,
            max_latency_ms integer,
            min_capability_score integer,
            scenario_weights text
        );

        create table if not exists model_pricing (
            model text primary key,
            input_per_million real not null default 0,
            output_per_million real not null default 0,
            thinking_per_million real,
            cache_read_per_million real,
            cache_write_per_million real,
            reasoning_score integer not null default 50,
            coding_score integer not null default 50,
            creativity_score integer not null default 50,
            speed_score integer not null default 50
        );

        create table if not exists complexity_routing_config (
            level text primary key,
            vendor text not null,
            model text not null
        );

        create table if not exists complexity_meta (
            id integer primary key check (id = 1),
            tool_min_complexity text not null default 'medium',
            classifier_vendor text,
            classifier_model text,
            classifier_base_url text
        );

        create table if not exists bot (
            id text primary key,
            hostname text not null unique,
            tags text not null default '[]',
            proxy_token_hash text,
            created_at integer not null
        );

        create table if not exists bot_usage_log (
            id integer primary key autoincrement,
            bot_id text not null,
            vendor text not null,
            credential_id text,
            status_code integer,
            endpoint text not null,
            model text not null,
            request_tokens integer not null default 0,
            response_tokens integer not null default 0,
            error_message text,
            duration_ms integer not null default 0,
            protocol_type text not null,
            created_at integer not null
        );
        create index if not exists idx_usage_log_bot_time on bot_usage_log(bot_id, created_at desc);

        create table if not exists routing_rule (
            id text primary key,
            bot_id text not null,
            strategy text not null,
            priority integer not null default 100,
            rule text not null default '{}'
        );
        create index if not exists idx_routing_rule_bot on routing_rule(bot_id, priority);

        create table if not exists bot_quota (
            bot_id text primary key,
            daily_cost real not null default 0,
            monthly_cost real not null default 0,
            last_reset_date text not null,
            last_reset_month text not null,
            daily_limit real,
            monthly_limit real,
            alert_threshold real not null default 0.8
        );",
    )
    .expect("failed to initialize gateway schema");
}

// ---------------------------------------------------------------------
// ProviderCredential

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub id: String,
    pub vendor: String,
    pub api_type: String,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub secret_ciphertext: Vec<u8>,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub vendor_priority: i64,
    pub created_at: i64,
}

fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<ProviderCredential> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    Ok(ProviderCredential {
        id: row.get("id")?,
        vendor: row.get("vendor")?,
        api_type: row.get("api_type")?,
        base_url: row.get("base_url")?,
        secret_ciphertext: row.get("secret_ciphertext")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
        vendor_priority: row.get("vendor_priority")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_credential(
    id: &str,
    vendor: &str,
    api_type: &str,
    base_url: Option<&str>,
    secret_ciphertext: &[u8],
    tags: &[String],
    metadata: &Value,
    vendor_priority: i64,
) -> ProviderCredential {
    let conn = open_conn();
    let created_at = Utc::now().timestamp();
    conn.execute(
        "insert into provider_credential
            (id, vendor, api_type, base_url, secret_ciphertext, tags, metadata, vendor_priority, created_at, deleted)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
        params![
            id,
            vendor,
            api_type,
            base_url,
            secret_ciphertext,
            serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string()),
            vendor_priority,
            created_at,
        ],
    )
    .expect("insert credential");
    ProviderCredential {
        id: id.to_string(),
        vendor: vendor.to_string(),
        api_type: api_type.to_string(),
        base_url: base_url.map(str::to_string),
        secret_ciphertext: secret_ciphertext.to_vec(),
        tags: tags.to_vec(),
        metadata: metadata.clone(),
        vendor_priority,
        created_at,
    }
}

pub fn list_credentials_by_vendor(vendor: &str) -> Vec<ProviderCredential> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached(
            "select * from provider_credential where vendor = ?1 and deleted = 0 order by vendor_priority desc",
        )
        .unwrap();
    let rows = stmt.query_map(params![vendor], row_to_credential).unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn list_all_credentials() -> Vec<ProviderCredential> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached("select * from provider_credential where deleted = 0 order by vendor, vendor_priority desc")
        .unwrap();
    let rows = stmt.query_map([], row_to_credential).unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn get_credential(id: &str) -> Option<ProviderCredential> {
    let conn = open_conn();
    conn.query_row(
        "select * from provider_credential where id = ?1 and deleted = 0",
        params![id],
        row_to_credential,
    )
    .optional()
    .unwrap()
}

/// Soft-delete only succeeds once no active ProxyToken still references the
/// credential, per the keyring invariant.
pub fn soft_delete_credential(id: &str) -> Result<(), String> {
    let conn = open_conn();
    let active: i64 = conn
        .query_row(
            "select count(*) from proxy_token where credential_id = ?1 and revoked_at is null",
            params![id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if active > 0 {
        return Err(format!(
            "credential {id} still has {active} active proxy token(s)"
        ));
    }
    conn.execute(
        "update provider_credential set deleted = 1 where id = ?1",
        params![id],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

// ---------------------------------------------------------------------
// ProxyToken

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyTokenRow {
    pub bot_id: String,
    pub token_hash: String,
    pub vendor: String,
    pub credential_id: String,
    pub tags: Vec<String>,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub request_count: i64,
}

fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<ProxyTokenRow> {
    let tags_json: String = row.get("tags")?;
    Ok(ProxyTokenRow {
        bot_id: row.get("bot_id")?,
        token_hash: row.get("token_hash")?,
        vendor: row.get("vendor")?,
        credential_id: row.get("credential_id")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        expires_at: row.get("expires_at")?,
        revoked_at: row.get("revoked_at")?,
        last_used_at: row.get("last_used_at")?,
        request_count: row.get("request_count")?,
    })
}

/// Replaces any prior token for this bot (bot id is unique per row).
pub fn put_proxy_token(
    bot_id: &str,
    token_hash: &str,
    vendor: &str,
    credential_id: &str,
    tags: &[String],
    expires_at: Option<i64>,
) {
    let conn = open_conn();
    conn.execute("delete from proxy_token where bot_id = ?1", params![bot_id])
        .unwrap();
    conn.execute(
        "insert into proxy_token (bot_id, token_hash, vendor, credential_id, tags, expires_at, revoked_at, last_used_at, request_count)
         values (?1, ?2, ?3, ?4, ?5, ?6, null, null, 0)",
        params![
            bot_id,
            token_hash,
            vendor,
            credential_id,
            serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            expires_at,
        ],
    )
    .unwrap();
}

pub fn find_token_by_hash(token_hash: &str) -> Option<ProxyTokenRow> {
    let conn = open_conn();
    conn.query_row(
        "select * from proxy_token where token_hash = ?1",
        params![token_hash],
        row_to_token,
    )
    .optional()
    .unwrap()
}

pub fn revoke_token(bot_id: &str) {
    let conn = open_conn();
    conn.execute(
        "update proxy_token set revoked_at = ?1 where bot_id = ?2",
        params![Utc::now().timestamp(), bot_id],
    )
    .ok();
}

pub fn delete_token_for_bot(bot_id: &str) {
    let conn = open_conn();
    conn.execute("delete from proxy_token where bot_id = ?1", params![bot_id])
        .ok();
}

pub fn bump_token_usage(bot_id: &str) {
    let conn = open_conn();
    conn.execute(
        "update proxy_token set last_used_at = ?1, request_count = request_count + 1 where bot_id = ?2",
        params![Utc::now().timestamp(), bot_id],
    )
    .ok();
}

// ---------------------------------------------------------------------
// Bot (minimal: direct-mode auth + tags)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub hostname: String,
    pub tags: Vec<String>,
    pub proxy_token_hash: Option<String>,
    pub created_at: i64,
}

fn row_to_bot(row: &rusqlite::Row) -> rusqlite::Result<Bot> {
    let tags_json: String = row.get("tags")?;
    Ok(Bot {
        id: row.get("id")?,
        hostname: row.get("hostname")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        proxy_token_hash: row.get("proxy_token_hash")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_bot(id: &str, hostname: &str, tags: &[String]) -> Bot {
    let conn = open_conn();
    let created_at = Utc::now().timestamp();
    conn.execute(
        "insert into bot (id, hostname, tags, proxy_token_hash, created_at) values (?1, ?2, ?3, null, ?4)",
        params![
            id,
            hostname,
            serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            created_at
        ],
    )
    .unwrap();
    Bot {
        id: id.to_string(),
        hostname: hostname.to_string(),
        tags: tags.to_vec(),
        proxy_token_hash: None,
        created_at,
    }
}

pub fn list_bots() -> Vec<Bot> {
    let conn = open_conn();
    let mut stmt = conn.prepare_cached("select * from bot order by hostname").unwrap();
    let rows = stmt.query_map([], row_to_bot).unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn get_bot(id: &str) -> Option<Bot> {
    let conn = open_conn();
    conn.query_row("select * from bot where id = ?1", params![id], row_to_bot)
        .optional()
        .unwrap()
}

pub fn get_bot_by_hostname(hostname: &str) -> Option<Bot> {
    let conn = open_conn();
    conn.query_row(
        "select * from bot where hostname = ?1",
        params![hostname],
        row_to_bot,
    )
    .optional()
    .unwrap()
}

pub fn set_bot_direct_token_hash(bot_id: &str, hash: &str) {
    let conn = open_conn();
    conn.execute(
        "update bot set proxy_token_hash = ?1 where id = ?2",
        params![hash, bot_id],
    )
    .ok();
}

pub fn find_bot_by_direct_token_hash(hash: &str) -> Option<Bot> {
    let conn = open_conn();
    conn.query_row(
        "select * from bot where proxy_token_hash = ?1",
        params![hash],
        row_to_bot,
    )
    .optional()
    .unwrap()
}

pub fn delete_bot(id: &str) {
    let conn = open_conn();
    conn.execute("delete from bot where id = ?1", params![id]).ok();
}

// ---------------------------------------------------------------------
// ModelAvailability

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAvailabilityRow {
    pub credential_id: String,
    pub model_name: String,
    pub is_available: bool,
    pub vendor_priority: i64,
    pub health_score: i64,
}

fn row_to_availability(row: &rusqlite::Row) -> rusqlite::Result<ModelAvailabilityRow> {
    Ok(ModelAvailabilityRow {
        credential_id: row.get("credential_id")?,
        model_name: row.get("model_name")?,
        is_available: row.get::<_, i64>("is_available")? != 0,
        vendor_priority: row.get("vendor_priority")?,
        health_score: row.get("health_score")?,
    })
}

pub fn upsert_model_availability(credential_id: &str, model_name: &str, vendor_priority: i64) {
    let conn = open_conn();
    conn.execute(
        "insert into model_availability (credential_id, model_name, is_available, vendor_priority, health_score)
         values (?1, ?2, 1, ?3, 100)
         on conflict(credential_id, model_name) do update set vendor_priority = excluded.vendor_priority",
        params![credential_id, model_name, vendor_priority],
    )
    .unwrap();
}

pub fn list_availability_for_model(model_name: &str) -> Vec<ModelAvailabilityRow> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached("select * from model_availability where model_name = ?1")
        .unwrap();
    let rows = stmt
        .query_map(params![model_name], row_to_availability)
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn update_health_score(credential_id: &str, model_name: &str, new_score: i64) {
    let conn = open_conn();
    conn.execute(
        "update model_availability set health_score = ?1 where credential_id = ?2 and model_name = ?3",
        params![new_score, credential_id, model_name],
    )
    .ok();
}

pub fn get_health_score(credential_id: &str, model_name: &str) -> Option<i64> {
    let conn = open_conn();
    conn.query_row(
        "select health_score from model_availability where credential_id = ?1 and model_name = ?2",
        params![credential_id, model_name],
        |r| r.get(0),
    )
    .optional()
    .unwrap()
}

/// Picks the best-ranked available model for a vendor when a route has no
/// explicit model target (the routing engine's default-route fallback).
pub fn first_available_model_for_vendor(vendor: &str) -> Option<String> {
    let conn = open_conn();
    conn.query_row(
        "select ma.model_name from model_availability ma
         join provider_credential pc on pc.id = ma.credential_id
         where pc.vendor = ?1 and ma.is_available = 1 and pc.deleted = 0
         order by ma.vendor_priority desc, ma.health_score desc, ma.model_name asc
         limit 1",
        params![vendor],
        |r| r.get(0),
    )
    .optional()
    .unwrap()
}

// ---------------------------------------------------------------------
// CapabilityTag, FallbackChain, CostStrategy, ModelPricing,
// ComplexityRoutingConfig: loaded in bulk by the configuration loader.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityTagRow {
    pub tag_id: String,
    pub name: String,
    pub category: String,
    pub priority: i64,
    pub required_protocol: Option<String>,
    pub required_models: Vec<String>,
    pub required_skills: Vec<String>,
    pub requires_extended_thinking: bool,
    pub requires_cache_control: bool,
    pub requires_vision: bool,
    pub is_active: bool,
}

pub fn list_capability_tags() -> Vec<CapabilityTagRow> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached("select * from capability_tag where is_active = 1 order by priority desc")
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            let required_models: String = row
                .get::<_, Option<String>>("required_models")?
                .unwrap_or_else(|| "[]".to_string());
            let required_skills: String = row
                .get::<_, Option<String>>("required_skills")?
                .unwrap_or_else(|| "[]".to_string());
            Ok(CapabilityTagRow {
                tag_id: row.get("tag_id")?,
                name: row.get("name")?,
                category: row.get("category")?,
                priority: row.get("priority")?,
                required_protocol: row.get("required_protocol")?,
                required_models: serde_json::from_str(&required_models).unwrap_or_default(),
                required_skills: serde_json::from_str(&required_skills).unwrap_or_default(),
                requires_extended_thinking: row.get::<_, i64>("requires_extended_thinking")? != 0,
                requires_cache_control: row.get::<_, i64>("requires_cache_control")? != 0,
                requires_vision: row.get::<_, i64>("requires_vision")? != 0,
                is_active: row.get::<_, i64>("is_active")? != 0,
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

#[allow(clippy::too_many_arguments)]
pub fn put_capability_tag(row: &CapabilityTagRow) {
    let conn = open_conn();
    conn.execute(
        "insert into capability_tag (tag_id, name, category, priority, required_protocol,
            required_models, required_skills, requires_extended_thinking, requires_cache_control,
            requires_vision, is_active)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         on conflict(tag_id) do update set name = excluded.name, category = excluded.category,
            priority = excluded.priority, required_protocol = excluded.required_protocol,
            required_models = excluded.required_models, required_skills = excluded.required_skills,
            requires_extended_thinking = excluded.requires_extended_thinking,
            requires_cache_control = excluded.requires_cache_control,
            requires_vision = excluded.requires_vision, is_active = excluded.is_active",
        params![
            row.tag_id,
            row.name,
            row.category,
            row.priority,
            row.required_protocol,
            serde_json::to_string(&row.required_models).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&row.required_skills).unwrap_or_else(|_| "[]".to_string()),
            row.requires_extended_thinking as i64,
            row.requires_cache_control as i64,
            row.requires_vision as i64,
            row.is_active as i64,
        ],
    )
    .unwrap();
}

pub fn delete_capability_tag(tag_id: &str) -> Result<(), String> {
    let conn = open_conn();
    let affected = conn
        .execute("delete from capability_tag where tag_id = ?1", params![tag_id])
        .unwrap();
    if affected == 0 {
        return Err(format!("capability tag {tag_id} not found"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackChainRow {
    pub chain_id: String,
    pub name: String,
    pub models: Vec<Value>,
    pub trigger_status_codes: Vec<i64>,
    pub trigger_error_types: Vec<String>,
    pub trigger_timeout_ms: i64,
    pub max_retries: i64,
    pub retry_delay_ms: i64,
    pub preserve_protocol: bool,
}

pub fn list_fallback_chains() -> Vec<FallbackChainRow> {
    let conn = open_conn();
    let mut stmt = conn.prepare_cached("select * from fallback_chain").unwrap();
    let rows = stmt
        .query_map([], |row| {
            let models: String = row.get("models")?;
            let codes: String = row.get("trigger_status_codes")?;
            let types: String = row.get("trigger_error_types")?;
            Ok(FallbackChainRow {
                chain_id: row.get("chain_id")?,
                name: row.get("name")?,
                models: serde_json::from_str(&models).unwrap_or_default(),
                trigger_status_codes: serde_json::from_str(&codes).unwrap_or_default(),
                trigger_error_types: serde_json::from_str(&types).unwrap_or_default(),
                trigger_timeout_ms: row.get("trigger_timeout_ms")?,
                max_retries: row.get("max_retries")?,
                retry_delay_ms: row.get("retry_delay_ms")?,
                preserve_protocol: row.get::<_, i64>("preserve_protocol")? != 0,
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn put_fallback_chain(row: &FallbackChainRow) {
    let conn = open_conn();
    conn.execute(
        "insert into fallback_chain (chain_id, name, models, trigger_status_codes,
            trigger_error_types, trigger_timeout_ms, max_retries, retry_delay_ms, preserve_protocol)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         on conflict(chain_id) do update set name = excluded.name, models = excluded.models,
            trigger_status_codes = excluded.trigger_status_codes,
            trigger_error_types = excluded.trigger_error_types,
            trigger_timeout_ms = excluded.trigger_timeout_ms, max_retries = excluded.max_retries,
            retry_delay_ms = excluded.retry_delay_ms, preserve_protocol = excluded.preserve_protocol",
        params![
            row.chain_id,
            row.name,
            serde_json::to_string(&row.models).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&row.trigger_status_codes).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&row.trigger_error_types).unwrap_or_else(|_| "[]".to_string()),
            row.trigger_timeout_ms,
            row.max_retries,
            row.retry_delay_ms,
            row.preserve_protocol as i64,
        ],
    )
    .unwrap();
}

pub fn delete_fallback_chain(chain_id: &str) -> Result<(), String> {
    let conn = open_conn();
    let affected = conn
        .execute("delete from fallback_chain where chain_id = ?1", params![chain_id])
        .unwrap();
    if affected == 0 {
        return Err(format!("fallback chain {chain_id} not found"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostStrategyRow {
    pub strategy_id: String,
    pub cost_weight: f64,
    pub performance_weight: f64,
    pub capability_weight: f64,
    pub max_cost_per_request: Option<f64>,
    pub max_latency_ms: Option<i64>,
    pub min_capability_score: Option<i64>,
    pub scenario_weights: Option<Value>,
}

pub fn list_cost_strategies() -> Vec<CostStrategyRow> {
    let conn = open_conn();
    let mut stmt = conn.prepare_cached("select * from cost_strategy").unwrap();
    let rows = stmt
        .query_map([], |row| {
            let scenario: Option<String> = row.get("scenario_weights")?;
            Ok(CostStrategyRow {
                strategy_id: row.get("strategy_id")?,
                cost_weight: row.get("cost_weight")?,
                performance_weight: row.get("performance_weight")?,
                capability_weight: row.get("capability_weight")?,
                max_cost_per_request: row.get("max_cost_per_request")?,
                max_latency_ms: row.get("max_latency_ms")?,
                min_capability_score: row.get("min_capability_score")?,
                scenario_weights: scenario.and_then(|s| serde_json::from_str(&s).ok()),
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn get_cost_strategy(id: &str) -> Option<CostStrategyRow> {
    list_cost_strategies().into_iter().find(|s| s.strategy_id == id)
}

pub fn put_cost_strategy(row: &CostStrategyRow) {
    let conn = open_conn();
    conn.execute(
        "insert into cost_strategy (strategy_id, cost_weight, performance_weight, capability_weight,
            max_cost_per_request, max_latency_ms, min_capability_score, scenario_weights)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         on conflict(strategy_id) do update set cost_weight = excluded.cost_weight,
            performance_weight = excluded.performance_weight,
            capability_weight = excluded.capability_weight,
            max_cost_per_request = excluded.max_cost_per_request,
            max_latency_ms = excluded.max_latency_ms,
            min_capability_score = excluded.min_capability_score,
            scenario_weights = excluded.scenario_weights",
        params![
            row.strategy_id,
            row.cost_weight,
            row.performance_weight,
            row.capability_weight,
            row.max_cost_per_request,
            row.max_latency_ms,
            row.min_capability_score,
            row.scenario_weights.as_ref().map(|v| v.to_string()),
        ],
    )
    .unwrap();
}

pub fn delete_cost_strategy(strategy_id: &str) -> Result<(), String> {
    let conn = open_conn();
    let affected = conn
        .execute("delete from cost_strategy where strategy_id = ?1", params![strategy_id])
        .unwrap();
    if affected == 0 {
        return Err(format!("cost strategy {strategy_id} not found"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricingRow {
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub thinking_per_million: Option<f64>,
    pub cache_read_per_million: Option<f64>,
    pub cache_write_per_million: Option<f64>,
    pub reasoning_score: i64,
    pub coding_score: i64,
    pub creativity_score: i64,
    pub speed_score: i64,
}

pub fn list_model_pricing() -> Vec<ModelPricingRow> {
    let conn = open_conn();
    let mut stmt = conn.prepare_cached("select * from model_pricing").unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok(ModelPricingRow {
                model: row.get("model")?,
                input_per_million: row.get("input_per_million")?,
                output_per_million: row.get("output_per_million")?,
                thinking_per_million: row.get("thinking_per_million")?,
                cache_read_per_million: row.get("cache_read_per_million")?,
                cache_write_per_million: row.get("cache_write_per_million")?,
                reasoning_score: row.get("reasoning_score")?,
                coding_score: row.get("coding_score")?,
                creativity_score: row.get("creativity_score")?,
                speed_score: row.get("speed_score")?,
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn get_model_pricing(model: &str) -> Option<ModelPricingRow> {
    let conn = open_conn();
    conn.query_row(
        "select * from model_pricing where model = ?1",
        params![model],
        |row| {
            Ok(ModelPricingRow {
                model: row.get("model")?,
                input_per_million: row.get("input_per_million")?,
                output_per_million: row.get("output_per_million")?,
                thinking_per_million: row.get("thinking_per_million")?,
                cache_read_per_million: row.get("cache_read_per_million")?,
                cache_write_per_million: row.get("cache_write_per_million")?,
                reasoning_score: row.get("reasoning_score")?,
                coding_score: row.get("coding_score")?,
                creativity_score: row.get("creativity_score")?,
                speed_score: row.get("speed_score")?,
            })
        },
    )
    .optional()
    .unwrap()
}

#[allow(clippy::too_many_arguments)]
pub fn put_model_pricing(row: &ModelPricingRow) {
    let conn = open_conn();
    conn.execute(
        "insert into model_pricing (model, input_per_million, output_per_million,
            thinking_per_million, cache_read_per_million, cache_write_per_million,
            reasoning_score, coding_score, creativity_score, speed_score)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         on conflict(model) do update set input_per_million = excluded.input_per_million,
            output_per_million = excluded.output_per_million,
            thinking_per_million = excluded.thinking_per_million,
            cache_read_per_million = excluded.cache_read_per_million,
            cache_write_per_million = excluded.cache_write_per_million,
            reasoning_score = excluded.reasoning_score, coding_score = excluded.coding_score,
            creativity_score = excluded.creativity_score, speed_score = excluded.speed_score",
        params![
            row.model,
            row.input_per_million,
            row.output_per_million,
            row.thinking_per_million,
            row.cache_read_per_million,
            row.cache_write_per_million,
            row.reasoning_score,
            row.coding_score,
            row.creativity_score,
            row.speed_score,
        ],
    )
    .unwrap();
}

pub fn delete_model_pricing(model: &str) -> Result<(), String> {
    let conn = open_conn();
    let affected = conn
        .execute("delete from model_pricing where model = ?1", params![model])
        .unwrap();
    if affected == 0 {
        return Err(format!("model pricing entry {model} not found"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityRoute {
    pub level: String,
    pub vendor: String,
    pub model: String,
}

pub fn list_complexity_routes() -> Vec<ComplexityRoute> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached("select level, vendor, model from complexity_routing_config")
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok(ComplexityRoute {
                level: row.get(0)?,
                vendor: row.get(1)?,
                model: row.get(2)?,
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityMeta {
    pub tool_min_complexity: String,
    pub classifier_vendor: Option<String>,
    pub classifier_model: Option<String>,
    pub classifier_base_url: Option<String>,
}

pub fn get_complexity_meta() -> Option<ComplexityMeta> {
    let conn = open_conn();
    conn.query_row(
        "select tool_min_complexity, classifier_vendor, classifier_model, classifier_base_url from complexity_meta where id = 1",
        [],
        |row| {
            Ok(ComplexityMeta {
                tool_min_complexity: row.get(0)?,
                classifier_vendor: row.get(1)?,
                classifier_model: row.get(2)?,
                classifier_base_url: row.get(3)?,
            })
        },
    )
    .optional()
    .unwrap()
}

// ---------------------------------------------------------------------
// RoutingRule (per-bot, admin-editable; §4.7 [SUPPLEMENT])

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRuleRow {
    pub id: String,
    pub bot_id: String,
    pub strategy: String,
    pub priority: i64,
    pub rule: Value,
}

pub fn list_routing_rules_for_bot(bot_id: &str) -> Vec<RoutingRuleRow> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached(
            "select id, bot_id, strategy, priority, rule from routing_rule where bot_id = ?1 order by priority asc, id asc",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![bot_id], |row| {
            let rule: String = row.get(4)?;
            Ok(RoutingRuleRow {
                id: row.get(0)?,
                bot_id: row.get(1)?,
                strategy: row.get(2)?,
                priority: row.get(3)?,
                rule: serde_json::from_str(&rule).unwrap_or(Value::Null),
            })
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

pub fn put_routing_rule(id: &str, bot_id: &str, strategy: &str, priority: i64, rule: &Value) {
    let conn = open_conn();
    conn.execute(
        "insert into routing_rule (id, bot_id, strategy, priority, rule) values (?1, ?2, ?3, ?4, ?5)
         on conflict(id) do update set bot_id = excluded.bot_id, strategy = excluded.strategy,
            priority = excluded.priority, rule = excluded.rule",
        params![
            id,
            bot_id,
            strategy,
            priority,
            serde_json::to_string(rule).unwrap_or_else(|_| "{}".to_string())
        ],
    )
    .unwrap();
}

// ---------------------------------------------------------------------
// BotUsageLog

#[allow(clippy::too_many_arguments)]
pub fn log_usage(
    bot_id: &str,
    vendor: &str,
    credential_id: Option<&str>,
    status_code: Option<i64>,
    endpoint: &str,
    model: &str,
    request_tokens: i64,
    response_tokens: i64,
    error_message: Option<&str>,
    duration_ms: i64,
    protocol_type: &str,
) {
    let conn = open_conn();
    conn.execute(
        "insert into bot_usage_log
            (bot_id, vendor, credential_id, status_code, endpoint, model, request_tokens,
             response_tokens, error_message, duration_ms, protocol_type, created_at)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            bot_id,
            vendor,
            credential_id,
            status_code,
            endpoint,
            model,
            request_tokens,
            response_tokens,
            error_message,
            duration_ms,
            protocol_type,
            Utc::now().timestamp(),
        ],
    )
    .unwrap();
}

#[derive(Debug, Clone, Serialize)]
pub struct BotUsageSummary {
    pub requests: i64,
    pub request_tokens: i64,
    pub response_tokens: i64,
}

pub fn usage_summary_for_bot_since(bot_id: &str, unix_from: i64) -> BotUsageSummary {
    let conn = open_conn();
    conn.query_row(
        "select count(*), ifnull(sum(request_tokens),0), ifnull(sum(response_tokens),0)
         from bot_usage_log where bot_id = ?1 and created_at >= ?2",
        params![bot_id, unix_from],
        |row| {
            Ok(BotUsageSummary {
                requests: row.get(0)?,
                request_tokens: row.get(1)?,
                response_tokens: row.get(2)?,
            })
        },
    )
    .unwrap()
}

pub fn recent_usage_for_bot(bot_id: &str, limit: i64) -> Vec<Value> {
    let conn = open_conn();
    let mut stmt = conn
        .prepare_cached(
            "select vendor, credential_id, status_code, endpoint, model, request_tokens,
                    response_tokens, error_message, duration_ms, protocol_type, created_at
             from bot_usage_log where bot_id = ?1 order by created_at desc limit ?2",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![bot_id, limit], |row| {
            Ok(serde_json::json!({
                "vendor": row.get::<_, String>(0)?,
                "credentialId": row.get::<_, Option<String>>(1)?,
                "statusCode": row.get::<_, Option<i64>>(2)?,
                "endpoint": row.get::<_, String>(3)?,
                "model": row.get::<_, String>(4)?,
                "requestTokens": row.get::<_, i64>(5)?,
                "responseTokens": row.get::<_, i64>(6)?,
                "errorMessage": row.get::<_, Option<String>>(7)?,
                "durationMs": row.get::<_, i64>(8)?,
                "protocolType": row.get::<_, String>(9)?,
                "createdAt": row.get::<_, i64>(10)?,
            }))
        })
        .unwrap();
    rows.filter_map(Result::ok).collect()
}

// ---------------------------------------------------------------------
// BotQuota (C11 rolling counters)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotQuotaRow {
    pub bot_id: String,
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub last_reset_date: String,
    pub last_reset_month: String,
    pub daily_limit: Option<f64>,
    pub monthly_limit: Option<f64>,
    pub alert_threshold: f64,
}

fn row_to_quota(row: &rusqlite::Row) -> rusqlite::Result<BotQuotaRow> {
    Ok(BotQuotaRow {
        bot_id: row.get("bot_id")?,
        daily_cost: row.get("daily_cost")?,
        monthly_cost: row.get("monthly_cost")?,
        last_reset_date: row.get("last_reset_date")?,
        last_reset_month: row.get("last_reset_month")?,
        daily_limit: row.get("daily_limit")?,
        monthly_limit: row.get("monthly_limit")?,
        alert_threshold: row.get("alert_threshold")?,
    })
}

pub fn get_or_init_quota(bot_id: &str) -> BotQuotaRow {
    let conn = open_conn();
    let existing = conn
        .query_row(
            "select * from bot_quota where bot_id = ?1",
            params![bot_id],
            row_to_quota,
        )
        .optional()
        .unwrap();
    if let Some(row) = existing {
        return row;
    }
    let now = Utc::now();
    let row = BotQuotaRow {
        bot_id: bot_id.to_string(),
        daily_cost: 0.0,
        monthly_cost: 0.0,
        last_reset_date: now.format("%Y-%m-%d").to_string(),
        last_reset_month: now.format("%Y-%m").to_string(),
        daily_limit: None,
        monthly_limit: None,
        alert_threshold: 0.8,
    };
    conn.execute(
        "insert into bot_quota (bot_id, daily_cost, monthly_cost, last_reset_date, last_reset_month, daily_limit, monthly_limit, alert_threshold)
         values (?1, 0, 0, ?2, ?3, null, null, 0.8)",
        params![bot_id, row.last_reset_date, row.last_reset_month],
    )
    .unwrap();
    row
}

pub fn save_quota(row: &BotQuotaRow) {
    let conn = open_conn();
    conn.execute(
        "insert into bot_quota (bot_id, daily_cost, monthly_cost, last_reset_date, last_reset_month, daily_limit, monthly_limit, alert_threshold)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         on conflict(bot_id) do update set daily_cost = excluded.daily_cost, monthly_cost = excluded.monthly_cost,
            last_reset_date = excluded.last_reset_date, last_reset_month = excluded.last_reset_month,
            daily_limit = excluded.daily_limit, monthly_limit = excluded.monthly_limit,
            alert_threshold = excluded.alert_threshold",
        params![
            row.bot_id,
            row.daily_cost,
            row.monthly_cost,
            row.last_reset_date,
            row.last_reset_month,
            row.daily_limit,
            row.monthly_limit,
            row.alert_threshold,
        ],
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-test-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        init();
    }

    #[test]
    fn credential_round_trip() {
        temp_db();
        let cred = create_credential(
            "cred-1",
            "openai",
            "openai",
            None,
            b"ciphertext",
            &["fast".to_string()],
            &serde_json::json!({}),
            10,
        );
        let fetched = get_credential(&cred.id).unwrap();
        assert_eq!(fetched.vendor, "openai");
        assert_eq!(fetched.tags, vec!["fast".to_string()]);
    }

    #[test]
    fn credential_soft_delete_blocked_by_active_token() {
        temp_db();
        let cred = create_credential(
            "cred-2",
            "anthropic",
            "anthropic",
            None,
            b"ct",
            &[],
            &serde_json::json!({}),
            0,
        );
        put_proxy_token("bot-a", "hash-a", "anthropic", &cred.id, &[], None);
        assert!(soft_delete_credential(&cred.id).is_err());
        revoke_token("bot-a");
        delete_token_for_bot("bot-a");
        assert!(soft_delete_credential(&cred.id).is_ok());
    }

    #[test]
    fn proxy_token_is_unique_per_bot() {
        temp_db();
        put_proxy_token("bot-b", "hash-1", "openai", "cred-x", &[], None);
        put_proxy_token("bot-b", "hash-2", "openai", "cred-x", &[], None);
        assert!(find_token_by_hash("hash-1").is_none());
        assert!(find_token_by_hash("hash-2").is_some());
    }
}
