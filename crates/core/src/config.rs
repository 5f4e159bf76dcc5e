//! Environment-driven configuration helpers shared by the adapter crates.
//!
//! Every lookup is profile aware: with `DBATHENA_PROFILE=PROD`, the key
//! `ATHENA_SCHEMA` is first read as `PROD_ATHENA_SCHEMA`, falling back to
//! the bare key.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Env var naming the active profile prefix.
pub const PROFILE_ENV: &str = "DBATHENA_PROFILE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Active profile prefix, upper-cased (empty = default).
pub fn active_profile() -> String {
    env_opt(PROFILE_ENV)
        .map(|s| s.to_uppercase())
        .unwrap_or_default()
}

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// First non-empty value among `keys`, each looked up with the profile prefix.
pub fn profiled_env_first(profile: &str, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| profiled_env_opt(profile, k))
}

/// Parse a profiled env var, falling back to `None` on a malformed value.
pub fn profiled_env_parse<T: FromStr>(profile: &str, key: &str) -> Option<T> {
    let raw = profiled_env_opt(profile, key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %key, value = %raw, "ignoring unparseable env value");
            None
        }
    }
}
