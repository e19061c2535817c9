//! Persisted ledger document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Errors raised while reading or writing the ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ledger file must contain a JSON object")]
    NotAnObject,
}

/// Per-user count of successful fetches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    #[serde(default)]
    pub count: u32,
}

/// Last code delivered for an email address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastCodeRecord {
    #[serde(alias = "otp")]
    pub code: String,

    /// When the code was delivered.
    #[serde(
        rename = "timestamp",
        alias = "ts",
        default = "epoch",
        deserialize_with = "lenient_timestamp"
    )]
    pub observed_at: DateTime<Utc>,
}

/// Absolute unix time (seconds) before which a user is gated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CooldownRecord {
    pub next_allowed_at: i64,
}

/// The whole persisted state: usage counters, last codes, and cooldowns.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Ledger {
    pub usage: BTreeMap<u64, UsageRecord>,
    pub last_codes: BTreeMap<String, LastCodeRecord>,
    pub cooldowns: BTreeMap<u64, CooldownRecord>,
}

impl Ledger {
    /// Loads the ledger from a JSON file.
    ///
    /// A missing, unreadable, or malformed file yields an empty ledger.
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<Value>(&s).ok())
            .map(Self::from_value)
            .unwrap_or_default()
    }

    /// Reads the ledger without any fallback, reporting what is wrong.
    pub fn parse_strict(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        if !value.is_object() {
            return Err(LedgerError::NotAnObject);
        }
        Ok(Self::from_value(value))
    }

    /// Normalizes an arbitrary JSON value into a ledger.
    ///
    /// Sections are read independently; entries that do not fit are skipped.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut root) = value else {
            return Self::default();
        };

        let last_codes = root
            .remove("last_codes")
            .or_else(|| root.remove("cached_otps"));

        Self {
            usage: read_section("usage", root.remove("usage")),
            last_codes: read_section("last_codes", last_codes),
            cooldowns: read_section("cooldowns", root.remove("cooldowns")),
        }
    }

    /// Writes the whole ledger as pretty JSON, replacing the file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;

        let mut tmp = PathBuf::from(path);
        tmp.as_mut_os_string().push(".tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Reads one keyed section, dropping keys or values of the wrong shape.
fn read_section<K, V>(name: &str, section: Option<Value>) -> BTreeMap<K, V>
where
    K: FromStr + Ord,
    V: DeserializeOwned,
{
    let entries: Map<String, Value> = match section {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => return BTreeMap::new(),
        Some(other) => {
            warn!("Ledger section '{}' is not an object ({}), ignoring it", name, other);
            return BTreeMap::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(key, raw)| {
            let Ok(parsed_key) = key.parse::<K>() else {
                warn!("Skipping ledger entry with bad key '{}' in '{}'", key, name);
                return None;
            };
            match serde_json::from_value::<V>(raw) {
                Ok(record) => Some((parsed_key, record)),
                Err(e) => {
                    warn!("Skipping malformed ledger entry '{}' in '{}': {}", key, name, e);
                    None
                }
            }
        })
        .collect()
}

const fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Accepts RFC 3339 strings or unix seconds; anything else maps to the epoch.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Unix(i64),
        Text(String),
        Other(Value),
    }

    let parsed = match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Unix(secs) => DateTime::from_timestamp(secs, 0),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        RawTimestamp::Other(_) => None,
    };
    Ok(parsed.unwrap_or_else(epoch))
}
