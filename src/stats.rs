//! Read-only reporting over both tiers
//!
//! Nothing here is stored; every value is gathered when asked for.

use std::collections::BTreeMap;

use serde::Serialize;

/// Entry count for one named local region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub name: String,
    pub size: u64,
}

/// Snapshot returned by `stats()`.
///
/// When gathering fails, `available` is false and `error` says why.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub local: Vec<RegionStats>,
    /// Server info reported by the remote store, as key/value pairs
    pub remote: BTreeMap<String, String>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStats {
    pub fn local_size(&self) -> u64 {
        self.local.iter().map(|r| r.size).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub local_available: bool,
    pub remote_available: bool,
}

/// Parse the text of a Redis `INFO` reply into key/value pairs.
///
/// Section headers (`# Server`) and blank lines are skipped.
pub(crate) fn parse_info(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
