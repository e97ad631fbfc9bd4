//! Index file loading and cross-reference lookups for the dispatcher.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde_json::Value;

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn parse_jsonl(text: &str, label: &str) -> Result<Vec<Value>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{label}: invalid JSON on line {}", n + 1))
        })
        .collect()
}

fn parse_jsonl_lenient(text: &str, label: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => out.push(value),
            Err(e) => {
                tracing::warn!(index = %label, line = n + 1, error = %e, "skipping invalid line")
            }
        }
    }
    out
}

async fn fetch_index_text(path_or_url: &str, label: &str) -> Result<String> {
    if is_http_url(path_or_url) {
        tracing::info!(index = %label, url = %path_or_url, "downloading index");
        let response = reqwest::get(path_or_url)
            .await
            .with_context(|| format!("failed to download {label}"))?
            .error_for_status()
            .with_context(|| format!("failed to download {label}"))?;
        response
            .text()
            .await
            .with_context(|| format!("failed to read {label} body"))
    } else {
        tokio::fs::read_to_string(path_or_url)
            .await
            .with_context(|| format!("failed to read {label} at {path_or_url}"))
    }
}

/// Load a line-delimited JSON index from a local path or HTTP URL.
pub async fn load_index(path_or_url: &str, label: &str) -> Result<Vec<Value>> {
    let text = fetch_index_text(path_or_url, label).await?;
    parse_jsonl(&text, label)
}

/// Like [`load_index`], but invalid lines are skipped with a warning.
/// The readmes index is scraped data and earns no better.
pub async fn load_index_lenient(path_or_url: &str, label: &str) -> Result<Vec<Value>> {
    let text = fetch_index_text(path_or_url, label).await?;
    Ok(parse_jsonl_lenient(&text, label))
}

/// sha1 values of every well-formed primary index entry.
pub fn known_sha1s(wads: &[Value]) -> HashSet<String> {
    wads.iter()
        .filter_map(|entry| entry.get("_id").and_then(Value::as_str))
        .filter_map(dorch_common::canonical_sha1)
        .collect()
}

/// Build sha1 -> idGames entry, restricted to entries whose `hashes[]`
/// link back to the primary index. The first entry per sha1 wins.
pub fn build_idgames_lookup(
    idgames: &[Value],
    wad_sha1s: &HashSet<String>,
) -> HashMap<String, Value> {
    let mut lookup: HashMap<String, Value> = HashMap::new();
    for entry in idgames {
        let Some(hashes) = entry.get("hashes").and_then(Value::as_array) else {
            continue;
        };
        for hash in hashes {
            let Some(sha1) = hash.as_str().and_then(dorch_common::canonical_sha1) else {
                continue;
            };
            if wad_sha1s.contains(&sha1) {
                lookup.entry(sha1).or_insert_with(|| entry.clone());
            }
        }
    }
    lookup
}

/// Build sha1 -> readmes entry. Entries key themselves by `sha1` (or the
/// older `_id` spelling).
pub fn build_readmes_lookup(readmes: &[Value]) -> HashMap<String, Value> {
    let mut lookup: HashMap<String, Value> = HashMap::new();
    for entry in readmes {
        let key = entry
            .get("sha1")
            .or_else(|| entry.get("_id"))
            .and_then(Value::as_str)
            .and_then(dorch_common::canonical_sha1);
        if let Some(sha1) = key {
            lookup.entry(sha1).or_insert_with(|| entry.clone());
        }
    }
    lookup
}
