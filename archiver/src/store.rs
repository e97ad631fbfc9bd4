//! Artifact resolution and retrieval from the S3-compatible object store.
//!
//! Canonical key layout: `{sha1-with-leading-"00"-stripped}/{sha1}.{ext}.gz`.
//! Earlier corpus uploads used `{sha1}/{prefix}{sha1}.{ext}.gz` with an
//! unrecorded two-hex prefix, so a bounded probe over likely prefixes is
//! kept as a fallback for archival compatibility.

use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::args::WadStoreArgs;

/// Create an S3 client against the configured endpoint.
pub async fn create_s3_client(args: &WadStoreArgs) -> Result<S3Client> {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(args.region.clone()))
        .endpoint_url(&args.wad_endpoint)
        .load()
        .await;
    Ok(S3Client::new(&config))
}

/// `{sha1-sans-one-leading-"00"}/{sha1}.{ext}.gz`
pub fn canonical_key(sha1: &str, ext: &str) -> String {
    let folder = sha1.strip_prefix("00").unwrap_or(sha1);
    format!("{folder}/{sha1}.{ext}.gz")
}

fn legacy_key(sha1: &str, prefix: &str, ext: &str) -> String {
    format!("{sha1}/{prefix}{sha1}.{ext}.gz")
}

/// Two-hex prefix candidates for the legacy layout: the leading bytes of
/// the entry's sha1/md5/sha256, then a fixed fallback set, deduped in
/// order.
pub fn candidate_prefixes(sha1: &str, wad_entry: &Value) -> Vec<String> {
    let hashes = wad_entry.get("hashes");
    let hash_str = |algo: &str| -> Option<String> {
        hashes
            .and_then(|h| h.get(algo))
            .and_then(Value::as_str)
            .map(|s| s.to_lowercase())
    };

    let mut candidates: Vec<String> = Vec::new();
    let mut push = |prefix: &str| {
        if prefix.len() == 2
            && prefix.bytes().all(|b| b.is_ascii_hexdigit())
            && !candidates.iter().any(|c| c == prefix)
        {
            candidates.push(prefix.to_string());
        }
    };

    push(&sha1[..sha1.len().min(2)]);
    for algo in ["md5", "sha256"] {
        if let Some(h) = hash_str(algo) {
            push(&h[..h.len().min(2)]);
        }
    }
    for fallback in ["00", "01", "02", "03", "ff"] {
        push(fallback);
    }
    candidates
}

/// Outcome of key resolution. `NotFound` remembers what was probed so the
/// emitted record can carry `tried_prefixes`.
#[derive(Debug, Clone)]
pub enum ResolvedKey {
    Found(String),
    NotFound { tried_prefixes: Vec<String> },
}

pub struct WadStore {
    client: S3Client,
    pub bucket: String,
}

impl WadStore {
    pub async fn new(args: &WadStoreArgs) -> Result<Self> {
        Ok(Self {
            client: create_s3_client(args).await?,
            bucket: args.wad_bucket.clone(),
        })
    }

    pub fn url_for_key(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    /// HEAD the canonical key, then walk the legacy prefix candidates.
    /// 404/403 mean "keep probing"; anything else propagates.
    pub async fn resolve_key(
        &self,
        sha1: &str,
        ext: &str,
        wad_entry: &Value,
    ) -> Result<ResolvedKey> {
        let canonical = canonical_key(sha1, ext);
        if self.head_exists(&canonical).await? {
            return Ok(ResolvedKey::Found(canonical));
        }

        let prefixes = candidate_prefixes(sha1, wad_entry);
        for prefix in &prefixes {
            let key = legacy_key(sha1, prefix, ext);
            if self.head_exists(&key).await? {
                return Ok(ResolvedKey::Found(key));
            }
        }
        Ok(ResolvedKey::NotFound {
            tried_prefixes: prefixes,
        })
    }

    async fn head_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_not_found())
                {
                    return Ok(false);
                }
                if let Some(response) = err.raw_response() {
                    if matches!(response.status().as_u16(), 403 | 404) {
                        return Ok(false);
                    }
                }
                Err(err).with_context(|| format!("HEAD failed for s3://{}/{key}", self.bucket))
            }
        }
    }

    /// Download one object to a local path.
    pub async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to get s3://{}/{key}", self.bucket))?;

        let body = response
            .body
            .collect()
            .await
            .context("failed to read object body")?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        file.write_all(&body.into_bytes())
            .await
            .context("failed to write object to disk")?;
        file.flush().await.context("failed to flush object file")?;
        Ok(())
    }
}

/// Stream-decompress a `.gz` file. Blocking; run on the blocking pool.
pub fn gunzip_file(src: &Path, dest: &Path) -> Result<()> {
    let gz = std::fs::File::open(src)
        .with_context(|| format!("failed to open {}", src.display()))?;
    let mut decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(gz));
    let mut out = std::fs::File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    std::io::copy(&mut decoder, &mut out).context("gzip decompression failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_key_strips_one_leading_00_pair() {
        assert_eq!(
            canonical_key("0000e0b4993f0b7130fc3b58abf996bbb4acb287", "wad"),
            "00e0b4993f0b7130fc3b58abf996bbb4acb287/0000e0b4993f0b7130fc3b58abf996bbb4acb287.wad.gz"
        );
        assert_eq!(
            canonical_key("ab00e0b4993f0b7130fc3b58abf996bbb4acb287", "pk3"),
            "ab00e0b4993f0b7130fc3b58abf996bbb4acb287/ab00e0b4993f0b7130fc3b58abf996bbb4acb287.pk3.gz"
        );
    }

    #[test]
    fn prefix_candidates_dedupe_in_order() {
        let entry = json!({"hashes": {"md5": "02ffffff", "sha256": "ff000000"}});
        let prefixes = candidate_prefixes("01aaaaaa", &entry);
        assert_eq!(prefixes, vec!["01", "02", "ff", "00", "03"]);
    }

    #[test]
    fn prefix_candidates_skip_non_hex() {
        let entry = json!({"hashes": {"md5": "zz"}});
        let prefixes = candidate_prefixes("0aaaaaaa", &entry);
        assert_eq!(prefixes, vec!["0a", "00", "01", "02", "03", "ff"]);
    }

    #[test]
    fn gunzip_round_trip() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("a.wad.gz");
        let out_path = dir.path().join("a.wad");

        let mut encoder =
            GzEncoder::new(std::fs::File::create(&gz_path).unwrap(), Default::default());
        encoder.write_all(b"PWAD payload").unwrap();
        encoder.finish().unwrap();

        gunzip_file(&gz_path, &out_path).unwrap();
        assert_eq!(std::fs::read(&out_path).unwrap(), b"PWAD payload");
    }
}
