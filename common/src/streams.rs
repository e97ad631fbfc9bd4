//! JetStream stream/subject conventions and the job envelope codec.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_nats::jetstream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{canonical_sha1, unix_now_secs};

pub const DEFAULT_META_STREAM: &str = "DORCH_META";
pub const DEFAULT_IMAGES_STREAM: &str = "DORCH_IMAGES";

pub const META_SUBJECTS: &str = "dorch.wad.*.meta";
pub const IMAGES_SUBJECTS: &str = "dorch.wad.*.img";

pub mod subjects {
    use std::fmt::Display;

    pub fn meta<T>(sha1: T) -> String
    where
        T: Display,
    {
        format!("dorch.wad.{}.meta", sha1)
    }

    pub fn images<T>(wad_id: T) -> String
    where
        T: Display,
    {
        format!("dorch.wad.{}.img", wad_id)
    }
}

/// Extract the sha1 from a `dorch.wad.{sha1}.meta` subject.
///
/// The prefix may vary in length; only the trailing two segments are
/// interpreted.
pub fn sha1_from_subject(subject: &str) -> Option<String> {
    let parts: Vec<&str> = subject.split('.').collect();
    if parts.len() < 4 || *parts.last()? != "meta" {
        return None;
    }
    canonical_sha1(parts[parts.len() - 2])
}

/// Extract the wad UUID from a `dorch.wad.{wad_id}.img` subject.
pub fn wad_id_from_subject(subject: &str) -> Option<uuid::Uuid> {
    let parts: Vec<&str> = subject.split('.').collect();
    if parts.len() < 4 || *parts.last()? != "img" {
        return None;
    }
    uuid::Uuid::parse_str(parts[parts.len() - 2].trim()).ok()
}

/// Message ID header value used for stream-level publish dedupe.
pub fn meta_message_id(sha1: &str) -> String {
    format!("dorch-meta:{sha1}")
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Timeout for awaiting JetStream publish acknowledgements.
pub fn publish_timeout() -> Duration {
    Duration::from_secs_f64(env_f64("DORCH_NATS_PUBLISH_TIMEOUT", 5.0))
}

/// Timeout for the client flush on fast-exit paths.
pub fn flush_timeout() -> Duration {
    Duration::from_secs_f64(env_f64("DORCH_NATS_FLUSH_TIMEOUT", 3.0))
}

/// Get or create a dorch work-queue stream.
///
/// Retention knobs come from the environment so dispatcher and workers
/// agree without extra flags: `DORCH_META_MAX_AGE_SECONDS` (default 7 d),
/// `DORCH_META_DEDUPE_WINDOW_SECONDS` (default 1 h), `DORCH_META_MAX_BYTES`
/// (0 = unlimited).
pub async fn ensure_stream(
    jetstream: &jetstream::Context,
    name: &str,
    subjects: &[&str],
) -> Result<jetstream::stream::Stream> {
    let max_age = env_f64("DORCH_META_MAX_AGE_SECONDS", 604800.0);
    let duplicate_window = env_f64("DORCH_META_DEDUPE_WINDOW_SECONDS", 3600.0);
    let max_bytes = env_i64("DORCH_META_MAX_BYTES", 0);

    jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: name.to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            storage: jetstream::stream::StorageType::File,
            discard: jetstream::stream::DiscardPolicy::Old,
            max_age: Duration::from_secs_f64(max_age),
            duplicate_window: Duration::from_secs_f64(duplicate_window),
            max_bytes,
            ..Default::default()
        })
        .await
        .with_context(|| format!("failed to get or create stream {name}"))
}

/// One metadata job as published on `dorch.wad.{sha1}.meta`.
///
/// The index entries are carried opaquely; the worker and merger pick out
/// the fields they understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaJob {
    pub version: i64,
    pub sha1: String,
    pub wad_entry: Value,
    pub idgames_entry: Option<Value>,
    pub readmes_entry: Option<Value>,
    pub dispatched_at: f64,
}

impl MetaJob {
    pub fn new(
        sha1: String,
        wad_entry: Value,
        idgames_entry: Option<Value>,
        readmes_entry: Option<Value>,
    ) -> Self {
        Self {
            version: 1,
            sha1,
            wad_entry,
            idgames_entry,
            readmes_entry,
            dispatched_at: unix_now_secs(),
        }
    }

    pub fn to_bytes(&self) -> Result<bytes::Bytes> {
        Ok(serde_json::to_vec(self)
            .context("failed to serialize meta job")?
            .into())
    }

    /// Decode and validate a job payload.
    ///
    /// Rejects payloads that are not JSON objects, carry an invalid sha1,
    /// or whose `wad_entry` is not an object. An absent or non-positive
    /// `dispatched_at` is replaced with the current wall time.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let obj: Value = serde_json::from_slice(payload).context("job payload is not JSON")?;
        let Value::Object(map) = obj else {
            bail!("job payload must be a JSON object");
        };

        let version = map.get("version").and_then(Value::as_i64).unwrap_or(1);

        let sha1 = map
            .get("sha1")
            .and_then(Value::as_str)
            .and_then(canonical_sha1)
            .context("job sha1 must be 40 hex chars")?;

        let wad_entry = match map.get("wad_entry") {
            Some(v @ Value::Object(_)) => v.clone(),
            _ => bail!("job wad_entry must be an object"),
        };

        let idgames_entry = match map.get("idgames_entry") {
            None | Some(Value::Null) => None,
            Some(v @ Value::Object(_)) => Some(v.clone()),
            Some(_) => bail!("job idgames_entry must be an object or null"),
        };

        let readmes_entry = match map.get("readmes_entry") {
            None | Some(Value::Null) => None,
            Some(v @ Value::Object(_)) => Some(v.clone()),
            Some(_) => bail!("job readmes_entry must be an object or null"),
        };

        let mut dispatched_at = map
            .get("dispatched_at")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if dispatched_at <= 0.0 {
            dispatched_at = unix_now_secs();
        }

        Ok(Self {
            version,
            sha1,
            wad_entry,
            idgames_entry,
            readmes_entry,
            dispatched_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHA1: &str = "0000e0b4993f0b7130fc3b58abf996bbb4acb287";

    #[test]
    fn subject_round_trip() {
        let subject = subjects::meta(SHA1);
        assert_eq!(subject, format!("dorch.wad.{SHA1}.meta"));
        assert_eq!(sha1_from_subject(&subject).as_deref(), Some(SHA1));
    }

    #[test]
    fn subject_rejects_wrong_suffix_and_shape() {
        assert_eq!(sha1_from_subject("dorch.wad.abc.img"), None);
        assert_eq!(sha1_from_subject("dorch.meta"), None);
        assert_eq!(sha1_from_subject(&subjects::meta("tooshort")), None);
    }

    #[test]
    fn images_subject_round_trip() {
        let id = uuid::Uuid::new_v4();
        let subject = subjects::images(id);
        assert_eq!(wad_id_from_subject(&subject), Some(id));
        assert_eq!(wad_id_from_subject("dorch.wad.not-a-uuid.img"), None);
    }

    #[test]
    fn job_encode_decode_identity() {
        let job = MetaJob::new(
            SHA1.to_string(),
            json!({"type": "PWAD", "size": 1234}),
            Some(json!({"content": {"title": "Entryway"}})),
            None,
        );
        let decoded = MetaJob::from_bytes(&job.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.sha1, job.sha1);
        assert_eq!(decoded.wad_entry, job.wad_entry);
        assert_eq!(decoded.idgames_entry, job.idgames_entry);
        assert_eq!(decoded.readmes_entry, None);
        assert_eq!(decoded.dispatched_at, job.dispatched_at);
    }

    #[test]
    fn job_decode_rejects_bad_payloads() {
        assert!(MetaJob::from_bytes(b"[1, 2, 3]").is_err());
        assert!(MetaJob::from_bytes(b"not json").is_err());

        let bad_sha = json!({"version": 1, "sha1": "not-a-hash", "wad_entry": {}});
        assert!(MetaJob::from_bytes(&serde_json::to_vec(&bad_sha).unwrap()).is_err());

        let bad_entry = json!({"version": 1, "sha1": SHA1, "wad_entry": "nope"});
        assert!(MetaJob::from_bytes(&serde_json::to_vec(&bad_entry).unwrap()).is_err());
    }

    #[test]
    fn job_decode_backfills_dispatched_at() {
        let raw = json!({"version": 1, "sha1": SHA1, "wad_entry": {}, "dispatched_at": 0.0});
        let decoded = MetaJob::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert!(decoded.dispatched_at > 0.0);
    }

    #[test]
    fn message_id_layout() {
        assert_eq!(meta_message_id(SHA1), format!("dorch-meta:{SHA1}"));
    }
}
