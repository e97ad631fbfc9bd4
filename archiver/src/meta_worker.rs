//! Durable pull consumer for `dorch.wad.*.meta` jobs.
//!
//! Per job: materialize the artifact (cache, then object store), hash and
//! verify it, extract metadata and per-map stats, merge, and PUT the
//! record to the catalog. Failures NAK for redelivery until the delivery
//! cap, then ACK to keep poison messages out of the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_nats::jetstream::{self, AckKind, consumer::PullConsumer};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use dorch_common::cache::WadCache;
use dorch_common::metrics::maybe_spawn_metrics_server;
use dorch_common::shutdown::shutdown_signal;
use dorch_common::streams::{
    self, META_SUBJECTS, MetaJob, ensure_stream, sha1_from_subject,
};
use dorch_wadmeta::extract::{ExtractedMeta, UnknownMeta, extract_from_bytes};
use dorch_wadmeta::stats::{MapSummary, dedupe_map_stats_keep_last, extract_map_stats, merge_map_stats};
use dorch_wadmeta::zip::wads_in_zip;
use dorch_wadmeta::{
    MergeInputs, build_merged_record, compute_hashes, ext_for_type, is_zip_ext,
    validate_expected_hashes,
};

use crate::args::MetaWorkerArgs;
use crate::catalog::WadinfoClient;
use crate::metrics;
use crate::renderer::run_renderer;
use crate::store::{ResolvedKey, WadStore};

/// A failed job, tagged for metrics and logs.
struct JobFailure {
    kind: &'static str,
    error: anyhow::Error,
}

impl JobFailure {
    fn new(kind: &'static str, error: anyhow::Error) -> Self {
        Self { kind, error }
    }
}

struct MetaContext {
    store: WadStore,
    cache: Option<WadCache>,
    catalog: WadinfoClient,
    args: MetaWorkerArgs,
}

pub async fn run_meta_worker(args: MetaWorkerArgs) -> Result<()> {
    maybe_spawn_metrics_server(&args.metrics);

    let store = WadStore::new(&args.store).await?;
    tracing::info!(bucket = %args.store.wad_bucket, "connected to object store");

    let cache = if args.cache_enabled {
        WadCache::connect(&args.redis).await
    } else {
        None
    };
    if cache.is_some() {
        tracing::info!("wad byte cache enabled");
    }

    let catalog = WadinfoClient::new(&args.catalog.wadinfo_base_url);

    let client = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");

    let jetstream = jetstream::new(client.clone());
    let stream = ensure_stream(&jetstream, &args.stream_name, &[META_SUBJECTS]).await?;

    let consumer: PullConsumer = stream
        .get_or_create_consumer(
            &args.durable,
            jetstream::consumer::pull::Config {
                durable_name: Some(args.durable.clone()),
                filter_subject: META_SUBJECTS.to_string(),
                ..Default::default()
            },
        )
        .await
        .context("failed to create consumer")?;
    tracing::info!(
        stream = %args.stream_name,
        durable = %args.durable,
        "consumer ready"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    dorch_common::signal_ready();

    let fetch_timeout = Duration::from_secs_f64(args.fetch_timeout);
    let batch = args.batch;
    let max_deliveries = args.max_deliveries;
    let ctx = Arc::new(MetaContext {
        store,
        cache,
        catalog,
        args,
    });

    'outer: while !cancel.is_cancelled() {
        let mut messages = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = async {
                consumer
                    .fetch()
                    .max_messages(batch)
                    .expires(fetch_timeout)
                    .messages()
                    .await
            } => match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "fetch failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            }
        };

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                next = messages.next() => match next {
                    // An exhausted or timed-out fetch is normal; pull again.
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "error receiving message");
                        break;
                    }
                    Some(Ok(message)) => message,
                }
            };

            let started = Instant::now();
            metrics::meta_in_progress_inc();

            let mut job = match MetaJob::from_bytes(&message.payload) {
                Ok(job) => job,
                Err(e) => {
                    // Protocol invariant violated: drop, never redeliver.
                    tracing::error!(error = %e, "invalid job payload, dropping");
                    metrics::meta_job_result("failure");
                    metrics::meta_exception("DecodeError");
                    ack_or_log(&message, AckKind::Ack).await;
                    metrics::meta_in_progress_dec();
                    continue;
                }
            };

            // The subject's embedded hash is the source of truth.
            if let Some(subject_sha1) = sha1_from_subject(message.subject.as_str()) {
                if subject_sha1 != job.sha1 {
                    tracing::warn!(
                        payload = %job.sha1,
                        subject = %subject_sha1,
                        "sha1 mismatch, preferring subject"
                    );
                    job.sha1 = subject_sha1;
                }
            }

            let sha1 = job.sha1.clone();
            tracing::info!(sha1 = %sha1, "processing meta job");

            let mut work = tokio::spawn(handle_meta_job(ctx.clone(), job));
            tokio::select! {
                _ = cancel.cancelled() => {
                    // NAK first so the broker redelivers promptly, then
                    // abandon the in-flight work.
                    ack_or_log(&message, AckKind::Nak(None)).await;
                    work.abort();
                    metrics::meta_job_result("aborted");
                    metrics::meta_in_progress_dec();
                    break 'outer;
                }
                finished = &mut work => {
                    let result = finished.unwrap_or_else(|e| {
                        Err(JobFailure::new("Panic", anyhow!("job task failed: {e}")))
                    });
                    match result {
                        Ok(()) => {
                            ack_or_log(&message, AckKind::Ack).await;
                            metrics::meta_job_result("success");
                        }
                        Err(failure) => {
                            tracing::error!(
                                sha1 = %sha1,
                                kind = failure.kind,
                                error = ?failure.error,
                                "meta job failed"
                            );
                            metrics::meta_job_result("failure");
                            metrics::meta_exception(failure.kind);

                            let delivered =
                                message.info().map(|info| info.delivered).unwrap_or(0);
                            if delivered >= max_deliveries {
                                tracing::warn!(
                                    sha1 = %sha1,
                                    delivered,
                                    "delivery cap reached, dropping job"
                                );
                                ack_or_log(&message, AckKind::Ack).await;
                            } else {
                                ack_or_log(&message, AckKind::Nak(None)).await;
                            }
                        }
                    }
                    metrics::meta_job_duration(started.elapsed().as_secs_f64());
                    metrics::meta_in_progress_dec();
                }
            }
        }
    }

    tracing::info!("meta worker stopping");
    if cancel.is_cancelled() {
        let _ = tokio::time::timeout(streams::flush_timeout(), client.flush()).await;
    } else {
        client.drain().await.context("failed to drain connection")?;
    }
    Ok(())
}

async fn ack_or_log(message: &jetstream::Message, kind: AckKind) {
    if let Err(e) = message.ack_with(kind).await {
        tracing::error!(error = %e, "failed to ack message");
    }
}

enum Materialized {
    Bytes(Vec<u8>),
    /// The object exists but its content is unusable; carry the reason.
    Corrupt(String),
}

/// Get the decompressed artifact bytes: cache first, then download and
/// gunzip through a scratch dir. Transient store errors propagate;
/// content-level failures come back as `Corrupt`.
async fn materialize(
    ctx: &MetaContext,
    sha1: &str,
    ext: &str,
    key: &str,
) -> Result<Materialized> {
    if let Some(cache) = &ctx.cache {
        if let Some(bytes) = cache.get(sha1).await {
            tracing::debug!(sha1 = %sha1, size = bytes.len(), "cache hit");
            return Ok(Materialized::Bytes(bytes));
        }
    }

    let scratch = tempfile::Builder::new()
        .prefix("dorch_meta_")
        .tempdir()
        .context("failed to create scratch dir")?;
    let gz_path = scratch.path().join(format!("{sha1}.{ext}.gz"));
    let file_path = scratch.path().join(format!("{sha1}.{ext}"));

    ctx.store.download(key, &gz_path).await?;

    let decompress = {
        let gz_path = gz_path.clone();
        let file_path = file_path.clone();
        tokio::task::spawn_blocking(move || crate::store::gunzip_file(&gz_path, &file_path))
            .await
            .context("decompression task failed")?
    };
    if let Err(e) = decompress {
        return Ok(Materialized::Corrupt(format!("Decompress failed: {e:#}")));
    }

    let bytes = tokio::fs::read(&file_path)
        .await
        .context("failed to read decompressed file")?;

    if let Some(cache) = &ctx.cache {
        cache.put(sha1, &bytes).await;
    }
    Ok(Materialized::Bytes(bytes))
}

async fn handle_meta_job(ctx: Arc<MetaContext>, job: MetaJob) -> Result<(), JobFailure> {
    let sha1 = job.sha1.clone();
    let wad_type = job
        .wad_entry
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    let ext = ext_for_type(wad_type);

    let expected_hashes = job
        .wad_entry
        .get("hashes")
        .cloned()
        .unwrap_or(Value::Null);
    let expected_sha256 = expected_hashes
        .get("sha256")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let resolved = ctx
        .store
        .resolve_key(&sha1, ext, &job.wad_entry)
        .await
        .map_err(|e| JobFailure::new("StoreError", e))?;

    let (s3_url, extracted, maps, integrity, sha256) = match resolved {
        ResolvedKey::NotFound { tried_prefixes } => {
            // Unresolvable files still produce a record for debugging.
            let extracted = ExtractedMeta::Unknown(UnknownMeta {
                error: "Could not resolve object key (layout/prefix mismatch).".to_string(),
                tried_prefixes: Some(tried_prefixes),
                expected_ext: Some(ext.to_string()),
                ..Default::default()
            });
            (None, extracted, Vec::new(), None, expected_sha256)
        }
        ResolvedKey::Found(key) => {
            let s3_url = ctx.store.url_for_key(&key);
            match materialize(&ctx, &sha1, ext, &key)
                .await
                .map_err(|e| JobFailure::new("StoreError", e))?
            {
                Materialized::Corrupt(reason) => {
                    let extracted = ExtractedMeta::unknown(reason);
                    (Some(s3_url), extracted, Vec::new(), None, expected_sha256)
                }
                Materialized::Bytes(bytes) => {
                    let ext_owned = ext.to_string();
                    let (computed, extracted, maps) =
                        tokio::task::spawn_blocking(move || {
                            let computed = compute_hashes(&bytes);
                            let extracted = extract_from_bytes(&bytes, &ext_owned);
                            let maps = per_map_stats(&bytes, &ext_owned);
                            (computed, extracted, maps)
                        })
                        .await
                        .map_err(|e| {
                            JobFailure::new("Panic", anyhow!("parse task failed: {e}"))
                        })?;

                    let integrity = expected_hashes
                        .is_object()
                        .then(|| validate_expected_hashes(&expected_hashes, &computed));
                    let sha256 = Some(computed.sha256.clone());
                    (Some(s3_url), extracted, maps, integrity, sha256)
                }
            }
        }
    };

    let record = build_merged_record(&MergeInputs {
        sha1: &sha1,
        sha256: sha256.as_deref(),
        s3_url: s3_url.as_deref(),
        extracted: &extracted,
        wad_entry: &job.wad_entry,
        idgames_entry: job.idgames_entry.as_ref(),
        readmes_entry: job.readmes_entry.as_ref(),
        integrity: integrity.as_ref(),
    });
    let body = json!({"meta": record, "maps": maps});

    if ctx.args.catalog.post_to_wadinfo {
        ctx.catalog
            .put_wad(&sha1, &body)
            .await
            .map_err(|e| JobFailure::new("CatalogError", e))?;
        tracing::info!(sha1 = %sha1, maps = maps_len(&body), "record posted");
    }

    if ctx.args.render_screenshots {
        // Best-effort: rendering problems never fail the metadata job.
        match run_renderer(&ctx.args.screenshots, ("--sha1", sha1.as_str())).await {
            Ok(outcome) if outcome.ok => {
                tracing::info!(sha1 = %sha1, "screenshots rendered");
            }
            Ok(outcome) => {
                tracing::warn!(
                    sha1 = %sha1,
                    kind = %outcome.kind,
                    message = %outcome.message,
                    "screenshot rendering failed"
                );
            }
            Err(e) => {
                tracing::warn!(sha1 = %sha1, error = %e, "could not run renderer");
            }
        }
    }

    Ok(())
}

pub(crate) fn per_map_stats(bytes: &[u8], ext: &str) -> Vec<MapSummary> {
    if ext == "wad" {
        extract_map_stats(bytes)
    } else if is_zip_ext(ext) {
        let lists = wads_in_zip(bytes)
            .into_iter()
            .map(|(_, wad_buf)| extract_map_stats(&wad_buf))
            .collect();
        dedupe_map_stats_keep_last(merge_map_stats(lists))
    } else {
        Vec::new()
    }
}

fn maps_len(body: &Value) -> usize {
    body.get("maps")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_cap_decision() {
        // The ACK/NAK choice is pure arithmetic on the delivery count.
        let max_deliveries = 3i64;
        for (delivered, expect_drop) in [(1, false), (2, false), (3, true), (4, true)] {
            assert_eq!(delivered >= max_deliveries, expect_drop);
        }
    }

    #[test]
    fn per_map_stats_ignores_foreign_extensions() {
        assert!(per_map_stats(b"whatever", "wad2").is_empty());
        assert!(per_map_stats(b"junk", "wad").is_empty());
    }
}
