//! Durable pull consumer for `dorch.wad.*.img` jobs.
//!
//! The payload is a catalog wad UUID. All real work happens in the
//! renderer subprocess; this loop only classifies its outcome, uploads
//! nothing itself, and posts the per-map image URL lists it reports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_nats::jetstream::{self, AckKind, consumer::PullConsumer};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dorch_common::metrics::maybe_spawn_metrics_server;
use dorch_common::shutdown::shutdown_signal;
use dorch_common::streams::{self, IMAGES_SUBJECTS, ensure_stream, wad_id_from_subject};

use crate::args::ImageWorkerArgs;
use crate::catalog::WadinfoClient;
use crate::metrics;
use crate::renderer::run_renderer;

struct ImageContext {
    catalog: WadinfoClient,
    args: ImageWorkerArgs,
}

/// How one image job ended.
enum JobOutcome {
    Done,
    NoMaps,
    /// The renderer failed; retryable failures NAK up to the cap.
    Failed { kind: String, retry: bool },
}

pub async fn run_image_worker(args: ImageWorkerArgs) -> Result<()> {
    maybe_spawn_metrics_server(&args.metrics);

    let catalog = WadinfoClient::new(&args.catalog.wadinfo_base_url);

    let client = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");

    let jetstream = jetstream::new(client.clone());
    let stream = ensure_stream(&jetstream, &args.stream_name, &[IMAGES_SUBJECTS]).await?;

    let consumer: PullConsumer = stream
        .get_or_create_consumer(
            &args.durable,
            jetstream::consumer::pull::Config {
                durable_name: Some(args.durable.clone()),
                filter_subject: IMAGES_SUBJECTS.to_string(),
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
    let ctx = Arc::new(ImageContext { catalog, args });

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
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "error receiving message");
                        break;
                    }
                    Some(Ok(message)) => message,
                }
            };

            let started = Instant::now();
            metrics::screenshot_in_progress_inc();

            let Some(wad_id) = decode_wad_id(&message) else {
                tracing::error!(
                    subject = %message.subject,
                    "invalid wad_id payload, dropping"
                );
                metrics::screenshot_job_result("failure");
                metrics::screenshot_exception("InvalidWadId");
                ack_or_log(&message, AckKind::Ack).await;
                metrics::screenshot_in_progress_dec();
                continue;
            };
            tracing::info!(wad_id = %wad_id, "processing image job");

            let mut work = tokio::spawn(handle_image_job(ctx.clone(), wad_id));
            tokio::select! {
                _ = cancel.cancelled() => {
                    ack_or_log(&message, AckKind::Nak(None)).await;
                    // Aborting drops the subprocess future, which kills
                    // the renderer (kill_on_drop).
                    work.abort();
                    metrics::screenshot_job_result("aborted");
                    metrics::screenshot_in_progress_dec();
                    break 'outer;
                }
                finished = &mut work => {
                    let outcome = finished.unwrap_or_else(|e| {
                        Err(anyhow!("job task failed: {e}"))
                    });
                    match outcome {
                        Ok(JobOutcome::Done) => {
                            ack_or_log(&message, AckKind::Ack).await;
                            metrics::screenshot_job_result("success");
                        }
                        Ok(JobOutcome::NoMaps) => {
                            metrics::screenshot_no_maps();
                            ack_or_log(&message, AckKind::Ack).await;
                            metrics::screenshot_job_result("success");
                        }
                        Ok(JobOutcome::Failed { kind, retry }) => {
                            metrics::screenshot_job_result("failure");
                            metrics::screenshot_exception(&kind);
                            let delivered =
                                message.info().map(|info| info.delivered).unwrap_or(0);
                            if !retry || delivered >= max_deliveries {
                                tracing::warn!(
                                    wad_id = %wad_id,
                                    kind = %kind,
                                    delivered,
                                    "abandoning image job"
                                );
                                ack_or_log(&message, AckKind::Ack).await;
                            } else {
                                ack_or_log(&message, AckKind::Nak(None)).await;
                            }
                        }
                        Err(e) => {
                            tracing::error!(wad_id = %wad_id, error = ?e, "image job failed");
                            metrics::screenshot_job_result("failure");
                            metrics::screenshot_exception("JobError");
                            let delivered =
                                message.info().map(|info| info.delivered).unwrap_or(0);
                            if delivered >= max_deliveries {
                                ack_or_log(&message, AckKind::Ack).await;
                            } else {
                                ack_or_log(&message, AckKind::Nak(None)).await;
                            }
                        }
                    }
                    metrics::screenshot_job_duration(started.elapsed().as_secs_f64());
                    metrics::screenshot_in_progress_dec();
                }
            }
        }
    }

    tracing::info!("image worker stopping");
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

/// The payload is the UUID as a string, possibly JSON-quoted. The
/// subject's embedded id wins on disagreement.
fn decode_wad_id(message: &jetstream::Message) -> Option<Uuid> {
    let payload = String::from_utf8_lossy(&message.payload);
    let payload_id = Uuid::parse_str(payload.trim().trim_matches('"')).ok();
    match (wad_id_from_subject(message.subject.as_str()), payload_id) {
        (Some(subject_id), Some(payload_id)) if subject_id != payload_id => {
            tracing::warn!(
                payload = %payload_id,
                subject = %subject_id,
                "wad_id mismatch, preferring subject"
            );
            Some(subject_id)
        }
        (Some(subject_id), _) => Some(subject_id),
        (None, payload_id) => payload_id,
    }
}

async fn handle_image_job(ctx: Arc<ImageContext>, wad_id: Uuid) -> Result<JobOutcome> {
    let wad_id_arg = wad_id.to_string();
    let outcome = run_renderer(&ctx.args.screenshots, ("--wad-id", &wad_id_arg)).await?;

    if !outcome.ok {
        tracing::warn!(
            wad_id = %wad_id,
            kind = %outcome.kind,
            retry = outcome.retry,
            message = %outcome.message,
            "renderer failed"
        );
        if !outcome.stderr_tail.trim().is_empty() {
            tracing::warn!(wad_id = %wad_id, tail = %outcome.stderr_tail, "renderer stderr tail");
        }
        return Ok(JobOutcome::Failed {
            kind: outcome.kind,
            retry: outcome.retry,
        });
    }

    let Some(map_images) = outcome.map_images else {
        tracing::info!(wad_id = %wad_id, "no renderable maps");
        return Ok(JobOutcome::NoMaps);
    };

    for (map_name, items) in &map_images {
        if !items.is_array() {
            tracing::warn!(wad_id = %wad_id, map = %map_name, "skipping non-array image list");
            continue;
        }
        ctx.catalog
            .put_map_images(wad_id, map_name, items)
            .await?;
        tracing::info!(
            wad_id = %wad_id,
            map = %map_name,
            images = items.as_array().map(Vec::len).unwrap_or(0),
            "map images posted"
        );
    }
    Ok(JobOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_cap_logic() {
        let max_deliveries = 3i64;
        // Non-retryable failures drop regardless of the count.
        for (retry, delivered, expect_drop) in
            [(false, 1, true), (true, 2, false), (true, 3, true)]
        {
            assert_eq!(!retry || delivered >= max_deliveries, expect_drop);
        }
    }
}
