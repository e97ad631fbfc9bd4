//! Dispatch: one metadata job per primary-index file hash.

use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, message::PublishMessage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use dorch_common::shutdown::shutdown_signal;
use dorch_common::streams::{
    self, META_SUBJECTS, MetaJob, ensure_stream, meta_message_id, subjects,
};

use crate::args::DispatchArgs;
use crate::indices;

pub async fn run_dispatch(args: DispatchArgs) -> Result<()> {
    let wads = indices::load_index(&args.wads_json, "wads.json").await?;
    let idgames = indices::load_index(&args.idgames_json, "idgames.json").await?;
    let readmes = match &args.readmes_json {
        Some(path) => indices::load_index_lenient(path, "readmes.json").await?,
        None => Vec::new(),
    };
    tracing::info!(
        wads = wads.len(),
        idgames = idgames.len(),
        readmes = readmes.len(),
        "indices loaded"
    );

    let wad_sha1s = indices::known_sha1s(&wads);
    let id_lookup = indices::build_idgames_lookup(&idgames, &wad_sha1s);
    let readmes_lookup = indices::build_readmes_lookup(&readmes);
    tracing::info!(
        linked_idgames = id_lookup.len(),
        linked_readmes = readmes_lookup.len(),
        "cross-reference lookups built"
    );

    let client = args.nats.connect().await?;
    tracing::info!(url = %args.nats.nats_url, "connected to NATS");

    let jetstream = jetstream::new(client.clone());
    ensure_stream(&jetstream, &args.stream_name, &[META_SUBJECTS]).await?;
    tracing::info!(stream = %args.stream_name, "stream ready");

    // A signal mid-run flips the flag; the loop checks it before every
    // publish and the teardown switches from drain to a bounded flush.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let total = wads.len();
    let start = args.start.min(total);
    let end = if args.limit == 0 {
        total
    } else {
        total.min(start + args.limit)
    };

    let mut published = 0usize;
    for entry in &wads[start..end] {
        if cancel.is_cancelled() {
            break;
        }

        let Some(sha1) = entry
            .get("_id")
            .and_then(Value::as_str)
            .and_then(dorch_common::canonical_sha1)
        else {
            continue;
        };

        if let Some(needle) = &args.smoke_test_id {
            if !sha1.contains(needle) {
                continue;
            }
        }

        let job = MetaJob::new(
            sha1.clone(),
            entry.clone(),
            id_lookup.get(&sha1).cloned(),
            readmes_lookup.get(&sha1).cloned(),
        );

        let publish = PublishMessage::build()
            .payload(job.to_bytes()?)
            .message_id(meta_message_id(&sha1));
        let ack = tokio::time::timeout(
            streams::publish_timeout(),
            async {
                jetstream
                    .send_publish(subjects::meta(&sha1), publish)
                    .await
                    .context("failed to publish job")?
                    .await
                    .context("failed to get publish ack")
            },
        )
        .await
        .with_context(|| format!("publish timed out for {sha1}"))?;
        ack?;

        published += 1;
        tracing::debug!(sha1 = %sha1, "dispatched");

        if args.sleep > 0.0 {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs_f64(args.sleep)) => {}
            }
        }
    }

    tracing::info!(
        published,
        stream = %args.stream_name,
        "dispatch complete"
    );

    if cancel.is_cancelled() {
        // Fast exit: bounded flush, then drop the connection.
        let _ = tokio::time::timeout(streams::flush_timeout(), client.flush()).await;
    } else {
        client.drain().await.context("failed to drain connection")?;
    }
    Ok(())
}
