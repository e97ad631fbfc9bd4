//! Renderer subprocess isolation.
//!
//! The renderer's only output channel is a single JSON object on stdout:
//! `{ok, retry, kind, message, map_images?}`. Its stderr is streamed
//! through to ours while the last 4 KiB are kept as a diagnostic tail.
//! Crashes and timeouts are classified retryable; the renderer itself
//! marks deterministic failures (`retry: false`).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::args::ScreenshotArgs;

pub const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug)]
pub struct RendererOutcome {
    pub ok: bool,
    pub retry: bool,
    pub kind: String,
    pub message: String,
    /// map name -> [{url, type?}]
    pub map_images: Option<Map<String, Value>>,
    pub stderr_tail: String,
}

impl RendererOutcome {
    fn failure(kind: &str, message: String, retry: bool, stderr_tail: String) -> Self {
        Self {
            ok: false,
            retry,
            kind: kind.to_string(),
            message,
            map_images: None,
            stderr_tail,
        }
    }
}

/// Ring buffer keeping the last N bytes written into it.
struct TailBuf {
    bytes: Vec<u8>,
    cap: usize,
}

impl TailBuf {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
        }
    }

    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.cap {
            let drop = self.bytes.len() - self.cap;
            self.bytes.drain(..drop);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Run the renderer for one target, bounded by `timeout`.
///
/// `target` is the renderer CLI flag pair, e.g. `("--wad-id", uuid)` for
/// image jobs or `("--sha1", hash)` for inline meta-worker rendering.
pub async fn run_renderer(
    screenshots: &ScreenshotArgs,
    target: (&str, &str),
) -> Result<RendererOutcome> {
    let timeout = Duration::from_secs_f64(screenshots.render_timeout);

    let mut child = Command::new(&screenshots.renderer_bin)
        .arg(target.0)
        .arg(target.1)
        .env(
            "DORCH_SCREENSHOT_WIDTH",
            screenshots.screenshot_width.to_string(),
        )
        .env(
            "DORCH_SCREENSHOT_HEIGHT",
            screenshots.screenshot_height.to_string(),
        )
        .env(
            "DORCH_SCREENSHOT_COUNT",
            screenshots.screenshot_count.to_string(),
        )
        .env("DORCH_PANORAMA", screenshots.panorama.to_string())
        .env("DORCH_IMAGES_BUCKET", &screenshots.images_bucket)
        .env("DORCH_IMAGES_ENDPOINT", &screenshots.images_endpoint)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn renderer {}", screenshots.renderer_bin))?;

    let mut stdout = child.stdout.take().context("renderer stdout missing")?;
    let mut stderr = child.stderr.take().context("renderer stderr missing")?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });

    // Stream stderr through to ours while keeping the tail.
    let stderr_task = tokio::spawn(async move {
        let mut tail = TailBuf::new(STDERR_TAIL_BYTES);
        let mut chunk = [0u8; 4096];
        let mut our_stderr = tokio::io::stderr();
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = our_stderr.write_all(&chunk[..n]).await;
                    tail.extend(&chunk[..n]);
                }
            }
        }
        tail.into_string()
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("failed to wait on renderer")?,
        Err(_) => {
            let _ = child.kill().await;
            let stderr_tail = stderr_task.await.unwrap_or_default();
            return Ok(RendererOutcome::failure(
                "Timeout",
                format!("renderer timed out after {}s", screenshots.render_timeout),
                true,
                stderr_tail,
            ));
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Ok(RendererOutcome::failure(
            "RendererCrashed",
            format!("renderer exit={}", status.code().unwrap_or(-1)),
            true,
            stderr_tail,
        ));
    }

    let stdout_text = String::from_utf8_lossy(&stdout_bytes);
    let parsed: Value = match serde_json::from_str(stdout_text.trim()) {
        Ok(value) => value,
        Err(e) => {
            return Ok(RendererOutcome::failure(
                "BadRendererOutput",
                format!("invalid renderer JSON: {e}"),
                true,
                stderr_tail,
            ));
        }
    };
    let Value::Object(obj) = parsed else {
        return Ok(RendererOutcome::failure(
            "BadRendererOutput",
            "renderer JSON must be an object".to_string(),
            true,
            stderr_tail,
        ));
    };

    let map_images = match obj.get("map_images") {
        Some(Value::Object(map)) => Some(map.clone()),
        _ => None,
    };

    Ok(RendererOutcome {
        ok: obj.get("ok").and_then(Value::as_bool).unwrap_or(false),
        retry: obj.get("retry").and_then(Value::as_bool).unwrap_or(true),
        kind: obj
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("RendererError")
            .to_string(),
        message: obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        map_images,
        stderr_tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_buf_keeps_only_the_end() {
        let mut tail = TailBuf::new(8);
        tail.extend(b"0123456789");
        tail.extend(b"abcd");
        assert_eq!(tail.into_string(), "6789abcd");
    }
}
