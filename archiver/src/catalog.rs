//! HTTP client for the downstream wadinfo catalog service.
//!
//! Writes are idempotent by file hash / map name, so at-least-once job
//! delivery is safe against this API.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use uuid::Uuid;

fn wadinfo_timeout() -> Duration {
    let secs = std::env::var("DORCH_WADINFO_TIMEOUT")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(10.0);
    Duration::from_secs_f64(secs)
}

#[derive(Clone)]
pub struct WadinfoClient {
    client: reqwest::Client,
    base_url: String,
}

impl WadinfoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(wadinfo_timeout())
            .build()
            .expect("build wadinfo http client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `PUT {base}/wad/{sha1}` with the merged record.
    pub async fn put_wad(&self, sha1: &str, record: &Value) -> Result<()> {
        let url = format!("{}/wad/{sha1}", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(record)
            .send()
            .await
            .context("failed to send wad record to wadinfo")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("wadinfo rejected wad record: {status} - {body}");
        }
        Ok(())
    }

    /// `PUT {base}/wad/{wad_id}/maps/{map_name}/images` with the image
    /// URL list for one map.
    pub async fn put_map_images(
        &self,
        wad_id: Uuid,
        map_name: &str,
        items: &Value,
    ) -> Result<()> {
        let map_name = map_name.trim();
        if map_name.is_empty() {
            anyhow::bail!("map_name must be non-empty");
        }
        let url = format!("{}/wad/{wad_id}/maps/{map_name}/images", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(items)
            .send()
            .await
            .context("failed to send map images to wadinfo")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("wadinfo rejected map images: {status} - {body}");
        }
        Ok(())
    }
}
