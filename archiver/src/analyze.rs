//! Offline analysis of one local container file, no queue or store.

use anyhow::{Context, Result};
use serde_json::json;

use dorch_wadmeta::extract_from_bytes;
use dorch_wadmeta::merge::prune_nulls;

use crate::args::AnalyzeArgs;
use crate::meta_worker::per_map_stats;

pub fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let ext = match &args.ext {
        Some(ext) => ext.trim_start_matches('.').to_lowercase(),
        None => args
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wad")
            .to_lowercase(),
    };

    let extracted = extract_from_bytes(&bytes, &ext);
    let maps = per_map_stats(&bytes, &ext);

    let out = prune_nulls(json!({
        "file": args.path,
        "file_size": bytes.len(),
        "extracted": extracted,
        "maps": maps,
    }));

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&out)?
    } else {
        serde_json::to_string(&out)?
    };
    println!("{rendered}");
    Ok(())
}
