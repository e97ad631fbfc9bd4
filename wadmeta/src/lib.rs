//! Parsing and merging core for the dorch pipeline.
//!
//! Everything in this crate operates on byte buffers and JSON values; no
//! network or queue I/O. The archiver binary feeds it downloaded,
//! decompressed artifacts and index entries, and gets back extracted
//! metadata, per-map statistics, and the merged catalog record.

pub mod extract;
pub mod merge;
pub mod stats;
pub mod text;
pub mod wad;
pub mod zip;

pub use extract::{ExtractedMeta, extract_from_bytes, extract_from_wad_bytes};
pub use merge::{
    ComputedHashes, Integrity, MergeInputs, build_merged_record, compute_hashes,
    validate_expected_hashes,
};
pub use stats::{MapSummary, dedupe_map_stats_keep_last, extract_map_stats, merge_map_stats};

/// Map the primary index's declared container type onto the on-disk file
/// extension. Unknown types fall back to `wad`.
pub fn ext_for_type(container_type: &str) -> &'static str {
    match container_type.to_ascii_uppercase().as_str() {
        "IWAD" | "PWAD" | "ZWAD" => "wad",
        "WAD2" => "wad2",
        "WAD3" => "wad3",
        "PK3" => "pk3",
        "PK7" => "pk7",
        "PKZ" => "pkz",
        "EPK" => "epk",
        "PKE" => "pke",
        _ => "wad",
    }
}

/// Zip-family container extensions.
pub fn is_zip_ext(ext: &str) -> bool {
    matches!(ext, "pk3" | "pk7" | "pkz" | "epk" | "pke")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_to_ext_mapping() {
        assert_eq!(ext_for_type("IWAD"), "wad");
        assert_eq!(ext_for_type("pk3"), "pk3");
        assert_eq!(ext_for_type("UNKNOWN"), "wad");
        assert_eq!(ext_for_type(""), "wad");
        assert!(is_zip_ext("pk7"));
        assert!(!is_zip_ext("wad"));
    }
}
