//! Best-effort metadata extraction from a single container file.

use serde::{Deserialize, Serialize};

use crate::text::{extract_text_lumps, harvest_text};
use crate::wad::{WadError, detect_maps, parse_wad_directory};
use crate::{is_zip_ext, zip};

/// What we learned from one container, tagged by container format.
///
/// `Unknown` is a value, not an error: corrupt or unresolvable files
/// still produce a record downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExtractedMeta {
    Wad(WadMeta),
    Zip(ZipMeta),
    Unknown(UnknownMeta),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WadMeta {
    pub lump_count: usize,
    pub maps: Vec<String>,
    pub text_lumps: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

/// A WAD found inside a zip-family container, keyed by its archive path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedWad {
    pub path: String,
    #[serde(flatten)]
    pub meta: ExtractedMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipTextFile {
    pub path: String,
    pub size: u64,
    pub contents: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZipMeta {
    pub embedded_wads: Vec<EmbeddedWad>,
    pub text_files: Vec<ZipTextFile>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnknownMeta {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tried_prefixes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<usize>,
}

impl ExtractedMeta {
    pub fn unknown(error: impl Into<String>) -> Self {
        Self::Unknown(UnknownMeta {
            error: error.into(),
            ..Default::default()
        })
    }

    pub fn names(&self) -> &[String] {
        match self {
            Self::Wad(m) => &m.names,
            Self::Zip(m) => &m.names,
            Self::Unknown(_) => &[],
        }
    }

    pub fn authors(&self) -> &[String] {
        match self {
            Self::Wad(m) => &m.authors,
            Self::Zip(m) => &m.authors,
            Self::Unknown(_) => &[],
        }
    }

    pub fn descriptions(&self) -> &[String] {
        match self {
            Self::Wad(m) => &m.descriptions,
            Self::Zip(m) => &m.descriptions,
            Self::Unknown(_) => &[],
        }
    }

    /// Map markers, only known for classic containers.
    pub fn maps(&self) -> Option<&[String]> {
        match self {
            Self::Wad(m) => Some(&m.maps),
            _ => None,
        }
    }
}

/// Decode a classic container and harvest its text lumps.
pub fn extract_from_wad_bytes(buf: &[u8]) -> ExtractedMeta {
    let dir = match parse_wad_directory(buf) {
        Ok(dir) => dir,
        Err(WadError::BadSignature | WadError::TooSmall(_)) => {
            return ExtractedMeta::unknown(
                "Not a classic IWAD/PWAD header (or too small/corrupt)",
            );
        }
        Err(e) => return ExtractedMeta::unknown(e.to_string()),
    };

    let maps = detect_maps(&dir);
    let text_lumps = extract_text_lumps(buf, &dir.lumps);
    let harvest = harvest_text(&text_lumps);

    ExtractedMeta::Wad(WadMeta {
        lump_count: dir.lumps.len(),
        maps,
        text_lumps: text_lumps.into_iter().map(|(name, _)| name).collect(),
        names: harvest.names,
        authors: harvest.authors,
        descriptions: harvest.descriptions,
    })
}

/// Dispatch on the decompressed file's extension: classic container
/// first, then zip-family, else unknown.
pub fn extract_from_bytes(buf: &[u8], ext: &str) -> ExtractedMeta {
    let wad_meta = extract_from_wad_bytes(buf);
    if matches!(wad_meta, ExtractedMeta::Wad(_)) {
        return wad_meta;
    }

    if is_zip_ext(ext) {
        return zip::extract_from_zip(buf);
    }

    // A declared .wad that failed the header check: keep the decode error.
    if ext == "wad" {
        return wad_meta;
    }

    ExtractedMeta::Unknown(UnknownMeta {
        error: format!("Unhandled extension '{ext}'"),
        size: Some(buf.len()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wad::tests::build_wad;

    #[test]
    fn wad_extraction_reports_maps_and_text() {
        let mapinfo = br#"map MAP01 { levelname = "Hangar" author = "J.R." }"#;
        let wad = build_wad(&[
            ("MAPINFO", mapinfo),
            ("MAP01", b""),
            ("THINGS", b""),
            ("LINEDEFS", b""),
        ]);
        let ExtractedMeta::Wad(meta) = extract_from_wad_bytes(&wad) else {
            panic!("expected wad meta");
        };
        assert_eq!(meta.lump_count, 4);
        assert_eq!(meta.maps, vec!["MAP01"]);
        assert_eq!(meta.text_lumps, vec!["MAPINFO"]);
        assert_eq!(meta.names, vec!["Hangar"]);
        assert_eq!(meta.authors, vec!["J.R."]);
    }

    #[test]
    fn garbage_is_unknown_not_an_error() {
        let meta = extract_from_bytes(b"GARBAGE", "wad");
        let ExtractedMeta::Unknown(u) = meta else {
            panic!("expected unknown");
        };
        assert!(u.error.contains("IWAD/PWAD"));
    }

    #[test]
    fn unknown_extension_reports_note_shape() {
        let meta = extract_from_bytes(&[0u8; 64], "wad2");
        let ExtractedMeta::Unknown(u) = meta else {
            panic!("expected unknown");
        };
        assert!(u.error.contains("wad2"));
        assert_eq!(u.size, Some(64));
    }

    #[test]
    fn format_tag_serializes_lowercase() {
        let value = serde_json::to_value(extract_from_wad_bytes(b"nope")).unwrap();
        assert_eq!(value["format"], "unknown");
    }
}
