//! Conservative text harvesting from engine text lumps.
//!
//! This deliberately does not parse MAPINFO/DECORATE/etc grammars; it
//! scrapes a few well-known keywords and keeps DEHACKED-style patches as
//! description blobs.

use std::sync::LazyLock;

use regex::Regex;

use crate::wad::{Lump, read_lump};

/// Lumps worth scanning for human-readable metadata.
pub fn is_text_lump(name: &str) -> bool {
    matches!(
        name,
        "MAPINFO"
            | "ZMAPINFO"
            | "EMAPINFO"
            | "DMAPINFO"
            | "UMAPINFO"
            | "DEHACKED"
            | "BEX"
            | "SNDINFO"
            | "LANGUAGE"
            | "LOADACS"
            | "KEYCONF"
            | "ANIMDEFS"
            | "DECORATE"
            | "GLDEFS"
            | "SBARINFO"
            | "MENUDEF"
            | "CVARINFO"
            // Not really text, but occasionally readable; the size and
            // binary heuristics below weed out the rest.
            | "TEXTURE1"
            | "TEXTURE2"
    )
}

pub const MAX_TEXT_LUMP_BYTES: u32 = 256_000;
pub const DEHACKED_DESCRIPTION_BYTES: usize = 4_000;

static TRAILING_BLANKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("trailing blanks regex"));
static BLANK_RUNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank runs regex"));

static LEVELNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\blevelname\s*=\s*"([^"]+)""#).expect("levelname regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\btitle\s*=\s*"([^"]+)""#).expect("title regex"));
static AUTHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bauthor\s*=\s*"([^"]+)""#).expect("author regex"));

/// UTF-8 first, latin-1 as a last resort so no byte is ever lost.
pub fn decode_text_lossy(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Re-encode through latin-1 so bytes 128-255 stay visible (index files
/// store their text this way). Characters outside latin-1 become `?`.
pub fn expose_latin1(s: &str) -> String {
    let bytes: Vec<u8> = s
        .chars()
        .map(|c| if (c as u32) <= 0xFF { c as u32 as u8 } else { b'?' })
        .collect();
    decode_text_lossy(&bytes)
}

/// CRLF -> LF, trailing blanks trimmed, runs of 3+ newlines collapsed.
pub fn normalize_whitespace(s: &str) -> String {
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = TRAILING_BLANKS_RE.replace_all(&s, "\n");
    let s = BLANK_RUNS_RE.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Order-preserving dedupe of trimmed, non-empty strings.
pub fn uniq_preserve<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.as_ref().trim();
        if item.is_empty() || out.iter().any(|seen| seen == item) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

/// A NUL in the first 256 bytes marks a blob as binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(256)].contains(&0)
}

/// Pull decoded text out of the recognized text lumps, in directory
/// order. DEHACKED/BEX are exempt from the binary heuristic since
/// patches legitimately contain NULs.
pub fn extract_text_lumps(buf: &[u8], lumps: &[Lump]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for lump in lumps {
        let name = lump.name.to_uppercase();
        if !is_text_lump(&name) || lump.size == 0 || lump.size > MAX_TEXT_LUMP_BYTES {
            continue;
        }
        let chunk = read_lump(buf, lump);
        if looks_binary(chunk) && !matches!(name.as_str(), "DEHACKED" | "BEX") {
            continue;
        }
        let text = normalize_whitespace(&decode_text_lossy(chunk));
        if text.is_empty() {
            continue;
        }
        // Duplicate lump names keep their first position, last contents.
        match out.iter_mut().find(|(n, _)| n == &name) {
            Some(slot) => slot.1 = text,
            None => out.push((name, text)),
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct Harvest {
    pub names: Vec<String>,
    pub authors: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Keyword scrape across decoded text lumps.
pub fn harvest_text(blobs: &[(String, String)]) -> Harvest {
    let mut names = Vec::new();
    let mut authors = Vec::new();
    let mut descriptions = Vec::new();

    for (lump_name, text) in blobs {
        for caps in LEVELNAME_RE.captures_iter(text) {
            names.push(caps[1].trim().to_string());
        }
        for caps in TITLE_RE.captures_iter(text) {
            names.push(caps[1].trim().to_string());
        }
        for caps in AUTHOR_RE.captures_iter(text) {
            authors.push(caps[1].trim().to_string());
        }

        // A DeHackEd patch reads like release notes; keep the head of it.
        if matches!(lump_name.as_str(), "DEHACKED" | "BEX") && !text.is_empty() {
            let head: String = text.chars().take(DEHACKED_DESCRIPTION_BYTES).collect();
            descriptions.push(head.trim().to_string());
        }
    }

    Harvest {
        names: uniq_preserve(names),
        authors: uniq_preserve(authors),
        descriptions: uniq_preserve(descriptions),
    }
}
