//! Zip-family container scanning (pk3/pk7/pkz/epk/pke).

use std::io::{Cursor, Read};

use crate::extract::{EmbeddedWad, ExtractedMeta, UnknownMeta, ZipMeta, ZipTextFile};
use crate::text::{decode_text_lossy, looks_binary, normalize_whitespace, uniq_preserve};
use crate::wad::parse_wad_directory;

pub const MAX_TEXT_FILES: usize = 20;
pub const MAX_TEXT_FILE_BYTES: u64 = 200_000;
pub const README_DESCRIPTION_BYTES: usize = 8_000;

/// Entry extensions worth reading as text.
fn is_textlike(name: &str) -> bool {
    const EXTS: &[&str] = &[
        ".txt", ".md", ".mapinfo", ".umapinfo", ".deh", ".bex", ".decorate", ".zs", ".zc",
        ".zsc", ".acs", ".cfg", ".ini", ".json", ".yaml", ".yml", ".pk3info",
    ];
    EXTS.iter().any(|ext| name.ends_with(ext))
}

fn is_wad_name(name: &str) -> bool {
    name.ends_with(".wad") || name.ends_with(".iwad") || name.ends_with(".pwad")
}

/// Top-level readme-ish files feed the description list.
fn is_readme_basename(lower_path: &str) -> bool {
    let base = lower_path.rsplit('/').next().unwrap_or(lower_path);
    matches!(base, "readme.txt" | "readme.md" | "info.txt" | "description.txt")
        || base.ends_with(".txt")
}

/// Scan a zip-family buffer: embedded WADs (recursively decoded, their
/// harvested names/authors/descriptions bubbled up) plus bounded
/// text-like entries.
pub fn extract_from_zip(buf: &[u8]) -> ExtractedMeta {
    let mut archive = match zip::ZipArchive::new(Cursor::new(buf)) {
        Ok(archive) => archive,
        Err(_) => {
            return ExtractedMeta::Unknown(UnknownMeta {
                error: "Not a valid zip/PK3 container".to_string(),
                ..Default::default()
            });
        }
    };

    let mut meta = ZipMeta::default();
    let mut names: Vec<String> = Vec::new();
    let mut authors: Vec<String> = Vec::new();
    let mut descriptions: Vec<String> = Vec::new();
    let mut text_collected = 0usize;

    for index in 0..archive.len() {
        let Ok(mut entry) = archive.by_index(index) else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let path = entry.name().to_string();
        let lower = path.to_lowercase();

        if is_wad_name(&lower) {
            let mut wad_buf = Vec::with_capacity(entry.size() as usize);
            if entry.read_to_end(&mut wad_buf).is_err() {
                continue;
            }
            let wad_meta = crate::extract::extract_from_wad_bytes(&wad_buf);
            names.extend(wad_meta.names().iter().cloned());
            authors.extend(wad_meta.authors().iter().cloned());
            descriptions.extend(wad_meta.descriptions().iter().cloned());
            meta.embedded_wads.push(EmbeddedWad {
                path,
                meta: wad_meta,
            });
            continue;
        }

        if text_collected < MAX_TEXT_FILES && is_textlike(&lower) {
            let size = entry.size();
            if size == 0 || size > MAX_TEXT_FILE_BYTES {
                continue;
            }
            let mut text_buf = Vec::with_capacity(size as usize);
            if entry.read_to_end(&mut text_buf).is_err() {
                continue;
            }
            if looks_binary(&text_buf) {
                continue;
            }
            let text = normalize_whitespace(&decode_text_lossy(&text_buf));
            if text.is_empty() {
                continue;
            }
            if is_readme_basename(&lower) {
                descriptions.push(text.chars().take(README_DESCRIPTION_BYTES).collect());
            }
            meta.text_files.push(ZipTextFile {
                path,
                size,
                contents: text,
            });
            text_collected += 1;
        }
    }

    meta.names = uniq_preserve(names);
    meta.authors = uniq_preserve(authors);
    meta.descriptions = uniq_preserve(descriptions);
    ExtractedMeta::Zip(meta)
}

/// All embedded WADs that decode as classic containers, in archive
/// order. This order is the load order for map merging.
pub fn wads_in_zip(buf: &[u8]) -> Vec<(String, Vec<u8>)> {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(buf)) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for index in 0..archive.len() {
        let Ok(mut entry) = archive.by_index(index) else {
            continue;
        };
        if entry.is_dir() || !is_wad_name(&entry.name().to_lowercase()) {
            continue;
        }
        let path = entry.name().to_string();
        let mut wad_buf = Vec::with_capacity(entry.size() as usize);
        if entry.read_to_end(&mut wad_buf).is_err() {
            continue;
        }
        if parse_wad_directory(&wad_buf).is_ok() {
            out.push((path, wad_buf));
        }
    }
    out
}

/// Heuristic score for choosing the representative WAD inside a pk3:
/// prefer maps/ paths, then real map count, then lump count and size as
/// weak tie-breaks.
fn score_embedded_wad(path: &str, maps: usize, lump_count: usize, size: u64) -> i64 {
    let lower = path.replace('\\', "/").to_lowercase();
    let mut score: i64 = 0;
    if lower.starts_with("maps/") || lower.contains("/maps/") {
        score += 10_000;
    }
    score += (maps.min(200) as i64) * 100;
    score += (lump_count.min(50_000) as i64) / 10;
    score += (size / 65_536) as i64;
    score
}

/// The best embedded WAD by [`score_embedded_wad`], if any decodes.
pub fn primary_wad_in_zip(buf: &[u8]) -> Option<(String, Vec<u8>)> {
    let mut best: Option<(i64, String, Vec<u8>)> = None;
    for (path, wad_buf) in wads_in_zip(buf) {
        let Ok(dir) = parse_wad_directory(&wad_buf) else {
            continue;
        };
        let maps = crate::wad::detect_maps(&dir).len();
        let score = score_embedded_wad(&path, maps, dir.lumps.len(), wad_buf.len() as u64);
        if best.as_ref().is_none_or(|(s, _, _)| score > *s) {
            best = Some((score, path, wad_buf));
        }
    }
    best.map(|(_, path, wad_buf)| (path, wad_buf))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wad::tests::build_wad;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn invalid_zip_is_unknown() {
        let ExtractedMeta::Unknown(u) = extract_from_zip(b"not a zip") else {
            panic!("expected unknown");
        };
        assert_eq!(u.error, "Not a valid zip/PK3 container");
    }

    #[test]
    fn embedded_wads_enumerate_in_archive_order() {
        let wad_a = build_wad(&[("MAP01", b""), ("THINGS", b""), ("LINEDEFS", b"")]);
        let wad_b = build_wad(&[("MAP02", b""), ("THINGS", b""), ("LINEDEFS", b"")]);
        let pk3 = build_zip(&[
            ("maps/a.wad", &wad_a),
            ("extra/b.pwad", &wad_b),
            ("not-a-wad.wad", b"junk"),
            ("readme.txt", b"My cool megawad\nby nobody"),
        ]);

        let wads = wads_in_zip(&pk3);
        let paths: Vec<&str> = wads.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["maps/a.wad", "extra/b.pwad"]);

        let ExtractedMeta::Zip(meta) = extract_from_zip(&pk3) else {
            panic!("expected zip meta");
        };
        // The junk entry still shows up in the scan, tagged unknown.
        assert_eq!(meta.embedded_wads.len(), 3);
        assert_eq!(meta.text_files.len(), 1);
        assert_eq!(meta.descriptions, vec!["My cool megawad\nby nobody"]);
    }

    #[test]
    fn text_files_respect_binary_and_size_limits() {
        let mut binary = vec![0u8; 16];
        binary[0] = b'a';
        let big = vec![b'x'; MAX_TEXT_FILE_BYTES as usize + 1];
        let pk3 = build_zip(&[
            ("notes.txt", b"fine"),
            ("data.cfg", &binary),
            ("huge.txt", &big),
        ]);
        let ExtractedMeta::Zip(meta) = extract_from_zip(&pk3) else {
            panic!("expected zip meta");
        };
        let paths: Vec<&str> = meta.text_files.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["notes.txt"]);
    }

    #[test]
    fn primary_wad_prefers_maps_dir_and_map_count() {
        let small = build_wad(&[("DEMO1", b"x")]);
        let mapped = build_wad(&[("MAP01", b""), ("THINGS", b""), ("LINEDEFS", b"")]);
        let pk3 = build_zip(&[("other.wad", &small), ("maps/real.wad", &mapped)]);
        let (path, _) = primary_wad_in_zip(&pk3).unwrap();
        assert_eq!(path, "maps/real.wad");
    }
}
