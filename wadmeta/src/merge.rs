//! Reconciliation of the three metadata sources into one catalog record.
//!
//! Precedence, highest first: on-disk extraction, the WAD-archive index
//! entry, the linked idGames entry. The output is a JSON value with all
//! null/empty branches pruned.

use md5::Md5;
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::extract::ExtractedMeta;
use crate::text::{expose_latin1, normalize_whitespace, uniq_preserve};

#[derive(Debug, Clone)]
pub struct ComputedHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// md5/sha1/sha256 of the decompressed file bytes, lowercase hex.
pub fn compute_hashes(bytes: &[u8]) -> ComputedHashes {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    for chunk in bytes.chunks(1024 * 1024) {
        md5.update(chunk);
        sha1.update(chunk);
        sha256.update(chunk);
    }
    ComputedHashes {
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    }
}

#[derive(Debug, Clone)]
pub struct Integrity {
    pub ok: bool,
    pub message: String,
}

/// Compare computed hashes against the expected-hash map from the index
/// entry. Only algorithms present in `expected` are validated; the
/// comparison is case-insensitive.
pub fn validate_expected_hashes(expected: &Value, computed: &ComputedHashes) -> Integrity {
    let mut mismatches: Vec<String> = Vec::new();

    for (algo, got) in [
        ("md5", &computed.md5),
        ("sha1", &computed.sha1),
        ("sha256", &computed.sha256),
    ] {
        let Some(exp) = expected.get(algo).and_then(Value::as_str) else {
            continue;
        };
        let exp = exp.trim().to_lowercase();
        if exp.is_empty() {
            continue;
        }
        if exp != got.to_lowercase() {
            mismatches.push(format!("{algo} expected={exp} got={got}"));
        }
    }

    if mismatches.is_empty() {
        Integrity {
            ok: true,
            message: "ok".to_string(),
        }
    } else {
        Integrity {
            ok: false,
            message: format!("Integrity check failed: {}", mismatches.join("; ")),
        }
    }
}

/// Recursively drop nulls and empty objects/arrays so the emitted record
/// has a deterministic compact shape.
pub fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                let pruned = prune_nulls(v);
                if is_prunable(&pruned) {
                    continue;
                }
                out.insert(key, pruned);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(prune_nulls)
                .filter(|v| !is_prunable(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_prunable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn first_nonempty_str<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

fn str_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn merged_list(parts: Vec<Vec<String>>) -> Vec<String> {
    uniq_preserve(parts.into_iter().flatten())
}

/// Everything the merger needs for one file. The index entries stay
/// opaque JSON; only well-known fields are picked out.
#[derive(Debug, Clone)]
pub struct MergeInputs<'a> {
    pub sha1: &'a str,
    /// Computed over the decompressed bytes, or the expected value when
    /// computation was impossible.
    pub sha256: Option<&'a str>,
    pub s3_url: Option<&'a str>,
    pub extracted: &'a ExtractedMeta,
    pub wad_entry: &'a Value,
    pub idgames_entry: Option<&'a Value>,
    pub readmes_entry: Option<&'a Value>,
    pub integrity: Option<&'a Integrity>,
}

/// `sources.extracted` must not embed large blobs twice: zip text file
/// payloads are reduced to `{path, size}` here, the full contents live in
/// the record's top-level `text_files`.
fn compact_extracted(extracted: &ExtractedMeta) -> Value {
    let mut value = serde_json::to_value(extracted).unwrap_or(Value::Null);
    if value.get("format").and_then(Value::as_str) != Some("zip") {
        return value;
    }
    if let Some(text_files) = value.get_mut("text_files").and_then(Value::as_array_mut) {
        for entry in text_files.iter_mut() {
            let path = entry.get("path").cloned().unwrap_or(Value::Null);
            let size = entry.get("size").cloned().unwrap_or(Value::Null);
            *entry = json!({"path": path, "size": size});
        }
    }
    value
}

/// Top-level `text_files`: pk3 payloads first, then the idGames text
/// file, then readmes-index text, each tagged by source.
fn build_text_files(
    extracted: &ExtractedMeta,
    idgames_textfile: Option<&str>,
    readmes_entry: Option<&Value>,
) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();

    if let ExtractedMeta::Zip(zip) = extracted {
        for tf in &zip.text_files {
            if tf.contents.trim().is_empty() {
                continue;
            }
            out.push(json!({
                "source": "pk3",
                "name": tf.path,
                "contents": tf.contents,
            }));
        }
    }

    if let Some(raw) = idgames_textfile {
        let text = normalize_whitespace(&expose_latin1(raw));
        if !text.is_empty() {
            out.push(json!({"source": "idgames", "contents": text}));
        }
    }

    if let Some(entry) = readmes_entry {
        let raw = entry
            .get("text")
            .or_else(|| entry.get("contents"))
            .and_then(Value::as_str);
        if let Some(raw) = raw {
            let text = normalize_whitespace(raw);
            if !text.is_empty() {
                out.push(json!({"source": "readmes", "contents": text}));
            }
        }
    }

    out
}

/// Build the merged catalog record for one file.
pub fn build_merged_record(inputs: &MergeInputs<'_>) -> Value {
    let wa = inputs.wad_entry;
    let extracted = inputs.extracted;

    // idGames payload lives under "content".
    let ig = inputs
        .idgames_entry
        .and_then(|entry| entry.get("content"))
        .filter(|v| v.is_object());
    let ig_str = |key: &str| ig.and_then(|v| v.get(key)).and_then(Value::as_str);

    let ex_names = extracted.names();
    let wa_names = str_list(wa.get("names"));

    let title = first_nonempty_str(&[
        ex_names.first().map(String::as_str),
        wa_names.first().map(String::as_str),
        ig_str("title"),
    ]);

    let authors = merged_list(vec![
        extracted.authors().to_vec(),
        str_list(wa.get("authors")),
        ig_str("author").map(str::to_string).into_iter().collect(),
    ]);

    let descriptions = merged_list(vec![
        extracted.descriptions().to_vec(),
        str_list(wa.get("descriptions")),
        ig_str("description")
            .map(|d| normalize_whitespace(&expose_latin1(d)))
            .into_iter()
            .collect(),
    ]);

    let text_files = build_text_files(extracted, ig_str("textfile"), inputs.readmes_entry);

    let extracted_maps = extracted.maps().filter(|maps| !maps.is_empty());
    let maps: Value = match extracted_maps {
        Some(maps) => json!(maps),
        None => wa.get("maps").cloned().unwrap_or(Value::Null),
    };

    let mut record = json!({
        "sha1": inputs.sha1,
        "sha256": inputs.sha256,
        "title": title,
        "authors": authors,
        "descriptions": descriptions,
        "text_files": text_files,
        "file": {
            "type": wa.get("type"),
            "size": wa.get("size"),
            "url": inputs.s3_url,
            "corrupt": wa.get("corrupt"),
            "corruptMessage": wa.get("corruptMessage"),
        },
        "content": {
            "maps": maps,
            "counts": wa.get("counts"),
            "engines_guess": wa.get("engines"),
            "iwads_guess": wa.get("iwads"),
        },
        "sources": {
            "wad_archive": {
                // Hashes live here to avoid top-level redundancy.
                "updated": wa.get("updated"),
                "hashes": wa.get("hashes"),
            },
            "idgames": ig.map(|ig| json!({
                "id": ig.get("id"),
                "url": ig.get("url"),
                "dir": ig.get("dir"),
                "filename": ig.get("filename"),
                "date": ig.get("date"),
                "title": ig.get("title"),
                "author": ig.get("author"),
                "credits": ig.get("credits"),
                "textfile": ig.get("textfile"),
                "rating": ig.get("rating"),
                "votes": ig.get("votes"),
            })),
            "extracted": compact_extracted(extracted),
        },
    });

    if let Some(integrity) = inputs.integrity {
        if !integrity.ok {
            record["file"]["corrupt"] = json!(true);
            record["file"]["corruptMessage"] = json!(integrity.message);
        }
    }

    prune_nulls(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_from_bytes;

    const SHA1: &str = "0000e0b4993f0b7130fc3b58abf996bbb4acb287";

    fn assert_no_prunable(value: &Value) {
        match value {
            Value::Null => panic!("null survived pruning"),
            Value::Object(map) => {
                assert!(!map.is_empty(), "empty object survived pruning");
                map.values().for_each(assert_no_prunable);
            }
            Value::Array(items) => {
                assert!(!items.is_empty(), "empty array survived pruning");
                items.iter().for_each(assert_no_prunable);
            }
            _ => {}
        }
    }

    #[test]
    fn hashes_are_lowercase_hex() {
        let hashes = compute_hashes(b"abc");
        assert_eq!(hashes.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            hashes.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hashes.md5, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn integrity_ignores_missing_and_matches_case_insensitively() {
        let computed = compute_hashes(b"abc");
        let expected = json!({"sha1": computed.sha1.to_uppercase()});
        let result = validate_expected_hashes(&expected, &computed);
        assert!(result.ok);

        let result = validate_expected_hashes(&json!({}), &computed);
        assert!(result.ok);
    }

    #[test]
    fn integrity_mismatch_lists_algorithms() {
        let computed = compute_hashes(b"abc");
        let expected = json!({
            "sha256": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "md5": computed.md5,
        });
        let result = validate_expected_hashes(&expected, &computed);
        assert!(!result.ok);
        assert!(result.message.starts_with("Integrity check failed:"));
        assert!(result.message.contains("sha256 expected=aaaa"));
        assert!(!result.message.contains("md5"));
    }

    #[test]
    fn prune_removes_nulls_and_empty_containers() {
        let value = json!({
            "keep": 1,
            "drop_null": null,
            "drop_empty_obj": {},
            "drop_empty_arr": [],
            "nested": {"inner": null, "list": [null, {}, "x"]},
        });
        let pruned = prune_nulls(value);
        assert_eq!(pruned, json!({"keep": 1, "nested": {"list": ["x"]}}));
        assert_no_prunable(&pruned);
    }

    fn merge_with(
        extracted: &ExtractedMeta,
        wad_entry: Value,
        idgames: Option<Value>,
        integrity: Option<Integrity>,
    ) -> Value {
        build_merged_record(&MergeInputs {
            sha1: SHA1,
            sha256: Some("feed"),
            s3_url: Some("s3://wadarchive/abc.wad.gz"),
            extracted,
            wad_entry: &wad_entry,
            idgames_entry: idgames.as_ref(),
            readmes_entry: None,
            integrity: integrity.as_ref(),
        })
    }

    #[test]
    fn title_precedence_extracted_then_index_then_idgames() {
        let extracted = extract_from_bytes(b"junk", "wad2");
        let wa = json!({"names": ["Index Title"], "type": "PWAD"});
        let ig = json!({"content": {"title": "idGames Title", "author": "Someone"}});

        let record = merge_with(&extracted, wa, Some(ig), None);
        assert_eq!(record["title"], "Index Title");
        assert_eq!(record["authors"], json!(["Someone"]));
        assert_eq!(record["sources"]["idgames"]["title"], "idGames Title");
    }

    #[test]
    fn integrity_failure_marks_file_corrupt() {
        let extracted = extract_from_bytes(b"junk", "wad2");
        let integrity = Integrity {
            ok: false,
            message: "Integrity check failed: sha256 expected=aaaa got=bbbb".to_string(),
        };
        let record = merge_with(&extracted, json!({"type": "PWAD"}), None, Some(integrity));
        assert_eq!(record["file"]["corrupt"], json!(true));
        assert!(
            record["file"]["corruptMessage"]
                .as_str()
                .unwrap()
                .starts_with("Integrity check failed:")
        );
    }

    #[test]
    fn record_is_fully_pruned() {
        let extracted = extract_from_bytes(b"junk", "wad2");
        let record = merge_with(&extracted, json!({}), None, None);
        assert_no_prunable(&record);
        assert_eq!(record["sha1"], SHA1);
        assert_eq!(record["sha256"], "feed");
        // No maps from anywhere: the key is gone entirely.
        assert!(record["content"].get("maps").is_none());
    }

    #[test]
    fn zip_text_files_are_carried_once() {
        let pk3 = crate::zip::tests::build_zip(&[
            ("readme.txt", b"The README body"),
            ("maps/level.wad", b"junk"),
        ]);
        let extracted = extract_from_bytes(&pk3, "pk3");
        let ig = json!({"content": {"textfile": "idgames text\u{00e9}"}});
        let record = merge_with(&extracted, json!({"type": "PK3"}), Some(ig), None);

        let text_files = record["text_files"].as_array().unwrap();
        assert_eq!(text_files.len(), 2);
        assert_eq!(text_files[0]["source"], "pk3");
        assert_eq!(text_files[0]["contents"], "The README body");
        assert_eq!(text_files[1]["source"], "idgames");

        // sources.extracted carries only {path, size} for text files.
        let compacted = record["sources"]["extracted"]["text_files"]
            .as_array()
            .unwrap();
        assert_eq!(compacted[0]["path"], "readme.txt");
        assert!(compacted[0].get("contents").is_none());
    }

    #[test]
    fn readmes_entry_feeds_text_files() {
        let extracted = extract_from_bytes(b"junk", "wad2");
        let readmes = json!({"text": "From the readmes index"});
        let record = build_merged_record(&MergeInputs {
            sha1: SHA1,
            sha256: None,
            s3_url: None,
            extracted: &extracted,
            wad_entry: &json!({"type": "PWAD"}),
            idgames_entry: None,
            readmes_entry: Some(&readmes),
            integrity: None,
        });
        let text_files = record["text_files"].as_array().unwrap();
        assert_eq!(text_files[0]["source"], "readmes");
    }

    #[test]
    fn maps_prefer_extracted_over_index() {
        let wad = crate::wad::tests::build_wad(&[
            ("MAP03", b""),
            ("THINGS", b""),
            ("LINEDEFS", b""),
        ]);
        let extracted = extract_from_bytes(&wad, "wad");
        let record = merge_with(&extracted, json!({"maps": ["MAP99"]}), None, None);
        assert_eq!(record["content"]["maps"], json!(["MAP03"]));

        let extracted = extract_from_bytes(b"junk", "wad2");
        let record = merge_with(&extracted, json!({"maps": ["MAP99"]}), None, None);
        assert_eq!(record["content"]["maps"], json!(["MAP99"]));
    }
}
