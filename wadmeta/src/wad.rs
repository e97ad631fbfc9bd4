//! Classic IWAD/PWAD container decoding.
//!
//! Layout: a 12-byte header (`IWAD`/`PWAD`, lump count, directory offset,
//! both u32 little-endian) followed by packed lump data and a directory of
//! 16-byte entries (offset u32, size u32, 8-byte NUL-padded name).

use std::sync::LazyLock;

use byteorder::{ByteOrder, LittleEndian};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Anything above this is treated as a corrupt header, not a real WAD.
pub const MAX_LUMP_COUNT: u32 = 200_000;

pub const DIRECTORY_ENTRY_SIZE: usize = 16;

static MAP_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(MAP\d\d|E\dM\d)$").expect("map marker regex"));

#[derive(Debug, Error)]
pub enum WadError {
    #[error("file too small to be a WAD ({0} bytes)")]
    TooSmall(usize),
    #[error("not a classic IWAD/PWAD header")]
    BadSignature,
    #[error("unreasonable lump count {0}")]
    UnreasonableLumpCount(u32),
    #[error("lump directory extends past end of file")]
    DirectoryOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WadKind {
    Iwad,
    Pwad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lump {
    pub index: usize,
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct WadDirectory {
    pub kind: WadKind,
    pub file_size: usize,
    pub lumps: Vec<Lump>,
}

/// Decode an 8-byte directory name: trim at the first NUL, replace
/// non-ASCII bytes.
pub fn decode_name8(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn is_map_marker(name: &str) -> bool {
    MAP_MARKER_RE.is_match(name)
}

/// Parse the header and lump directory out of a byte buffer.
///
/// Lumps whose data runs past the end of the buffer are still recorded,
/// with the size clamped to the in-range remainder so extraction stays
/// best-effort on truncated files.
pub fn parse_wad_directory(buf: &[u8]) -> Result<WadDirectory, WadError> {
    if buf.len() < 12 {
        return Err(WadError::TooSmall(buf.len()));
    }
    let kind = match &buf[0..4] {
        b"IWAD" => WadKind::Iwad,
        b"PWAD" => WadKind::Pwad,
        _ => return Err(WadError::BadSignature),
    };
    let lump_count = LittleEndian::read_u32(&buf[4..8]);
    let dir_offset = LittleEndian::read_u32(&buf[8..12]);

    if lump_count > MAX_LUMP_COUNT {
        return Err(WadError::UnreasonableLumpCount(lump_count));
    }
    let dir_size = lump_count as usize * DIRECTORY_ENTRY_SIZE;
    let dir_offset = dir_offset as usize;
    if dir_offset.checked_add(dir_size).is_none_or(|end| end > buf.len()) {
        return Err(WadError::DirectoryOutOfRange);
    }

    let directory = &buf[dir_offset..dir_offset + dir_size];
    let mut lumps = Vec::with_capacity(lump_count as usize);
    for (index, entry) in directory.chunks_exact(DIRECTORY_ENTRY_SIZE).enumerate() {
        let offset = LittleEndian::read_u32(&entry[0..4]);
        let mut size = LittleEndian::read_u32(&entry[4..8]);
        let name = decode_name8(&entry[8..16]);
        if (offset as u64) + (size as u64) > buf.len() as u64 {
            size = (buf.len() as u64).saturating_sub(offset as u64) as u32;
        }
        lumps.push(Lump {
            index,
            name,
            offset,
            size,
        });
    }

    Ok(WadDirectory {
        kind,
        file_size: buf.len(),
        lumps,
    })
}

/// Read a lump's bytes, tolerating degenerate offsets and sizes.
pub fn read_lump<'a>(buf: &'a [u8], lump: &Lump) -> &'a [u8] {
    let off = lump.offset as usize;
    let size = lump.size as usize;
    if size == 0 || off >= buf.len() {
        return &[];
    }
    &buf[off..buf.len().min(off + size)]
}

/// A marker-delimited run of lumps belonging to one map.
#[derive(Debug, Clone)]
pub struct MapBlock<'a> {
    pub name: &'a str,
    pub lumps: &'a [Lump],
}

impl MapBlock<'_> {
    pub fn find_lump(&self, name: &str) -> Option<&Lump> {
        self.lumps.iter().find(|l| l.name == name)
    }
}

/// Slice the directory into map blocks: each map marker starts a block
/// that runs to the next marker or the end of the directory.
pub fn map_blocks(dir: &WadDirectory) -> Vec<MapBlock<'_>> {
    let markers: Vec<usize> = dir
        .lumps
        .iter()
        .enumerate()
        .filter(|(_, l)| is_map_marker(&l.name))
        .map(|(i, _)| i)
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = markers.get(n + 1).copied().unwrap_or(dir.lumps.len());
            MapBlock {
                name: &dir.lumps[start].name,
                lumps: &dir.lumps[start..end],
            }
        })
        .collect()
}

/// List the markers that look like real maps: THINGS and LINEDEFS both
/// appear within the next 15 directory entries. Order-preserving, exact
/// duplicates dropped.
pub fn detect_maps(dir: &WadDirectory) -> Vec<String> {
    let names: Vec<String> = dir.lumps.iter().map(|l| l.name.to_uppercase()).collect();
    let mut found: Vec<String> = Vec::new();
    for (i, name) in names.iter().enumerate() {
        if !is_map_marker(name) {
            continue;
        }
        let window = &names[i + 1..names.len().min(i + 1 + 15)];
        let has_things = window.iter().any(|n| n == "THINGS");
        let has_linedefs = window.iter().any(|n| n == "LINEDEFS");
        if has_things && has_linedefs && !found.contains(name) {
            found.push(name.clone());
        }
    }
    found
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a minimal PWAD: header + concatenated lump data + directory.
    pub(crate) fn build_wad(lumps: &[(&str, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut entries = Vec::new();
        let mut off = 12u32;
        for (name, bytes) in lumps {
            entries.push((off, bytes.len() as u32, *name));
            data.extend_from_slice(bytes);
            off += bytes.len() as u32;
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"PWAD");
        out.extend_from_slice(&(lumps.len() as u32).to_le_bytes());
        out.extend_from_slice(&off.to_le_bytes());
        out.extend_from_slice(&data);
        for (e_off, e_size, e_name) in entries {
            out.extend_from_slice(&e_off.to_le_bytes());
            out.extend_from_slice(&e_size.to_le_bytes());
            let mut name8 = [0u8; 8];
            name8[..e_name.len()].copy_from_slice(e_name.as_bytes());
            out.extend_from_slice(&name8);
        }
        out
    }

    #[test]
    fn recovered_lump_count_matches_header() {
        let wad = build_wad(&[("MAP01", b""), ("THINGS", b"abc"), ("LINEDEFS", b"de")]);
        let dir = parse_wad_directory(&wad).unwrap();
        assert_eq!(dir.kind, WadKind::Pwad);
        assert_eq!(dir.lumps.len(), 3);
        assert_eq!(dir.lumps[1].name, "THINGS");
        assert_eq!(dir.lumps[1].size, 3);
    }

    #[test]
    fn short_buffer_is_too_small() {
        assert!(matches!(
            parse_wad_directory(b"PWAD\x00\x00"),
            Err(WadError::TooSmall(_))
        ));
    }

    #[test]
    fn bad_signature_rejected() {
        let mut wad = build_wad(&[("MAP01", b"")]);
        wad[0..4].copy_from_slice(b"WHAT");
        assert!(matches!(
            parse_wad_directory(&wad),
            Err(WadError::BadSignature)
        ));
    }

    #[test]
    fn unreasonable_lump_count_rejected() {
        let mut wad = build_wad(&[("MAP01", b"")]);
        wad[4..8].copy_from_slice(&200_001u32.to_le_bytes());
        assert!(matches!(
            parse_wad_directory(&wad),
            Err(WadError::UnreasonableLumpCount(200_001))
        ));
    }

    #[test]
    fn directory_past_eof_rejected() {
        let mut wad = build_wad(&[("MAP01", b"")]);
        let len = wad.len() as u32;
        wad[8..12].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(
            parse_wad_directory(&wad),
            Err(WadError::DirectoryOutOfRange)
        ));
    }

    #[test]
    fn oversized_lump_is_clamped() {
        let mut wad = build_wad(&[("DEMO1", b"xyz")]);
        // Inflate the recorded size of the only lump way past EOF.
        let dir_off = wad.len() - DIRECTORY_ENTRY_SIZE;
        wad[dir_off + 4..dir_off + 8].copy_from_slice(&1_000_000u32.to_le_bytes());
        let dir = parse_wad_directory(&wad).unwrap();
        let lump = &dir.lumps[0];
        assert_eq!(lump.offset, 12);
        assert_eq!(lump.size as usize, wad.len() - 12);
        assert_eq!(&read_lump(&wad, lump)[..3], b"xyz");
    }

    #[test]
    fn directory_reserialization_round_trips() {
        let wad = build_wad(&[
            ("MAP01", b""),
            ("THINGS", &[0u8; 10]),
            ("LINEDEFS", &[0u8; 14]),
        ]);
        let dir = parse_wad_directory(&wad).unwrap();

        // Re-encode the 16-byte entries and parse again.
        let mut out = Vec::new();
        out.extend_from_slice(b"PWAD");
        out.extend_from_slice(&(dir.lumps.len() as u32).to_le_bytes());
        out.extend_from_slice(&12u32.to_le_bytes());
        for lump in &dir.lumps {
            out.extend_from_slice(&lump.offset.to_le_bytes());
            out.extend_from_slice(&lump.size.to_le_bytes());
            let mut name8 = [0u8; 8];
            name8[..lump.name.len()].copy_from_slice(lump.name.as_bytes());
            out.extend_from_slice(&name8);
        }
        // Pad so every recorded (offset, size) stays in range.
        out.resize(out.len().max(wad.len()), 0);
        let reparsed = parse_wad_directory(&out).unwrap();
        assert_eq!(reparsed.lumps, dir.lumps);
    }

    #[test]
    fn map_markers_and_blocks() {
        let wad = build_wad(&[
            ("MAP01", b""),
            ("THINGS", b""),
            ("LINEDEFS", b""),
            ("MAP02", b""),
            ("THINGS", b""),
            ("LINEDEFS", b""),
            ("E1M1", b""),
            ("DEMO1", b""),
        ]);
        let dir = parse_wad_directory(&wad).unwrap();
        let blocks = map_blocks(&dir);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].name, "MAP01");
        assert_eq!(blocks[0].lumps.len(), 3);
        assert_eq!(blocks[2].name, "E1M1");
        assert_eq!(blocks[2].lumps.len(), 2);

        // E1M1 has no THINGS/LINEDEFS in its window, so it is not confirmed.
        assert_eq!(detect_maps(&dir), vec!["MAP01", "MAP02"]);
    }

    #[test]
    fn marker_pattern() {
        for good in ["MAP01", "MAP32", "E1M1", "E4M9"] {
            assert!(is_map_marker(good), "{good}");
        }
        for bad in ["MAP1", "E1M", "MAP001", "THINGS", "E1M1X"] {
            assert!(!is_map_marker(bad), "{bad}");
        }
    }
}
