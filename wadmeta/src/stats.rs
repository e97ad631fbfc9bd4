//! Per-map statistics: record decoding, closed thing tables, difficulty
//! buckets, and the load-order merge across embedded WADs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use byteorder::{ByteOrder, LittleEndian};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::wad::{MapBlock, map_blocks, parse_wad_directory, read_lump};

// Record sizes, Doom format.
pub const DOOM_THINGS_REC: u32 = 10;
pub const DOOM_LINEDEFS_REC: u32 = 14;
pub const DOOM_SIDEDEFS_REC: u32 = 30;
pub const DOOM_VERTEXES_REC: u32 = 4;
pub const DOOM_SECTORS_REC: u32 = 26;
pub const DOOM_SEGS_REC: u32 = 12;
pub const DOOM_SSECTORS_REC: u32 = 4;
pub const DOOM_NODES_REC: u32 = 28;

// Record sizes, Hexen format.
pub const HEXEN_THINGS_REC: u32 = 20;
pub const HEXEN_LINEDEFS_REC: u32 = 16;

pub const SECRET_EXIT_SPECIALS: [i16; 3] = [51, 124, 198];
pub const TELEPORT_SPECIALS: [i16; 6] = [39, 97, 125, 126, 174, 195];

/// Key pickups (vanilla Doom/Doom II thing IDs).
fn key_name(thing_type: i16) -> Option<&'static str> {
    match thing_type {
        5 => Some("blue"),
        6 => Some("yellow"),
        13 => Some("red"),
        38 => Some("red_skull"),
        39 => Some("yellow_skull"),
        40 => Some("blue_skull"),
        _ => None,
    }
}

/// Monsters (vanilla Doom + Doom II thing IDs).
fn monster_name(thing_type: i16) -> Option<&'static str> {
    match thing_type {
        3004 => Some("zombieman"),
        9 => Some("shotgun_guy"),
        65 => Some("chaingun_guy"),
        3001 => Some("imp"),
        3002 => Some("demon"),
        58 => Some("spectre"),
        3005 => Some("cacodemon"),
        3006 => Some("lost_soul"),
        16 => Some("cyberdemon"),
        7 => Some("spider_mastermind"),
        64 => Some("archvile"),
        66 => Some("revenant"),
        67 => Some("mancubus"),
        68 => Some("arachnotron"),
        69 => Some("hell_knight"),
        71 => Some("pain_elemental"),
        3003 => Some("baron"),
        _ => None,
    }
}

/// Items and pickups (vanilla thing IDs): weapons, ammo, health, armor,
/// powerups.
fn item_name(thing_type: i16) -> Option<&'static str> {
    match thing_type {
        2001 => Some("shotgun"),
        82 => Some("super_shotgun"),
        2002 => Some("chaingun"),
        2003 => Some("rocket_launcher"),
        2004 => Some("plasma_rifle"),
        2005 => Some("chainsaw"),
        2006 => Some("bfg9000"),
        2007 => Some("ammo_clip"),
        2048 => Some("ammo_box"),
        2008 => Some("shells"),
        2049 => Some("shell_box"),
        2010 => Some("rocket"),
        2046 => Some("rocket_box"),
        2047 => Some("cell"),
        17 => Some("cell_pack"),
        8 => Some("backpack"),
        2011 => Some("stimpack"),
        2012 => Some("medikit"),
        2014 => Some("health_bonus"),
        2015 => Some("armor_bonus"),
        2018 => Some("green_armor"),
        2019 => Some("blue_armor"),
        2013 => Some("soulsphere"),
        83 => Some("megasphere"),
        2023 => Some("berserk"),
        2022 => Some("invulnerability"),
        2024 => Some("invisibility"),
        2025 => Some("radiation_suit"),
        2026 => Some("computer_area_map"),
        2045 => Some("light_amp_goggles"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MapFormat {
    Doom,
    Hexen,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    VanillaOrBoom,
    Hexen,
    Unknown,
}

impl From<MapFormat> for Compatibility {
    fn from(fmt: MapFormat) -> Self {
        match fmt {
            MapFormat::Doom => Compatibility::VanillaOrBoom,
            MapFormat::Hexen => Compatibility::Hexen,
            MapFormat::Unknown => Compatibility::Unknown,
        }
    }
}

/// Occurrence counts serialized as a JSON object ordered by descending
/// count, then ascending name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCounts(Vec<(String, u32)>);

impl TypeCounts {
    pub fn from_counts(counts: HashMap<&'static str, u32>) -> Self {
        let mut pairs: Vec<(String, u32)> = counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(name, count)| (name.as_str(), *count))
    }

    pub fn total(&self) -> u32 {
        self.0.iter().map(|(_, count)| count).sum()
    }
}

impl Serialize for TypeCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, count) in &self.0 {
            map.serialize_entry(name, count)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MapStats {
    pub things: u32,
    pub linedefs: u32,
    pub sidedefs: u32,
    pub vertices: u32,
    pub sectors: u32,
    pub segs: u32,
    pub ssectors: u32,
    pub nodes: u32,
    /// Texture name -> occurrence count across sidedefs (upper/lower/
    /// middle) and sectors (floor/ceiling). A bag, not a set.
    pub textures: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThingBreakdown {
    pub total: u32,
    pub by_type: TypeCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Mechanics {
    pub teleports: bool,
    /// Sorted set of friendly key names.
    pub keys: Vec<String>,
    pub secret_exit: bool,
}

/// Skill-bucket counters: bit 0 of the thing flags = easy (HNTR),
/// bit 1 = medium (HMP), bit 2 = hard (UV).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Difficulty {
    pub uv_monsters: u32,
    pub hmp_monsters: u32,
    pub htr_monsters: u32,
    pub uv_items: u32,
    pub hmp_items: u32,
    pub htr_items: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapSummary {
    pub map: String,
    pub format: MapFormat,
    pub stats: MapStats,
    pub monsters: ThingBreakdown,
    pub items: ThingBreakdown,
    pub mechanics: Mechanics,
    pub difficulty: Difficulty,
    pub compatibility: Compatibility,
}

/// Infer the map format from LINEDEFS/THINGS record-size divisibility,
/// with BEHAVIOR breaking the tie in favor of hexen.
pub fn detect_map_format(block: &MapBlock<'_>) -> MapFormat {
    let (Some(linedefs), Some(things)) = (block.find_lump("LINEDEFS"), block.find_lump("THINGS"))
    else {
        return MapFormat::Unknown;
    };

    let doom_ok =
        linedefs.size % DOOM_LINEDEFS_REC == 0 && things.size % DOOM_THINGS_REC == 0;
    let hexen_ok =
        linedefs.size % HEXEN_LINEDEFS_REC == 0 && things.size % HEXEN_THINGS_REC == 0;

    match (doom_ok, hexen_ok) {
        (true, false) => MapFormat::Doom,
        (false, true) => MapFormat::Hexen,
        (true, true) => {
            if block.find_lump("BEHAVIOR").is_some() {
                MapFormat::Hexen
            } else {
                MapFormat::Doom
            }
        }
        (false, false) => MapFormat::Unknown,
    }
}

/// (thing_type, flags) pairs from a Doom-format THINGS lump.
fn doom_things(bytes: &[u8]) -> Vec<(i16, i16)> {
    if bytes.len() % DOOM_THINGS_REC as usize != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(DOOM_THINGS_REC as usize)
        .map(|rec| (LittleEndian::read_i16(&rec[6..8]), LittleEndian::read_i16(&rec[8..10])))
        .collect()
}

/// Line specials from a Doom-format LINEDEFS lump (v1, v2, flags,
/// special, tag, right, left).
fn doom_linedef_specials(bytes: &[u8]) -> Vec<i16> {
    if bytes.len() % DOOM_LINEDEFS_REC as usize != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(DOOM_LINEDEFS_REC as usize)
        .map(|rec| LittleEndian::read_i16(&rec[6..8]))
        .collect()
}

/// Line specials from a Hexen-format LINEDEFS lump. The record differs
/// (five one-byte args follow) but the fourth i16 still reads as the
/// special.
fn hexen_linedef_specials(bytes: &[u8]) -> Vec<i16> {
    if bytes.len() % HEXEN_LINEDEFS_REC as usize != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(HEXEN_LINEDEFS_REC as usize)
        .map(|rec| LittleEndian::read_i16(&rec[6..8]))
        .collect()
}

/// Doom texture names are fixed 8-byte ASCII with NUL padding.
fn decode_texture_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

fn push_texture(out: &mut Vec<String>, raw: &[u8]) {
    let name = decode_texture_name(raw);
    if !name.is_empty() && name != "-" {
        out.push(name);
    }
}

/// Upper/lower/middle texture names from a SIDEDEFS lump, placeholder
/// `-` excluded.
fn sidedef_texture_names(bytes: &[u8]) -> Vec<String> {
    if bytes.len() % DOOM_SIDEDEFS_REC as usize != 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for rec in bytes.chunks_exact(DOOM_SIDEDEFS_REC as usize) {
        push_texture(&mut out, &rec[4..12]);
        push_texture(&mut out, &rec[12..20]);
        push_texture(&mut out, &rec[20..28]);
    }
    out
}

/// Floor/ceiling texture names from a SECTORS lump.
fn sector_texture_names(bytes: &[u8]) -> Vec<String> {
    if bytes.len() % DOOM_SECTORS_REC as usize != 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for rec in bytes.chunks_exact(DOOM_SECTORS_REC as usize) {
        push_texture(&mut out, &rec[4..12]);
        push_texture(&mut out, &rec[12..20]);
    }
    out
}

/// Summarize a single map block against the containing buffer.
pub fn map_summary(buf: &[u8], block: &MapBlock<'_>) -> MapSummary {
    let fmt = detect_map_format(block);

    let lump_count = |name: &str, rec: u32| -> u32 {
        block.find_lump(name).map(|l| l.size / rec).unwrap_or(0)
    };

    let things_rec = if fmt == MapFormat::Doom {
        DOOM_THINGS_REC
    } else {
        HEXEN_THINGS_REC
    };
    let linedefs_rec = if fmt == MapFormat::Doom {
        DOOM_LINEDEFS_REC
    } else {
        HEXEN_LINEDEFS_REC
    };

    let mut stats = MapStats {
        things: lump_count("THINGS", things_rec),
        linedefs: lump_count("LINEDEFS", linedefs_rec),
        sidedefs: lump_count("SIDEDEFS", DOOM_SIDEDEFS_REC),
        vertices: lump_count("VERTEXES", DOOM_VERTEXES_REC),
        sectors: lump_count("SECTORS", DOOM_SECTORS_REC),
        segs: lump_count("SEGS", DOOM_SEGS_REC),
        ssectors: lump_count("SSECTORS", DOOM_SSECTORS_REC),
        nodes: lump_count("NODES", DOOM_NODES_REC),
        textures: BTreeMap::new(),
    };

    if let Some(lump) = block.find_lump("SIDEDEFS") {
        for name in sidedef_texture_names(read_lump(buf, lump)) {
            *stats.textures.entry(name).or_insert(0) += 1;
        }
    }
    if let Some(lump) = block.find_lump("SECTORS") {
        for name in sector_texture_names(read_lump(buf, lump)) {
            *stats.textures.entry(name).or_insert(0) += 1;
        }
    }

    let mut mechanics = Mechanics::default();
    if let Some(lump) = block.find_lump("LINEDEFS") {
        let bytes = read_lump(buf, lump);
        let specials = match fmt {
            MapFormat::Doom => doom_linedef_specials(bytes),
            _ => hexen_linedef_specials(bytes),
        };
        mechanics.teleports = specials.iter().any(|s| TELEPORT_SPECIALS.contains(s));
        mechanics.secret_exit = specials.iter().any(|s| SECRET_EXIT_SPECIALS.contains(s));
    }

    let mut monsters = ThingBreakdown::default();
    let mut items = ThingBreakdown::default();
    let mut difficulty = Difficulty::default();

    // Detailed thing stats are only meaningful for Doom-format records;
    // Hexen things use different type IDs and a 20-byte layout.
    if fmt == MapFormat::Doom {
        if let Some(lump) = block.find_lump("THINGS") {
            let mut keys: BTreeSet<&'static str> = BTreeSet::new();
            let mut monsters_by: HashMap<&'static str, u32> = HashMap::new();
            let mut items_by: HashMap<&'static str, u32> = HashMap::new();

            for (thing_type, flags) in doom_things(read_lump(buf, lump)) {
                if let Some(key) = key_name(thing_type) {
                    keys.insert(key);
                }
                if let Some(name) = monster_name(thing_type) {
                    monsters.total += 1;
                    *monsters_by.entry(name).or_insert(0) += 1;
                    if flags & (1 << 2) != 0 {
                        difficulty.uv_monsters += 1;
                    }
                    if flags & (1 << 1) != 0 {
                        difficulty.hmp_monsters += 1;
                    }
                    if flags & 1 != 0 {
                        difficulty.htr_monsters += 1;
                    }
                }
                if let Some(name) = item_name(thing_type) {
                    items.total += 1;
                    *items_by.entry(name).or_insert(0) += 1;
                    if flags & (1 << 2) != 0 {
                        difficulty.uv_items += 1;
                    }
                    if flags & (1 << 1) != 0 {
                        difficulty.hmp_items += 1;
                    }
                    if flags & 1 != 0 {
                        difficulty.htr_items += 1;
                    }
                }
            }

            mechanics.keys = keys.into_iter().map(String::from).collect();
            monsters.by_type = TypeCounts::from_counts(monsters_by);
            items.by_type = TypeCounts::from_counts(items_by);
        }
    }

    MapSummary {
        map: block.name.to_string(),
        format: fmt,
        stats,
        monsters,
        items,
        mechanics,
        difficulty,
        compatibility: fmt.into(),
    }
}

/// Per-map summaries for every map block in a WAD buffer. Unparseable
/// buffers yield an empty list.
pub fn extract_map_stats(buf: &[u8]) -> Vec<MapSummary> {
    let Ok(dir) = parse_wad_directory(buf) else {
        return Vec::new();
    };
    map_blocks(&dir)
        .iter()
        .map(|block| map_summary(buf, block))
        .collect()
}

/// Merge per-map summaries across WADs in load order: the last
/// definition of a map name wins, and overridden entries move to the
/// position of their latest definition.
pub fn merge_map_stats(map_lists_in_load_order: Vec<Vec<MapSummary>>) -> Vec<MapSummary> {
    let mut by_name: HashMap<String, MapSummary> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for maps in map_lists_in_load_order {
        for summary in maps {
            let name = summary.map.clone();
            if by_name.contains_key(&name) {
                order.retain(|n| n != &name);
            }
            by_name.insert(name.clone(), summary);
            order.push(name);
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}

/// Defensive sweep after [`merge_map_stats`]: dedupe again by
/// case-folded, whitespace-trimmed map name, keeping the last occurrence.
pub fn dedupe_map_stats_keep_last(maps: Vec<MapSummary>) -> Vec<MapSummary> {
    let folded: Vec<String> = maps
        .iter()
        .map(|m| m.map.trim().to_lowercase())
        .collect();
    maps.into_iter()
        .enumerate()
        .filter(|(i, _)| !folded[i + 1..].contains(&folded[*i]))
        .map(|(_, m)| m)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wad::tests::build_wad;

    fn name8(s: &str) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..s.len()].copy_from_slice(s.as_bytes());
        out
    }

    fn thing(thing_type: i16, flags: i16) -> Vec<u8> {
        let mut rec = Vec::new();
        for v in [0i16, 0, 0, thing_type, flags] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        rec
    }

    fn linedef(special: i16) -> Vec<u8> {
        let mut rec = Vec::new();
        for v in [0i16, 0, 0, special, 0, 0, 0] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        rec
    }

    fn sidedef(upper: &str, lower: &str, middle: &str) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec.extend_from_slice(&name8(upper));
        rec.extend_from_slice(&name8(lower));
        rec.extend_from_slice(&name8(middle));
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec
    }

    fn sector(floor: &str, ceil: &str) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec.extend_from_slice(&name8(floor));
        rec.extend_from_slice(&name8(ceil));
        for v in [0i16, 0, 0] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        rec
    }

    fn single_map_summary(lumps: &[(&str, &[u8])]) -> MapSummary {
        let wad = build_wad(lumps);
        let mut maps = extract_map_stats(&wad);
        assert_eq!(maps.len(), 1);
        maps.remove(0)
    }

    #[test]
    fn textures_histogram_counts() {
        let sidedefs: Vec<u8> = [
            sidedef("STONE", "-", "BRICK"),
            sidedef("STONE", "BRICK", "STONE"),
        ]
        .concat();
        let sectors: Vec<u8> =
            [sector("FLOOR0_1", "CEIL1_1"), sector("FLOOR0_1", "SKY1")].concat();

        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("SIDEDEFS", &sidedefs),
            ("SECTORS", &sectors),
        ]);

        let textures = &summary.stats.textures;
        assert_eq!(textures.get("STONE"), Some(&3));
        assert_eq!(textures.get("BRICK"), Some(&2));
        assert_eq!(textures.get("FLOOR0_1"), Some(&2));
        assert_eq!(textures.get("CEIL1_1"), Some(&1));
        assert_eq!(textures.get("SKY1"), Some(&1));
        assert!(!textures.contains_key("-"));
    }

    #[test]
    fn textures_empty_when_lumps_missing() {
        let summary = single_map_summary(&[("MAP01", b"")]);
        assert!(summary.stats.textures.is_empty());
    }

    #[test]
    fn format_detection_and_counts() {
        let things: Vec<u8> = [thing(3001, 7), thing(2001, 1)].concat();
        let linedefs: Vec<u8> = [linedef(0), linedef(0), linedef(0)].concat();
        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &things),
            ("LINEDEFS", &linedefs),
        ]);
        assert_eq!(summary.format, MapFormat::Doom);
        assert_eq!(summary.compatibility, Compatibility::VanillaOrBoom);
        assert_eq!(summary.stats.things, 2);
        assert_eq!(summary.stats.linedefs, 3);

        // The count-from-size invariant.
        assert!(summary.stats.linedefs * DOOM_LINEDEFS_REC <= linedefs.len() as u32);
        assert!((summary.stats.linedefs + 1) * DOOM_LINEDEFS_REC > linedefs.len() as u32);
    }

    #[test]
    fn ambiguous_sizes_prefer_doom_unless_behavior_present() {
        // lcm(14,16)=112 and lcm(10,20)=20: both formats fit.
        let linedefs = vec![0u8; 112];
        let things = vec![0u8; 20];
        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &things),
            ("LINEDEFS", &linedefs),
        ]);
        assert_eq!(summary.format, MapFormat::Doom);

        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &things),
            ("LINEDEFS", &linedefs),
            ("BEHAVIOR", b""),
        ]);
        assert_eq!(summary.format, MapFormat::Hexen);
        assert_eq!(summary.compatibility, Compatibility::Hexen);
    }

    #[test]
    fn indivisible_sizes_are_unknown() {
        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &[0u8; 7]),
            ("LINEDEFS", &[0u8; 13]),
        ]);
        assert_eq!(summary.format, MapFormat::Unknown);
        assert_eq!(summary.monsters.total, 0);
    }

    #[test]
    fn teleport_and_secret_exit_specials() {
        let linedefs: Vec<u8> = [linedef(0), linedef(97), linedef(124)].concat();
        let things = thing(1, 0);
        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &things),
            ("LINEDEFS", &linedefs),
        ]);
        assert!(summary.mechanics.teleports);
        assert!(summary.mechanics.secret_exit);
    }

    #[test]
    fn monsters_items_keys_and_difficulty() {
        let things: Vec<u8> = [
            thing(3001, 0b111), // imp, all skills
            thing(3001, 0b100), // imp, UV only
            thing(3004, 0b001), // zombieman, easy only
            thing(2012, 0b010), // medikit, HMP only
            thing(5, 0),        // blue key
            thing(40, 0),       // blue skull key
            thing(12345, 0b111), // unknown type, ignored
        ]
        .concat();
        let linedefs = linedef(0);
        let summary = single_map_summary(&[
            ("MAP01", b""),
            ("THINGS", &things),
            ("LINEDEFS", &linedefs),
        ]);

        assert_eq!(summary.monsters.total, 3);
        let by_type: Vec<(String, u32)> = summary
            .monsters
            .by_type
            .iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect();
        assert_eq!(
            by_type,
            vec![("imp".to_string(), 2), ("zombieman".to_string(), 1)]
        );
        assert_eq!(summary.monsters.by_type.total(), summary.monsters.total);

        assert_eq!(summary.items.total, 1);
        assert_eq!(summary.items.by_type.total(), summary.items.total);

        assert_eq!(summary.difficulty.uv_monsters, 2);
        assert_eq!(summary.difficulty.hmp_monsters, 1);
        assert_eq!(summary.difficulty.htr_monsters, 2);
        assert_eq!(summary.difficulty.hmp_items, 1);
        assert!(summary.difficulty.uv_monsters <= summary.monsters.total);
        assert!(summary.difficulty.uv_items <= summary.items.total);

        assert_eq!(summary.mechanics.keys, vec!["blue", "blue_skull"]);

        // Monster and item namespaces never overlap.
        for (name, _) in summary.monsters.by_type.iter() {
            assert!(!summary.items.by_type.iter().any(|(i, _)| i == name));
        }
    }

    #[test]
    fn by_type_orders_by_count_then_name() {
        let counts = HashMap::from([("imp", 2), ("baron", 2), ("demon", 5)]);
        let ordered: Vec<(String, u32)> = TypeCounts::from_counts(counts)
            .iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect();
        assert_eq!(
            ordered,
            vec![
                ("demon".to_string(), 5),
                ("baron".to_string(), 2),
                ("imp".to_string(), 2),
            ]
        );
    }

    fn named_summary(name: &str, things: u32) -> MapSummary {
        MapSummary {
            map: name.to_string(),
            format: MapFormat::Doom,
            stats: MapStats {
                things,
                ..Default::default()
            },
            monsters: ThingBreakdown::default(),
            items: ThingBreakdown::default(),
            mechanics: Mechanics::default(),
            difficulty: Difficulty::default(),
            compatibility: Compatibility::VanillaOrBoom,
        }
    }

    #[test]
    fn merge_keeps_last_definition_and_reorders() {
        let merged = merge_map_stats(vec![
            vec![named_summary("MAP01", 1), named_summary("MAP02", 2)],
            vec![named_summary("MAP03", 3)],
            vec![named_summary("MAP01", 9)],
        ]);
        let names: Vec<&str> = merged.iter().map(|m| m.map.as_str()).collect();
        assert_eq!(names, vec!["MAP02", "MAP03", "MAP01"]);
        assert_eq!(merged[2].stats.things, 9);
    }

    #[test]
    fn dedupe_keep_last_is_idempotent_and_case_folds() {
        let maps = vec![
            named_summary("MAP01", 1),
            named_summary("map01 ", 2),
            named_summary("MAP02", 3),
        ];
        let deduped = dedupe_map_stats_keep_last(maps);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].map, "map01 ");
        assert_eq!(deduped[0].stats.things, 2);
        assert_eq!(deduped[1].map, "MAP02");

        let again = dedupe_map_stats_keep_last(deduped.clone());
        let names: Vec<&str> = again.iter().map(|m| m.map.as_str()).collect();
        let prev: Vec<&str> = deduped.iter().map(|m| m.map.as_str()).collect();
        assert_eq!(names, prev);
    }

    #[test]
    fn two_identical_maps_in_load_order_keep_the_second() {
        let wad_a = build_wad(&[("MAP01", b""), ("THINGS", &thing(3001, 1)), ("LINEDEFS", &linedef(0))]);
        let wad_b = build_wad(&[("MAP01", b""), ("THINGS", &[]), ("LINEDEFS", &linedef(97))]);
        let merged = merge_map_stats(vec![
            extract_map_stats(&wad_a),
            extract_map_stats(&wad_b),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].map, "MAP01");
        // WAD_B's definition won: no monsters, teleport special present.
        assert_eq!(merged[0].monsters.total, 0);
        assert!(merged[0].mechanics.teleports);
    }
}
