//! Shadow-match veto
//!
//! A struck ACD tile "shadows" the towers a particle passing through it is
//! likely to enter. A tower with a real tracker coincidence pointing back
//! at a struck tile is the signature of a charged particle, and the event
//! is vetoed.
//!
//! Only the top face and the upper two rows of each side face take part;
//! the lower rows see too much back-splash from the calorimeter.
//!
//! Tower masks here are 16 bits wide with tower 0 in the most significant
//! bit (`0x8000 >> tower`).

use crate::acd::AcdMasks;
use crate::bits::{move_bits, BitIter};
use crate::directory::Directory;
use crate::status::StatusWord;
use crate::trigger::{trigger_form, TriggerClass};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tiles on the top face.
pub const TOP_TILES: usize = 25;

/// Tiles in the upper three rows of a side face.
pub const SIDE_TILES: usize = 15;

/// Upper two rows of a side face, five tiles each.
const SIDE_FILTER_ROWS: u32 = 0x3ff;

/// Tower bit in a 16-bit tower mask.
#[inline]
pub const fn tower_bit(tower: u32) -> u16 {
    0x8000 >> (tower & 0xf)
}

const fn towers(list: &[u32]) -> u16 {
    let mut mask = 0;
    let mut i = 0;
    while i < list.len() {
        mask |= tower_bit(list[i]);
        i += 1;
    }
    mask
}

/// Towers shadowed by each tile, indexed by tile number.
///
/// The side tables describe the minus faces; the plus faces are the same
/// pattern slid over to the opposite row or column of towers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShadowTable {
    pub top: [u16; TOP_TILES],
    pub x: [u16; SIDE_TILES],
    pub y: [u16; SIDE_TILES],
}

impl ShadowTable {
    /// Each tile shadows the towers it overlaps in a 2x2 neighborhood.
    pub const fn standard() -> Self {
        Self {
            top: [
                towers(&[0]),
                towers(&[0, 1]),
                towers(&[1, 2]),
                towers(&[2, 3]),
                towers(&[3]),
                towers(&[0, 4]),
                towers(&[0, 1, 4, 5]),
                towers(&[1, 2, 5, 6]),
                towers(&[2, 3, 6, 7]),
                towers(&[3, 7]),
                towers(&[4, 8]),
                towers(&[4, 5, 8, 9]),
                towers(&[5, 6, 9, 10]),
                towers(&[6, 7, 10, 11]),
                towers(&[7, 11]),
                towers(&[8, 12]),
                towers(&[8, 9, 12, 13]),
                towers(&[9, 10, 13, 14]),
                towers(&[10, 11, 14, 15]),
                towers(&[11, 15]),
                towers(&[12]),
                towers(&[12, 13]),
                towers(&[13, 14]),
                towers(&[14, 15]),
                towers(&[15]),
            ],
            x: X_SIDE,
            y: Y_SIDE,
        }
    }

    /// Towers shadowed by struck top tiles.
    pub fn by_top(&self, tiles: u32) -> u16 {
        lookup(&self.top, tiles)
    }

    /// Towers shadowed by struck X- tiles.
    pub fn by_xm(&self, tiles: u32) -> u16 {
        lookup(&self.x, tiles)
    }

    /// Towers shadowed by struck X+ tiles.
    pub fn by_xp(&self, tiles: u32) -> u16 {
        lookup(&self.x, tiles) >> 3
    }

    /// Towers shadowed by struck Y- tiles.
    pub fn by_ym(&self, tiles: u32) -> u16 {
        lookup(&self.y, tiles)
    }

    /// Towers shadowed by struck Y+ tiles.
    pub fn by_yp(&self, tiles: u32) -> u16 {
        lookup(&self.y, tiles) >> 12
    }

    /// Candidate towers of every face.
    pub fn candidates(&self, masks: &AcdMasks) -> Candidates {
        Candidates {
            top: self.by_top(masks.top),
            xm: self.by_xm(masks.xm()),
            xp: self.by_xp(masks.xp()),
            ym: self.by_ym(masks.ym()),
            yp: self.by_yp(masks.yp()),
        }
    }
}

impl Default for ShadowTable {
    fn default() -> Self {
        Self::standard()
    }
}

const SIDE_ROW_X: [u16; 5] = [
    towers(&[0]),
    towers(&[0, 4]),
    towers(&[4, 8]),
    towers(&[8, 12]),
    towers(&[12]),
];

const SIDE_ROW_Y: [u16; 5] = [
    towers(&[0]),
    towers(&[0, 1]),
    towers(&[1, 2]),
    towers(&[2, 3]),
    towers(&[3]),
];

const fn three_rows(row: [u16; 5]) -> [u16; SIDE_TILES] {
    let mut out = [0; SIDE_TILES];
    let mut i = 0;
    while i < SIDE_TILES {
        out[i] = row[i % 5];
        i += 1;
    }
    out
}

const X_SIDE: [u16; SIDE_TILES] = three_rows(SIDE_ROW_X);
const Y_SIDE: [u16; SIDE_TILES] = three_rows(SIDE_ROW_Y);

/// OR the shadowed towers of every struck tile. Tiles past the table are ignored.
fn lookup(table: &[u16], tiles: u32) -> u16 {
    let valid = if table.len() >= 32 {
        u32::MAX
    } else {
        (1u32 << table.len()) - 1
    };
    BitIter::new(tiles & valid).fold(0, |acc, pos| acc | table[(31 - pos) as usize])
}

/// Candidate towers per face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Candidates {
    pub top: u16,
    pub xm: u16,
    pub xp: u16,
    pub ym: u16,
    pub yp: u16,
}

impl Candidates {
    pub fn side(&self) -> u16 {
        self.xm | self.xp | self.ym | self.yp
    }

    pub fn all(&self) -> u16 {
        self.top | self.side()
    }
}

// =========================================================================
// TILE MATCHING
// =========================================================================

/// Struck top tiles over `tower`.
///
/// The four tiles covering a tower form the pattern `0b1100011` shifted by
/// the tower's column plus its row.
#[inline]
pub fn filter_top(tower: u32, acd_top: u32) -> u32 {
    let mt = tower + ((tower >> 2) & 3);
    acd_top & (0x63u32 << mt)
}

/// Side tiles in line with a coincidence, for the lowest corner tower.
///
/// Rows 0..4 of the face sit 5 bits apart; each tower faces two adjacent
/// tiles per row.
const SIDE_MASKS: [u32; 32] = [
    0x5555_5555, 0x0000_0000,
    0x1555_5555, 0x0000_0000,
    0x0555_5555, 0x0000_0000,
    0x0155_5555, 0x0000_0000,
    0x0055_5555, 0x0000_0000,
    0x003f_ffff, 0x0000_0000,
    0x000f_ffff, 0x0000_0000,
    0x0003_ffff, 0x0000_0000,
    0x0000_ffff, 0x0000_0000,
    0x0000_3fff, 0x0000_0000,
    0x0000_0fff, 0x0000_0000,
    0x0000_03ff, 0x0000_0000,
    0x0000_00ff, 0x0000_0055,
    0x0000_003f, 0x0000_0015,
    0x0000_000f, 0x0000_0005,
    0x0000_0003, 0x0000_0001,
];

/// Side tiles a coincidence of `length` planes starting at `start` can exit through.
pub fn side_mask(start: u32, length: u32) -> u32 {
    let shift = length.saturating_sub(3) << 1;
    let row = (start as usize) << 1;
    let (Some(lo), Some(hi)) = (SIDE_MASKS.get(row), SIDE_MASKS.get(row + 1)) else {
        return 0;
    };
    let pick = |word: u32| word.checked_shr(shift).unwrap_or(0) & 3;
    let m = pick(*lo) | (pick(*hi) << 2);

    let m = move_bits(m, 0, 1, 0) | move_bits(m, 1, 1, 5) | move_bits(m, 2, 1, 10) | move_bits(m, 3, 1, 15);
    m | (m << 1)
}

/// Struck side tiles matching a coincidence in `tower`.
///
/// Only faces that list the tower as a candidate are consulted, so inner
/// towers never match and corner towers see two faces.
pub fn filter_sides(
    tower: u32,
    start: u32,
    length: u32,
    candidates: &Candidates,
    masks: &AcdMasks,
) -> u32 {
    let mask = side_mask(start, length);
    let bit = tower_bit(tower);
    let col = (tower >> 2) & 3;
    let row = tower & 3;

    let mut matched = 0;
    if candidates.xm & bit != 0 {
        matched |= masks.xm() & (mask << col);
    }
    if candidates.xp & bit != 0 {
        matched |= masks.xp() & (mask << col);
    }
    if candidates.ym & bit != 0 {
        matched |= masks.ym() & (mask << row);
    }
    if candidates.yp & bit != 0 {
        matched |= masks.yp() & (mask << row);
    }
    matched
}

// =========================================================================
// STAGE EVALUATION
// =========================================================================

/// Run the shadow match over every candidate tower with tracker data.
///
/// Energies above `max_energy` skip the match entirely. Otherwise the scan
/// stops at the first tower matching a struck tile. Towers seen along the
/// way contribute `TKR_TRIGGER` or `TKR_POSSIBLE`.
pub fn evaluate_atf(
    table: &ShadowTable,
    dir: &Directory<'_>,
    masks: &AcdMasks,
    energy: i32,
    max_energy: i32,
) -> StatusWord {
    let mut status = StatusWord::ATF;
    if energy > max_energy {
        return status;
    }

    let candidates = table.candidates(masks);
    let scan = (u32::from(candidates.all()) << 16) & dir.tkr_towers();

    for tower in BitIter::new(scan) {
        let Some(view) = dir.tower(tower) else {
            continue;
        };
        let (x, y) = view.layer_masks();
        let trigger = trigger_form(x, y);
        let bit = tower_bit(tower);

        if trigger.is_trigger() {
            status |= StatusWord::TKR_TRIGGER;
            let start = trigger.start();

            if candidates.top & bit != 0 && start <= 2 && filter_top(tower, masks.top) != 0 {
                status |= StatusWord::TOP;
                break;
            }

            if candidates.side() & bit != 0
                && filter_sides(tower, start, trigger.length(), &candidates, masks) != 0
            {
                status |= StatusWord::SIDE;
                break;
            }
        } else if trigger.class() == TriggerClass::FourOfFour {
            status |= StatusWord::TKR_POSSIBLE;
        }
    }

    status
}

/// Layers nearest the calorimeter, bottom first, as `(view, accept bit)`.
const BOTTOM_PLANES: [(usize, u32); 6] = [
    (1, 8),  // y layer 0
    (0, 8),  // x layer 0
    (1, 17), // y layer 1
    (0, 17), // x layer 1
    (1, 7),  // y layer 2
    (0, 7),  // x layer 2
];

/// Bottom-plane hits of one tower, one bit per plane.
pub fn bottom_planes(x: u32, y: u32) -> u32 {
    let views = [x, y];
    BOTTOM_PLANES
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &(view, b))| acc | (((views[view] >> b) & 1) << i))
}

/// Calorimeter energy with no tracker support near the calorimeter.
///
/// Above `min_energy`, at least one tracker tower must show 4 of its 6
/// bottom planes hit. Energies at or below `min_energy`, or below
/// `floor`, are never vetoed here.
pub fn evaluate_zbottom(dir: &Directory<'_>, energy: i32, min_energy: i32, floor: i32) -> StatusWord {
    if energy <= min_energy || energy < floor {
        return StatusWord::empty();
    }
    let supported = dir.towers_in(dir.tkr_towers()).any(|view| {
        let (x, y) = view.layer_masks();
        bottom_planes(x, y).count_ones() >= 4
    });
    if supported {
        StatusWord::empty()
    } else {
        StatusWord::ZBOTTOM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EventBuilder, TowerData};
    use crate::trigger::layer_mask;

    fn tracker_tower(layers: &[u32]) -> TowerData {
        let m = layer_mask(layers.iter().copied());
        TowerData {
            x: m,
            y: m,
            ..TowerData::default()
        }
    }

    #[test]
    fn test_top_table_matches_filter_top() {
        let table = ShadowTable::standard();
        // tile 6 shadows towers 0, 1, 4 and 5
        assert_eq!(table.by_top(1 << 6), towers(&[0, 1, 4, 5]));
        // and tower 5 is covered by tiles 6, 7, 11 and 12
        assert_eq!(filter_top(5, u32::MAX), (1 << 6) | (1 << 7) | (1 << 11) | (1 << 12));
        assert_eq!(filter_top(0, 1), 1);
        assert_eq!(filter_top(15, 1 << 24), 1 << 24);
    }

    #[test]
    fn test_side_lookup() {
        let table = ShadowTable::standard();
        assert_eq!(table.by_xm(1 << 2), towers(&[4, 8]));
        assert_eq!(table.by_xp(1), towers(&[3]));
        assert_eq!(table.by_ym(1 << 6), towers(&[0, 1]));
        assert_eq!(table.by_yp(1 << 4), towers(&[15]));
        // bits past the face are ignored
        assert_eq!(table.by_xm(1 << 20), 0);
    }

    #[test]
    fn test_side_masks() {
        assert_eq!(side_mask(0, 3), 0x3);
        assert_eq!(side_mask(0, 4), 0x3);
        assert_eq!(side_mask(5, 3), 0x63);
        assert_eq!(side_mask(12, 3), 0xc63);
        assert_eq!(side_mask(15, 3), 0xc63);
        assert_eq!(side_mask(16, 3), 0);
        assert_eq!(side_mask(0, 40), 0);
    }

    #[test]
    fn test_top_veto() {
        let event = EventBuilder::new()
            .tower(0, tracker_tower(&[15, 16, 17]))
            .build();
        let dir = Directory::compose(&event).unwrap();
        let masks = AcdMasks::new(1, 0, 0);
        let s = evaluate_atf(&ShadowTable::standard(), &dir, &masks, 0, i32::MAX);
        assert_eq!(s, StatusWord::ATF | StatusWord::TKR_TRIGGER | StatusWord::TOP);
    }

    #[test]
    fn test_side_veto() {
        let event = EventBuilder::new()
            .tower(0, tracker_tower(&[15, 16, 17]))
            .build();
        let dir = Directory::compose(&event).unwrap();
        let masks = AcdMasks::new(0, 1, 0);
        let s = evaluate_atf(&ShadowTable::standard(), &dir, &masks, 0, i32::MAX);
        assert_eq!(s, StatusWord::ATF | StatusWord::TKR_TRIGGER | StatusWord::SIDE);
    }

    #[test]
    fn test_possible_and_skipped() {
        let event = EventBuilder::new()
            .tower(0, tracker_tower(&[16, 17]))
            .build();
        let dir = Directory::compose(&event).unwrap();
        let masks = AcdMasks::new(1, 0, 0);
        let table = ShadowTable::standard();
        let s = evaluate_atf(&table, &dir, &masks, 0, i32::MAX);
        assert_eq!(s, StatusWord::ATF | StatusWord::TKR_POSSIBLE);
        // too energetic to bother
        assert_eq!(evaluate_atf(&table, &dir, &masks, 101, 100), StatusWord::ATF);
    }

    #[test]
    fn test_deep_start_skips_top() {
        // coincidence begins 3 planes down
        let event = EventBuilder::new()
            .tower(0, tracker_tower(&[12, 13, 14]))
            .build();
        let dir = Directory::compose(&event).unwrap();
        let masks = AcdMasks::new(1, 0, 0);
        let s = evaluate_atf(&ShadowTable::standard(), &dir, &masks, 0, i32::MAX);
        assert_eq!(s, StatusWord::ATF | StatusWord::TKR_TRIGGER);
    }

    #[test]
    fn test_zbottom() {
        let supported = EventBuilder::new()
            .tower(3, tracker_tower(&[0, 1]))
            .build();
        let dir = Directory::compose(&supported).unwrap();
        assert!(evaluate_zbottom(&dir, 500, 400, 40).is_empty());

        let bare = EventBuilder::new().tower(3, tracker_tower(&[0])).build();
        let dir = Directory::compose(&bare).unwrap();
        assert_eq!(evaluate_zbottom(&dir, 500, 400, 40), StatusWord::ZBOTTOM);
        assert!(evaluate_zbottom(&dir, 400, 400, 40).is_empty());
    }

    #[test]
    fn test_bottom_planes() {
        let m = layer_mask([0, 1, 2]);
        assert_eq!(bottom_planes(m, m), 0x3f);
        assert_eq!(bottom_planes(layer_mask([0]), 0), 0x2);
        assert_eq!(bottom_planes(0, layer_mask([2])), 0x10);
    }
}
