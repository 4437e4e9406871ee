//! ACD geographic masks and the electronics record unpacker
//!
//! The anti-coincidence readout is organized by electronics board, not by
//! tile. Each of the 12 boards reports an 18-channel hit list, an 18-channel
//! accept list and a self-terminating list of pulse heights for the
//! accepted channels. Unpacking files every channel into one of four
//! geographic lists using a static per-board remap table:
//!
//! | list | contents                                     |
//! |------|----------------------------------------------|
//! | XZ   | Y- face tiles in bits 0..15, Y+ in 16..31    |
//! | YZ   | X- face tiles in bits 0..15, X+ in 16..31    |
//! | XY   | top face tiles, bits 0..24                   |
//! | RU   | ribbons in bits 0..7, unconnected in 16..31  |
//!
//! Boards 0..5 are read out through electronics side A, 6..11 through
//! side B. Results are kept per side; the geographic view ORs them.

use crate::bits::{bit, highest_set_bit, BitIter};
use crate::error::DecodeError;
use heapless::Vec as HVec;
use tracing::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Physical readout boards.
pub const BOARD_COUNT: usize = 12;

/// Channels per board.
pub const CHANNELS_PER_BOARD: usize = 18;

/// Hardware maximum of pulse heights per board.
pub const MAX_PHAS_PER_BOARD: usize = CHANNELS_PER_BOARD;

/// Geographic pulse height slots, indexed by remap code.
pub const PHA_SLOTS: usize = 256;

/// Capacity of the unmatched pulse height list.
pub const MAX_UNMATCHED: usize = BOARD_COUNT * MAX_PHAS_PER_BOARD;

/// Geographic list indices.
pub const LIST_XZ: usize = 0;
pub const LIST_YZ: usize = 1;
pub const LIST_XY: usize = 2;
pub const LIST_RU: usize = 3;

const LIST_COUNT: usize = 4;

/// Board names in readout order.
pub const BOARD_NAMES: [&str; BOARD_COUNT] = [
    "1LA", "2LA", "2RA", "3LA", "4LA", "4RA", "1RB", "2LB", "2RB", "3RB", "4LB", "4RB",
];

/// Struck-tile masks in the canonical geographic numbering.
///
/// `x` holds the X faces (minus in bits 0..15, plus in 16..31), `y` the Y
/// faces with the same split, `top` the 25 top tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcdMasks {
    pub top: u32,
    pub x: u32,
    pub y: u32,
}

/// Upper two rows of a side face (5 tiles per row).
pub const UPPER_ROWS: u32 = 0x3ff;

/// Upper two rows of both halves of a side face word.
pub const SIDE_FILTER_TILES: u32 = (UPPER_ROWS << 16) | UPPER_ROWS;

impl AcdMasks {
    pub fn new(top: u32, x: u32, y: u32) -> Self {
        Self { top, x, y }
    }

    pub fn is_empty(&self) -> bool {
        (self.top | self.x | self.y) == 0
    }

    /// Total number of struck tiles on all faces.
    pub fn tile_count(&self) -> u32 {
        self.top.count_ones() + self.x.count_ones() + self.y.count_ones()
    }

    /// Any side tile struck.
    pub fn any_side(&self) -> bool {
        (self.x | self.y) != 0
    }

    /// Any side tile in the upper two rows struck.
    pub fn any_side_filter(&self) -> bool {
        ((self.x | self.y) & SIDE_FILTER_TILES) != 0
    }

    /// Upper-row tiles of the X- face.
    pub fn xm(&self) -> u32 {
        self.x & UPPER_ROWS
    }

    /// Upper-row tiles of the X+ face.
    pub fn xp(&self) -> u32 {
        (self.x >> 16) & UPPER_ROWS
    }

    /// Upper-row tiles of the Y- face.
    pub fn ym(&self) -> u32 {
        self.y & UPPER_ROWS
    }

    /// Upper-row tiles of the Y+ face.
    pub fn yp(&self) -> u32 {
        (self.y >> 16) & UPPER_ROWS
    }
}

// =========================================================================
// REMAP TABLES
// =========================================================================

/// Geographic code of every board channel: `list * 32 + bit`, plus 128 for
/// side B boards. The code doubles as the pulse height slot.
const REMAP_CODES: [[u8; CHANNELS_PER_BOARD]; BOARD_COUNT] = [
    // 1LA
    [42, 116, 102, 117, 43, 38, 33, 44, 39, 34, 35, 40, 45, 103, 36, 41, 46, 47],
    // 2LA
    [37, 32, 10, 5, 96, 0, 64, 69, 74, 11, 6, 1, 65, 70, 75, 76, 118, 66],
    // 2RA
    [12, 98, 7, 2, 71, 72, 67, 3, 8, 13, 73, 68, 4, 119, 9, 14, 122, 15],
    // 3LA
    [62, 120, 101, 121, 61, 56, 51, 60, 55, 50, 49, 54, 59, 100, 48, 53, 58, 63],
    // 4LA
    [57, 52, 112, 30, 99, 25, 20, 88, 83, 78, 29, 24, 19, 87, 82, 77, 113, 86],
    // 4RA
    [28, 97, 23, 18, 81, 80, 85, 17, 22, 27, 79, 84, 16, 114, 21, 26, 115, 31],
    // 1RB
    [175, 170, 165, 160, 228, 171, 166, 161, 162, 167, 172, 163, 168, 173, 245, 229, 244, 174],
    // 2LB
    [194, 225, 204, 203, 198, 193, 129, 134, 139, 202, 197, 192, 128, 246, 133, 138, 243, 143],
    // 2RB
    [181, 176, 142, 137, 227, 132, 196, 201, 141, 136, 131, 195, 200, 199, 130, 135, 247, 140],
    // 3RB
    [191, 190, 185, 180, 231, 189, 184, 179, 178, 183, 188, 177, 182, 187, 248, 230, 249, 186],
    // 4LB
    [214, 226, 205, 210, 215, 147, 152, 157, 206, 211, 216, 148, 153, 250, 158, 240, 241, 159],
    // 4RB
    [169, 164, 154, 149, 224, 144, 212, 207, 155, 150, 145, 213, 208, 209, 146, 151, 242, 156],
];

/// Static remap data for one board.
#[derive(Clone, Copy, Debug)]
pub struct BoardRemap {
    /// Board channels (left-justified, channel 0 at the MSB) per list.
    pub msks: [u32; LIST_COUNT],
    /// Geographic bit (LSB = 0) of each channel within its list.
    pub rma: [u8; CHANNELS_PER_BOARD],
    /// Pulse height slot of each channel.
    pub rmc: [u8; CHANNELS_PER_BOARD],
}

const fn build_remap() -> [BoardRemap; BOARD_COUNT] {
    let mut out = [BoardRemap {
        msks: [0; LIST_COUNT],
        rma: [0; CHANNELS_PER_BOARD],
        rmc: [0; CHANNELS_PER_BOARD],
    }; BOARD_COUNT];
    let mut brd = 0;
    while brd < BOARD_COUNT {
        let mut chn = 0;
        while chn < CHANNELS_PER_BOARD {
            let code = REMAP_CODES[brd][chn];
            let list = (code as usize / 32) % LIST_COUNT;
            out[brd].msks[list] |= 0x8000_0000 >> chn;
            out[brd].rma[chn] = code & 0x1f;
            out[brd].rmc[chn] = code;
            chn += 1;
        }
        brd += 1;
    }
    out
}

/// Remap tables for all boards, in readout order.
pub static REMAP: [BoardRemap; BOARD_COUNT] = build_remap();

/// Move each set channel of `list` to its geographic bit.
#[inline]
pub fn remap(list: u32, rma: &[u8; CHANNELS_PER_BOARD]) -> u32 {
    BitIter::new(list).fold(0, |acc, chn| match rma.get(chn as usize) {
        Some(&r) => acc | (1u32 << r),
        None => acc,
    })
}

// =========================================================================
// UNPACKED RECORD
// =========================================================================

/// A fully unpacked ACD record.
#[derive(Clone, Debug)]
pub struct AcdRecord {
    /// Hit lists, `[side][list]`.
    pub hits: [[u32; LIST_COUNT]; 2],
    /// Accepted channels that received a pulse height, `[side][list]`.
    pub paccepts: [[u32; LIST_COUNT]; 2],
    /// Accepted channels left without a pulse height, `[side][list]`.
    pub naccepts: [[u32; LIST_COUNT]; 2],
    /// Header parity errors in bits 0..11, missing start bits in 16..27.
    pub start_parity: u32,
    /// PHA parity errors in bits 0..11, unmatched PHAs in 16..27.
    pub unmatched_parity: u32,
    /// Number of pulse heights read, matched or not.
    pub nphas: u32,
    /// Pulse heights by geographic slot.
    pub phas: [u16; PHA_SLOTS],
    /// Pulse heights that found no accept bit.
    pub uphas: HVec<u16, MAX_UNMATCHED>,
}

impl Default for AcdRecord {
    fn default() -> Self {
        Self {
            hits: [[0; LIST_COUNT]; 2],
            paccepts: [[0; LIST_COUNT]; 2],
            naccepts: [[0; LIST_COUNT]; 2],
            start_parity: 0,
            unmatched_parity: 0,
            nphas: 0,
            phas: [0; PHA_SLOTS],
            uphas: HVec::new(),
        }
    }
}

/// Reads the big-endian half-word stream of an ACD contributor.
struct HalfWords<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> HalfWords<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    fn next(&mut self, board: usize) -> Result<u16, DecodeError> {
        let word = self
            .words
            .get(self.pos / 2)
            .ok_or(DecodeError::AcdTruncated {
                board,
                offset: self.pos,
            })?;
        let half = if self.pos % 2 == 0 { word >> 16 } else { word & 0xffff };
        self.pos += 1;
        Ok(half as u16)
    }
}

impl AcdRecord {
    /// Unpack the ACD contributor payload.
    ///
    /// Parity problems are recorded and decoding carries on. A truncated
    /// record or a board reporting more than 18 pulse heights aborts.
    pub fn unpack(payload: &[u32]) -> Result<Self, DecodeError> {
        let mut acd = Self::default();
        let mut data = HalfWords::new(payload);

        for side in 0..2 {
            let mut hits = [0u32; LIST_COUNT];
            let mut paccepts = [0u32; LIST_COUNT];
            let mut naccepts = [0u32; LIST_COUNT];

            for ibrd in 0..6 {
                let brd = 6 * side + ibrd;
                let rmb = &REMAP[brd];

                let d0 = u32::from(data.next(brd)?);
                let d1 = u32::from(data.next(brd)?);
                let d2 = u32::from(data.next(brd)?);

                if d0 & 0x8000 == 0 {
                    acd.start_parity |= 0x10000 << brd;
                }
                if d2 & (1 << 9) != 0 {
                    acd.start_parity |= 1 << brd;
                }

                let hit = (((d0 & 0x7fff) << 3) | (d1 >> 13)) << 14;
                let mut paccept = (((d1 & 0x1fff) << 5) | (d2 >> 11)) << 14;
                let mut naccept = paccept;

                if d2 & (1 << 10) != 0 {
                    let mut remaining = MAX_PHAS_PER_BOARD;
                    loop {
                        let raw = data.next(brd)?;
                        acd.nphas += 1;
                        if raw & 1 != 0 {
                            acd.unmatched_parity |= 1 << brd;
                        }
                        // arithmetic shift drops the parity bit
                        let w = ((raw as i16) >> 1) as u16;

                        if remaining == 0 {
                            return Err(DecodeError::PhaOverflow {
                                board: brd,
                                max: MAX_PHAS_PER_BOARD,
                            });
                        }
                        remaining -= 1;

                        match highest_set_bit(naccept) {
                            Some(chn) => {
                                naccept &= !bit(chn);
                                let slot = usize::from(rmb.rmc[chn as usize]);
                                acd.phas[slot] = w & !0x2000;
                            }
                            None => {
                                acd.unmatched_parity |= 0x10000 << brd;
                                // at most 18 per board, 216 in all
                                let _ = acd.uphas.push(w);
                            }
                        }

                        if w & (1 << 13) == 0 {
                            break;
                        }
                    }
                }

                if hit | paccept != 0 {
                    for list in 0..LIST_COUNT {
                        hits[list] |= remap(hit & rmb.msks[list], &rmb.rma);
                    }
                    paccept &= !naccept;
                    for list in 0..LIST_COUNT {
                        paccepts[list] |= remap(paccept & rmb.msks[list], &rmb.rma);
                        naccepts[list] |= remap(naccept & rmb.msks[list], &rmb.rma);
                    }
                }
            }

            acd.hits[side] = hits;
            acd.paccepts[side] = paccepts;
            acd.naccepts[side] = naccepts;
        }

        if acd.start_parity | acd.unmatched_parity != 0 {
            warn!(
                start_parity = acd.start_parity,
                unmatched_parity = acd.unmatched_parity,
                "ACD record parity anomalies"
            );
        }

        Ok(acd)
    }

    /// Hit tiles of both sides in the geographic face layout.
    pub fn masks(&self) -> AcdMasks {
        let list = |l: usize| self.hits[0][l] | self.hits[1][l];
        AcdMasks {
            top: list(LIST_XY),
            x: list(LIST_YZ),
            y: list(LIST_XZ),
        }
    }

    /// All accepted channels of both sides for one list.
    pub fn accepts(&self, list: usize) -> u32 {
        (0..2).fold(0, |acc, side| {
            acc | self.paccepts[side][list] | self.naccepts[side][list]
        })
    }

    /// Summary of the parity diagnostics.
    pub fn parity(&self) -> AcdParity {
        AcdParity {
            start_parity: self.start_parity,
            unmatched_parity: self.unmatched_parity,
            nphas: self.nphas,
            unmatched: self.uphas.len() as u32,
        }
    }
}

/// Parity diagnostics of one unpacked record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcdParity {
    pub start_parity: u32,
    pub unmatched_parity: u32,
    pub nphas: u32,
    pub unmatched: u32,
}

impl AcdParity {
    /// Boards missing their start bit.
    pub fn missing_start(&self) -> u32 {
        (self.start_parity >> 16) & 0xfff
    }

    /// Boards with a header parity error.
    pub fn header_errors(&self) -> u32 {
        self.start_parity & 0xfff
    }

    /// Boards with a pulse height parity error.
    pub fn pha_errors(&self) -> u32 {
        self.unmatched_parity & 0xfff
    }

    /// Boards with a pulse height but no accept bit left.
    pub fn unmatched_boards(&self) -> u32 {
        (self.unmatched_parity >> 16) & 0xfff
    }

    pub fn is_clean(&self) -> bool {
        self.start_parity == 0 && self.unmatched_parity == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::AcdBoardData;

    fn unpack(boards: &[AcdBoardData; BOARD_COUNT]) -> Result<AcdRecord, DecodeError> {
        AcdRecord::unpack(&crate::builder::encode_acd(boards))
    }

    #[test]
    fn test_remap_tables_cover_every_channel() {
        for brd in &REMAP {
            let union = brd.msks.iter().fold(0u32, |acc, m| acc | m);
            assert_eq!(union, 0xffff_c000);
            let overlap: u32 = brd.msks.iter().map(|m| m.count_ones()).sum();
            assert_eq!(overlap, 18);
        }
    }

    #[test]
    fn test_remap_codes_unique() {
        let mut seen = [false; PHA_SLOTS];
        for brd in &REMAP_CODES {
            for &c in brd {
                assert!(!seen[c as usize], "duplicate code {}", c);
                seen[c as usize] = true;
            }
        }
    }

    #[test]
    fn test_empty_record() {
        let acd = unpack(&Default::default()).unwrap();
        assert!(acd.masks().is_empty());
        assert!(acd.parity().is_clean());
        assert_eq!(acd.nphas, 0);
    }

    #[test]
    fn test_hit_lands_on_geographic_tile() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        // 2LA channel 5 is code 0: first Y- tile
        boards[1].hit = 1 << (17 - 5);
        // 2LA channel 6 is code 64: first top tile
        boards[1].hit |= 1 << (17 - 6);
        let acd = unpack(&boards).unwrap();
        assert_eq!(acd.masks(), AcdMasks::new(1, 0, 1));
    }

    #[test]
    fn test_pha_filed_by_slot() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[1].accept = 1 << (17 - 6);
        boards[1].phas = vec![0x123];
        let acd = unpack(&boards).unwrap();
        assert_eq!(acd.phas[64], 0x123);
        assert_eq!(acd.paccepts[0][LIST_XY], 1);
        assert_eq!(acd.naccepts[0][LIST_XY], 0);
        assert_eq!(acd.nphas, 1);
        assert!(acd.parity().is_clean());
    }

    #[test]
    fn test_accept_without_pha() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[7].accept = 1 << 17; // 2LB channel 0, code 194
        let acd = unpack(&boards).unwrap();
        assert_eq!(acd.naccepts[1][LIST_XY], 1 << 2);
        assert_eq!(acd.paccepts[1][LIST_XY], 0);
    }

    #[test]
    fn test_unmatched_and_parity_flags() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[3].phas = vec![0x10, 0x20];
        boards[3].pha_parity = true;
        boards[4].header_parity = true;
        boards[5].missing_start = true;
        let acd = unpack(&boards).unwrap();
        let p = acd.parity();
        assert_eq!(p.unmatched_boards(), 1 << 3);
        assert_eq!(p.pha_errors(), 1 << 3);
        assert_eq!(p.header_errors(), 1 << 4);
        assert_eq!(p.missing_start(), 1 << 5);
        // kept as received, continuation bit included
        assert_eq!(acd.uphas.as_slice(), &[0x2010, 0x20]);
    }

    #[test]
    fn test_truncated_record() {
        let words = crate::builder::encode_acd(&Default::default());
        let err = AcdRecord::unpack(&words[..4]).unwrap_err();
        assert!(matches!(err, DecodeError::AcdTruncated { .. }));
    }

    #[test]
    fn test_upper_row_accessors() {
        let m = AcdMasks::new(0, 0x0401_0001, 0x0002_0400);
        assert_eq!(m.xm(), 1);
        assert_eq!(m.xp(), 0x001);
        assert_eq!(m.ym(), 0);
        assert_eq!(m.yp(), 2);
        assert!(m.any_side_filter());
        assert_eq!(m.tile_count(), 5);
    }
}
