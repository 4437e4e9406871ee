//! ACD splash veto
//!
//! A splash is a hit pattern that looks like secondary particles sprayed
//! back out of the calorimeter rather than one charged particle entering.
//! The condition is satisfied when at least three tiles are struck and at
//! least one pair of them are 'far' neighbors.
//!
//! Only the top face and the upper two rows of each side face take part.
//! These 65 tiles are packed into two words plus one lone tile:
//!
//! - word 0: the 25 top tiles followed by tiles 2..8 of the upper Y+ row
//! - word 1: the first 10 tiles of X-, X+ and Y-, then tiles 0 and 1 of Y+
//! - tile 64: the last tile of the upper Y+ row
//!
//! The adjacency tables are published detector geometry and are reproduced
//! as is, including the few edge positions whose near/far assignment is not
//! symmetric.

use crate::acd::AcdMasks;
use crate::bits::{bit, highest_set_bit, move_bits, BitIter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The y-face bit carrying tile 64.
pub const TILE_64: u32 = 1 << 25;

/// Near/far neighbor masks for every splash tile.
///
/// `far_0[n]` holds, for tile `n` of word 0, the far tiles in word 0 and
/// word 1. `far_1[n]` does the same for tile `n` of word 1. `far_64` covers
/// the lone tile.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SplashMap {
    pub far_0: [[u32; 2]; 32],
    pub far_1: [[u32; 2]; 32],
    pub far_64: [u32; 2],
}

impl SplashMap {
    /// The flight adjacency map.
    pub const fn standard() -> Self {
        Self {
            far_0: FAR_0,
            far_1: FAR_1,
            far_64: FAR_64,
        }
    }

    /// Build a map from a relation over the 64 packed tile positions.
    ///
    /// Positions 0..32 are word 0 (MSB first), 32..64 are word 1. The lone
    /// tile never matches.
    pub fn from_relation(far: impl Fn(usize, usize) -> bool) -> Self {
        let mut far_0 = [[0u32; 2]; 32];
        let mut far_1 = [[0u32; 2]; 32];
        for n in 0..32 {
            for m in 0..32 {
                let b = bit(m as u32);
                if far(n, m) {
                    far_0[n][0] |= b;
                }
                if far(n, 32 + m) {
                    far_0[n][1] |= b;
                }
                if far(32 + n, m) {
                    far_1[n][0] |= b;
                }
                if far(32 + n, 32 + m) {
                    far_1[n][1] |= b;
                }
            }
        }
        Self {
            far_0,
            far_1,
            far_64: [0, 0],
        }
    }

    /// Evaluate the splash condition for the struck tiles.
    pub fn is_splash(&self, masks: &AcdMasks) -> bool {
        let (acd_0, acd_1) = pack(masks);
        self.evaluate_words(acd_0, acd_1, masks.y & TILE_64 != 0)
    }

    /// Evaluate the splash condition on already packed words.
    pub fn evaluate_words(&self, mut acd_0: u32, mut acd_1: u32, tile_64: bool) -> bool {
        if tile_64 {
            if let Some(n) = highest_set_bit(acd_0 & self.far_64[0]) {
                if acd_1 | (acd_0 & !bit(n)) != 0 {
                    return true;
                }
            }
            if let Some(n) = highest_set_bit(acd_1 & self.far_64[1]) {
                if acd_0 | (acd_1 & !bit(n)) != 0 {
                    return true;
                }
            }
        }

        match (acd_0 != 0, acd_1 != 0) {
            (true, true) => {
                let Some(n) = highest_set_bit(acd_0) else {
                    return false;
                };
                let n = n as usize;
                acd_0 &= !bit(n as u32);

                // acd_1 already supplies the third tile
                if acd_0 & self.far_0[n][0] != 0 {
                    return true;
                }

                let far = acd_1 & self.far_0[n][1];
                if let Some(m) = highest_set_bit(far) {
                    if acd_0 != 0 {
                        return true;
                    }
                    return acd_1 & !bit(m) != 0;
                }

                while let Some(n) = highest_set_bit(acd_0) {
                    let n = n as usize;
                    if acd_0 & self.far_0[n][0] != 0 {
                        return true;
                    }
                    acd_0 &= !bit(n as u32);
                    if acd_1 & self.far_0[n][1] != 0 {
                        return true;
                    }
                }

                while let Some(n) = highest_set_bit(acd_1) {
                    acd_1 &= !bit(n);
                    if acd_1 & self.far_1[n as usize][1] != 0 {
                        return true;
                    }
                }
                false
            }
            (true, false) => evaluate_one(acd_0, &self.far_0, 0),
            (false, true) => evaluate_one(acd_1, &self.far_1, 1),
            (false, false) => false,
        }
    }
}

impl Default for SplashMap {
    fn default() -> Self {
        Self::standard()
    }
}

/// Pack the face masks into the two splash words.
pub fn pack(masks: &AcdMasks) -> (u32, u32) {
    let acd_0 = masks.top | move_bits(masks.y, 18, 7, 25);
    let acd_1 = move_bits(masks.x, 0, 10, 0)
        | move_bits(masks.x, 16, 10, 10)
        | move_bits(masks.y, 0, 10, 20)
        | move_bits(masks.y, 16, 2, 30);
    (acd_0, acd_1)
}

/// Single-word case: one tile in hand, need a far pair plus a third tile.
fn evaluate_one(mut acd: u32, far: &[[u32; 2]; 32], which: usize) -> bool {
    let Some(n) = highest_set_bit(acd) else {
        return false;
    };
    acd &= !bit(n);
    if let Some(m) = highest_set_bit(acd & far[n as usize][which]) {
        acd &= !bit(m);
        if acd != 0 {
            return true;
        }
    }

    let mut rest = BitIter::new(acd);
    while let Some(n) = rest.next() {
        if rest.remaining() & far[n as usize][which] != 0 {
            return true;
        }
    }
    false
}

const FAR_0: [[u32; 2]; 32] = [
    [0x31ffffff, 0xffffffff],
    [0x19ffffff, 0x7fffffff],
    [0x8dffffff, 0x3fffffff],
    [0xcfffffff, 0x3ffffdef],
    [0x727fffff, 0xfff7bfff],
    [0x303fffff, 0xffffffff],
    [0x191fffff, 0x7fffffff],
    [0xf273ffff, 0xffff9fff],
    [0xf031ffff, 0xffffffff],
    [0xf918ffff, 0x7fffffff],
    [0xfd8c7fff, 0x3fffffff],
    [0xffce7fff, 0x3fffffe7],
    [0xfe739fff, 0xffff8fff],
    [0xfe318fff, 0xffffffff],
    [0xff18c7ff, 0xffffffff],
    [0xff8c63ff, 0xffffffff],
    [0xffce73ff, 0xffffffe3],
    [0xfff39cff, 0xffffc7ff],
    [0xfff18c7f, 0xffffffff],
    [0xfff8c63f, 0xffffffff],
    [0xfffc631f, 0xffffffff],
    [0xfffe739f, 0xfffffff1],
    [0xffff9ce7, 0xffffe3ff],
    [0xffff8c63, 0xffffffff],
    [0xffffc631, 0xffffffff],
    [0xffffe318, 0xffffffff],
    [0xfffff39c, 0xfffffff8],
    [0xfffffce7, 0xf27ff3ff],
    [0xfffffc63, 0xf03fffff],
    [0xfffffe31, 0xf91fffff],
    [0xffffff18, 0xfd8fffff],
    [0xffffff9c, 0xffcffffc],
];

const FAR_1: [[u32; 2]; 32] = [
    [0x8d8fffff, 0x3fffffff],
    [0xcfcfffff, 0x3ffffdef],
    [0xffffffff, 0xf27f7bff],
    [0xffffffff, 0xf03fffff],
    [0xffffffff, 0xd91fffff],
    [0xffffffff, 0xcd8fffff],
    [0xffffffff, 0xcfcfffde],
    [0xffffffe7, 0xf27f7bff],
    [0xffffffe3, 0xf03fffff],
    [0xfffffff1, 0xd91fffff],
    [0xfffffff8, 0xcd8fffff],
    [0xfffffffc, 0xcfcfffde],
    [0xf7ffffff, 0xfff39fff],
    [0xffffffff, 0xfff18fff],
    [0xffffffff, 0xfff8c7ff],
    [0xffffffff, 0xfffc63ff],
    [0xffffffff, 0xf6fe73ff],
    [0xf6f7ffff, 0xfff39fff],
    [0xfef7bfff, 0xfff18fff],
    [0xfff7bdff, 0xfff8c7ff],
    [0xffffbdef, 0xfffc63ff],
    [0xfffffdef, 0xf6fe73ff],
    [0xefffffff, 0xbffffce7],
    [0xffffffff, 0xfffffc63],
    [0xffffffff, 0xfffffe31],
    [0xffffffff, 0xffffff18],
    [0xffffffff, 0xefefff9c],
    [0xefef7fff, 0xbffffce7],
    [0xffef7bff, 0xfffffc63],
    [0xffff7bdf, 0xfffffe31],
    [0xfffffbde, 0xffffff18],
    [0xffffffde, 0xefefff9c],
];

const FAR_64: [u32; 2] = [0x73ffffff, 0xfff7bfff];
