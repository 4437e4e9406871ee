//! Tracker trigger former
//!
//! Each tower reports, per view, which of its 18 tracker layers saw a hit.
//! The masks arrive right-justified with the even layers in bits 0..8
//! (layer 0 at bit 8) and the odd layers in bits 9..17 (layer 1 at bit 17).
//! Layer 17 is nearest the top face.
//!
//! Forming a trigger spreads the two halves apart by 7 bits so that shifting
//! one half never bleeds into the other:
//!
//! ```text
//!   bit   24       16       8       0
//!          13579bdfh ....... 02468aceg
//! ```
//!
//! A one-bit rotation across the halves then lines up every pair of
//! adjacent layers, and coincidences are plain ANDs of shifted copies.

use crate::bits::{highest_set_bit, LAYER_MASK};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Layers in a tower's tracker.
pub const LAYER_COUNT: u32 = 18;

/// Right-justified accept bit of one layer.
#[inline]
pub const fn layer_bit(layer: u32) -> u32 {
    if layer & 1 == 0 {
        1 << (8 - layer / 2)
    } else {
        1 << (17 - (layer - 1) / 2)
    }
}

/// Right-justified accept mask of a set of layers.
pub fn layer_mask(layers: impl IntoIterator<Item = u32>) -> u32 {
    layers
        .into_iter()
        .filter(|l| *l < LAYER_COUNT)
        .fold(0, |acc, l| acc | layer_bit(l))
}

/// Decode the three tracker accept words into `(x, y)` layer masks.
///
/// The 72 bits hold four 18-bit chunks, most significant first: X low,
/// X high, Y low, Y high. Each view is the OR of its two chunks.
pub fn accept_layers(accepts: [u32; 3]) -> (u32, u32) {
    let [a0, a1, a2] = accepts;
    let x_lo = a0 >> 14;
    let x_hi = ((a0 & 0x3fff) << 4) | (a1 >> 28);
    let y_lo = (a1 >> 10) & 0x3_ffff;
    let y_hi = ((a1 & 0x3ff) << 8) | (a2 >> 24);
    (x_lo | x_hi, y_lo | y_hi)
}

/// Inverse of [`accept_layers`] with both views in their low chunk.
pub fn encode_accepts(x: u32, y: u32) -> [u32; 3] {
    let x = x & LAYER_MASK;
    let y = y & LAYER_MASK;
    [x << 14, y << 10, 0]
}

/// Best coincidence found in a tower.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TriggerClass {
    None = 0,
    FourOfFour = 1,
    SixOfSix = 2,
    SevenOfEight = 3,
}

impl TriggerClass {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            1 => Self::FourOfFour,
            2 => Self::SixOfSix,
            3 => Self::SevenOfEight,
            _ => Self::None,
        }
    }
}

const START_SHIFT: u32 = 18;
const LENGTH_SHIFT: u32 = 23;
const CLASS_SHIFT: u32 = 30;

/// Packed trigger summary of one tower.
///
/// | bits   | field                                     |
/// |--------|-------------------------------------------|
/// | 0..17  | coincident layers                         |
/// | 18..22 | start, counted down from layer 17         |
/// | 23..27 | coincidence length in planes              |
/// | 30..31 | [`TriggerClass`]                          |
///
/// The value is negative exactly for the 6-of-6 and 7-of-8 classes, which
/// callers use as a one-instruction test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriggerSummary(i32);

impl TriggerSummary {
    fn pack(class: TriggerClass, layers: u32, start: u32, length: u32) -> Self {
        let bits = (layers & LAYER_MASK)
            | ((start & 0x1f) << START_SHIFT)
            | ((length & 0x1f) << LENGTH_SHIFT)
            | ((class as u32) << CLASS_SHIFT);
        Self(bits as i32)
    }

    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn class(self) -> TriggerClass {
        TriggerClass::from_bits((self.0 as u32) >> CLASS_SHIFT)
    }

    /// A 6-of-6 or 7-of-8 coincidence.
    #[inline]
    pub fn is_trigger(self) -> bool {
        self.0 < 0
    }

    /// Coincident layers.
    ///
    /// Canonical order (bit n = layer n) for 6-of-6 and 7-of-8. A 4-of-4
    /// keeps the right-justified accept layout with each pair marked at
    /// its upper layer, and no coincidence returns the raw `x & y`.
    pub fn layers(self) -> u32 {
        (self.0 as u32) & LAYER_MASK
    }

    /// Planes between layer 17 and the first plane of the coincidence.
    pub fn start(self) -> u32 {
        ((self.0 as u32) >> START_SHIFT) & 0x1f
    }

    /// Number of planes in the coincidence.
    pub fn length(self) -> u32 {
        ((self.0 as u32) >> LENGTH_SHIFT) & 0x1f
    }
}

/// Move a split-layout coincidence into canonical layer order.
///
/// Layers 0 and 1 can never begin a coincidence and are dropped.
pub fn remap_split(trigger: u32) -> u32 {
    let mut out = 0;
    for layer in 2..LAYER_COUNT {
        let from = if layer & 1 == 0 {
            8 - layer / 2
        } else {
            24 - (layer - 1) / 2
        };
        out |= ((trigger >> from) & 1) << layer;
    }
    out
}

/// Spread a right-justified accept mask into the split layout.
#[inline]
fn split(mask: u32) -> u32 {
    (mask & 0x1ff) | ((mask & (0x1ff << 9)) << 7)
}

/// Rotate the split layout by one layer across the halves.
#[inline]
fn rotate(word: u32) -> u32 {
    (word << 16) | (word >> 17)
}

/// Form the best coincidence of a tower's X and Y layer masks.
///
/// Only the low 18 bits of each mask are used.
pub fn trigger_form(x: u32, y: u32) -> TriggerSummary {
    let x = x & LAYER_MASK;
    let y = y & LAYER_MASK;
    let xt = split(x);
    let yt = split(y);

    let xy00 = xt & yt;
    let xy11 = rotate(xy00);
    let xy01 = xy00 & xy11;

    if xy01 == 0 {
        return TriggerSummary((x & y) as i32);
    }

    let xy22 = xy00 >> 1;
    let xy02 = xy00 & xy22;
    let xy12 = xy11 & xy22;
    let xy13 = xy11 & (xy11 >> 1);
    let xy23 = xy01 >> 1;

    let xy012 = xy01 & xy22;
    let xy013 = xy01 & xy13;
    let xy023 = xy02 & xy23;
    let xy123 = xy12 & xy23;

    // each triple completed by either view of the missing plane
    let or0 = xt | yt;
    let or1 = rotate(or0);
    let seven = (xy012 & (or1 >> 1)) | (xy013 & (or0 >> 1)) | (xy023 & or1) | (xy123 & or0);

    let (class, trigger, base) = if seven != 0 {
        (TriggerClass::SevenOfEight, seven, 3)
    } else {
        let six = xy01 & xy02;
        if six == 0 {
            let layers = ((xy01 >> 7) & (0x1ff << 9)) | (xy01 & 0x1ff);
            return TriggerSummary::pack(TriggerClass::FourOfFour, layers, 0, 0);
        }
        (TriggerClass::SixOfSix, six, 2)
    };

    let layers = remap_split(trigger);
    let mut t = layers << (32 - LAYER_COUNT);
    let start = highest_set_bit(t).unwrap_or(0);
    t <<= start;
    let run = highest_set_bit(!t).unwrap_or(32);
    TriggerSummary::pack(class, layers, start, base + run)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same(layers: &[u32]) -> TriggerSummary {
        let m = layer_mask(layers.iter().copied());
        trigger_form(m, m)
    }

    #[test]
    fn test_layer_bits() {
        assert_eq!(layer_bit(0), 1 << 8);
        assert_eq!(layer_bit(16), 1);
        assert_eq!(layer_bit(1), 1 << 17);
        assert_eq!(layer_bit(17), 1 << 9);
        assert_eq!(layer_mask(0..18), LAYER_MASK);
    }

    #[test]
    fn test_accept_decoding() {
        let (x, y) = accept_layers(encode_accepts(0x2_0001, 0x1_8000));
        assert_eq!((x, y), (0x2_0001, 0x1_8000));
        // high chunks OR into the same view
        let (x, y) = accept_layers([0, 0x1000_0000, 0x0100_0000]);
        assert_eq!((x, y), (1, 1));
        assert_eq!(accept_layers([0; 3]), (0, 0));
    }

    #[test]
    fn test_no_coincidence() {
        let t = trigger_form(0x3c000, 0x3c000);
        assert_eq!(t.class(), TriggerClass::None);
        assert_eq!(t.layers(), 0x3c000);
        assert!(!t.is_trigger());
        assert_eq!(trigger_form(0, 0).raw(), 0);
    }

    #[test]
    fn test_four_of_four() {
        let t = same(&[16, 17]);
        assert_eq!(t.class(), TriggerClass::FourOfFour);
        assert_eq!(t.layers(), layer_bit(17));
        assert_eq!((t.start(), t.length()), (0, 0));
        assert!(!t.is_trigger());
        assert!(t.raw() > 0);
    }

    #[test]
    fn test_six_of_six() {
        let t = same(&[15, 16, 17]);
        assert_eq!(t.class(), TriggerClass::SixOfSix);
        assert_eq!(t.layers(), 1 << 17);
        assert_eq!((t.start(), t.length()), (0, 3));
        assert!(t.is_trigger());

        let t = same(&[13, 14, 15]);
        assert_eq!((t.start(), t.length()), (2, 3));

        let t = same(&[0, 1, 2]);
        assert_eq!(t.layers(), 1 << 2);
        assert_eq!((t.start(), t.length()), (15, 3));
    }

    #[test]
    fn test_seven_of_eight() {
        let t = same(&[14, 15, 16, 17]);
        assert_eq!(t.class(), TriggerClass::SevenOfEight);
        assert_eq!((t.start(), t.length()), (0, 4));

        // one Y plane missing still qualifies
        let x = layer_mask(10..18);
        let y = layer_mask([10, 11, 12, 13, 15, 16, 17]);
        let t = trigger_form(x, y);
        assert_eq!(t.class(), TriggerClass::SevenOfEight);
        assert_eq!(t.layers(), 0x3e000);
        assert_eq!((t.start(), t.length()), (0, 8));

        let t = trigger_form(LAYER_MASK, LAYER_MASK);
        assert_eq!(t.layers(), 0x3fff8);
        assert_eq!(t.length(), 18);
    }

    #[test]
    fn test_high_bits_ignored() {
        let m = layer_mask([15, 16, 17]);
        assert_eq!(trigger_form(m | 0xfffc_0000, m), trigger_form(m, m));
    }

    #[test]
    fn test_remap_split() {
        // layer 2 sits at bit 7, layer 17 at bit 16
        assert_eq!(remap_split(1 << 7), 1 << 2);
        assert_eq!(remap_split(1 << 16), 1 << 17);
        assert_eq!(remap_split(1 << 24), 0);
        assert_eq!(remap_split(1 << 8), 0);
    }
}
