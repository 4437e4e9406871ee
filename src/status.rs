//! Status word - the per-event audit trail of filter decisions
//!
//! The low 32 bits keep the classic layout shared with downstream
//! consumers: informational bits 0..14, veto bits 15..30 and the aggregate
//! `VETOED` bit 31. Bits 32 and up carry ACD parity diagnostics.
//!
//! Bits are only ever OR'd in; nothing in the pipeline clears a bit once set.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Accumulated status bits for one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusWord(u64);

impl StatusWord {
    // =========================================================================
    // STAGE COMPLETION
    // =========================================================================

    /// ACD classification and calorimeter phase 0 completed.
    pub const ACD: Self = Self(0x0000_0001);
    /// Event directory composed.
    pub const DIR: Self = Self(0x0000_0002);
    /// Shadow-match stage completed.
    pub const ATF: Self = Self(0x0000_0004);
    /// Calorimeter phase 1 completed.
    pub const CAL1: Self = Self(0x0000_0008);
    /// Tracker stage completed.
    pub const TKR: Self = Self(0x0000_0010);

    // =========================================================================
    // INFORMATIONAL
    // =========================================================================

    /// At least one top tile struck.
    pub const ACD_TOP: Self = Self(0x0000_0020);
    /// At least one side tile struck.
    pub const ACD_SIDE: Self = Self(0x0000_0040);
    /// A side tile in the filter rows struck.
    pub const ACD_SIDE_FILTER: Self = Self(0x0000_0080);
    /// Some tower has a 4-of-4 class coincidence.
    pub const TKR_POSSIBLE: Self = Self(0x0000_0100);
    /// Some tower has a 6-of-6 or 7-of-8 class coincidence.
    pub const TKR_TRIGGER: Self = Self(0x0000_0200);
    /// Calorimeter low discriminator fired.
    pub const CAL_LO: Self = Self(0x0000_0400);
    /// Calorimeter high discriminator fired.
    pub const CAL_HI: Self = Self(0x0000_0800);
    /// Exactly one track projection pair found.
    pub const TKR_EQ_1: Self = Self(0x0000_1000);
    /// Two or more track projection pairs found.
    pub const TKR_GE_2: Self = Self(0x0000_2000);
    /// Tracker throttle bits present in the trigger summary.
    pub const TKR_THROTTLE: Self = Self(0x0000_4000);

    // =========================================================================
    // VETOES
    // =========================================================================

    /// Fewer than two projections above the low energy cut.
    pub const TKR_LT_2_ELO: Self = Self(0x0000_8000);
    /// Track projects into the skirt region.
    pub const TKR_SKIRT: Self = Self(0x0001_0000);
    /// No track candidate despite energy.
    pub const TKR_EQ_0: Self = Self(0x0002_0000);
    /// Track matches a struck side tile in row 2.
    pub const TKR_ROW2: Self = Self(0x0004_0000);
    /// Track matches a struck side tile in rows 0 or 1.
    pub const TKR_ROW01: Self = Self(0x0008_0000);
    /// Track matches a struck top tile.
    pub const TKR_TOP: Self = Self(0x0010_0000);
    /// Calorimeter energy without a bottom tracker coincidence.
    pub const ZBOTTOM: Self = Self(0x0020_0000);
    /// Layer 0 energy fraction above the upper bound.
    pub const EL0_ETOT_90: Self = Self(0x0040_0000);
    /// Layer 0 energy fraction below the lower bound.
    pub const EL0_ETOT_01: Self = Self(0x0080_0000);
    /// Side tile shadows a triggered tower.
    pub const SIDE: Self = Self(0x0100_0000);
    /// Top tile shadows a triggered tower.
    pub const TOP: Self = Self(0x0200_0000);
    /// Second-pass splash cut.
    pub const SPLASH_1: Self = Self(0x0400_0000);
    /// Upper tiles struck with energy below the mid threshold.
    pub const E350_FILTER_TILE: Self = Self(0x0800_0000);
    /// Tiles struck with energy below the low threshold.
    pub const E0_TILE: Self = Self(0x1000_0000);
    /// Splash pattern in the ACD.
    pub const SPLASH_0: Self = Self(0x2000_0000);
    /// Upper tiles struck without a calorimeter low discriminator.
    pub const NOCALLO_FILTER_TILE: Self = Self(0x4000_0000);
    /// Aggregate: some enabled veto bit is set.
    pub const VETOED: Self = Self(0x8000_0000);

    /// Every veto-class bit.
    pub const VETOES: Self = Self(0x7fff_8000);

    // =========================================================================
    // EXTENDED DIAGNOSTICS
    // =========================================================================

    /// Some ACD board lacked its start bit.
    pub const ACD_START_PARITY: Self = Self(1 << 32);
    /// Some ACD board header failed parity.
    pub const ACD_HEADER_PARITY: Self = Self(1 << 33);
    /// Some ACD pulse height failed parity.
    pub const ACD_PHA_PARITY: Self = Self(1 << 34);
    /// Some ACD pulse height had no accept bit to pair with.
    pub const ACD_UNMATCHED_PHA: Self = Self(1 << 35);

    /// All extended diagnostic bits.
    pub const ACD_PARITY: Self = Self(0xf << 32);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The classic 32-bit status word.
    pub const fn low_word(self) -> u32 {
        self.0 as u32
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Veto-class bits currently set.
    pub const fn vetoes(self) -> Self {
        Self(self.0 & Self::VETOES.0)
    }

    /// Whether any bit of the enabled veto mask is set.
    pub const fn is_vetoed_by(self, enabled: Self) -> bool {
        self.0 & enabled.0 != 0
    }

    /// Name of every set bit, low to high.
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

const NAMES: [(StatusWord, &str); 36] = [
    (StatusWord::ACD, "ACD"),
    (StatusWord::DIR, "DIR"),
    (StatusWord::ATF, "ATF"),
    (StatusWord::CAL1, "CAL1"),
    (StatusWord::TKR, "TKR"),
    (StatusWord::ACD_TOP, "ACD_TOP"),
    (StatusWord::ACD_SIDE, "ACD_SIDE"),
    (StatusWord::ACD_SIDE_FILTER, "ACD_SIDE_FILTER"),
    (StatusWord::TKR_POSSIBLE, "TKR_POSSIBLE"),
    (StatusWord::TKR_TRIGGER, "TKR_TRIGGER"),
    (StatusWord::CAL_LO, "CAL_LO"),
    (StatusWord::CAL_HI, "CAL_HI"),
    (StatusWord::TKR_EQ_1, "TKR_EQ_1"),
    (StatusWord::TKR_GE_2, "TKR_GE_2"),
    (StatusWord::TKR_THROTTLE, "TKR_THROTTLE"),
    (StatusWord::TKR_LT_2_ELO, "TKR_LT_2_ELO"),
    (StatusWord::TKR_SKIRT, "TKR_SKIRT"),
    (StatusWord::TKR_EQ_0, "TKR_EQ_0"),
    (StatusWord::TKR_ROW2, "TKR_ROW2"),
    (StatusWord::TKR_ROW01, "TKR_ROW01"),
    (StatusWord::TKR_TOP, "TKR_TOP"),
    (StatusWord::ZBOTTOM, "ZBOTTOM"),
    (StatusWord::EL0_ETOT_90, "EL0_ETOT_90"),
    (StatusWord::EL0_ETOT_01, "EL0_ETOT_01"),
    (StatusWord::SIDE, "SIDE"),
    (StatusWord::TOP, "TOP"),
    (StatusWord::SPLASH_1, "SPLASH_1"),
    (StatusWord::E350_FILTER_TILE, "E350_FILTER_TILE"),
    (StatusWord::E0_TILE, "E0_TILE"),
    (StatusWord::SPLASH_0, "SPLASH_0"),
    (StatusWord::NOCALLO_FILTER_TILE, "NOCALLO_FILTER_TILE"),
    (StatusWord::VETOED, "VETOED"),
    (StatusWord::ACD_START_PARITY, "ACD_START_PARITY"),
    (StatusWord::ACD_HEADER_PARITY, "ACD_HEADER_PARITY"),
    (StatusWord::ACD_PHA_PARITY, "ACD_PHA_PARITY"),
    (StatusWord::ACD_UNMATCHED_PHA, "ACD_UNMATCHED_PHA"),
];

impl BitOr for StatusWord {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusWord {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StatusWord {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        f.write_str(&self.names().join("|"))
    }
}
