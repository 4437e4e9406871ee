//! Per-event result record

use crate::acd::{AcdParity, MAX_UNMATCHED};
use crate::directory::TOWER_COUNT;
use crate::status::StatusWord;
use heapless::Vec as HVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Byte sizes of one tower's sections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemSize {
    /// Whole contributor, header included.
    pub tem: u32,
    pub cal: u32,
    pub tkr: u32,
}

/// Byte sizes of every section of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventSizes {
    pub evt: u32,
    pub gem: u32,
    pub acd: u32,
    pub tem: [TemSize; TOWER_COUNT],
}

/// Clock readings as each stage finished. Zero for stages not reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StageTimes {
    pub beg: u64,
    pub cal0: u64,
    pub acd: u64,
    pub dir: u64,
    pub atf: u64,
    pub cal1: u64,
    pub tkr: u64,
}

impl StageTimes {
    /// Time from the start of the event to the last stage reached.
    pub fn elapsed(&self) -> u64 {
        let last = [self.cal0, self.acd, self.dir, self.atf, self.cal1, self.tkr]
            .into_iter()
            .max()
            .unwrap_or(0);
        last.saturating_sub(self.beg)
    }
}

/// Outcome of the tracker stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackSummary {
    /// Nominated towers: 6-of-6 class in the high half, 4-of-4 class in
    /// the low half, `0x8000_0000 >> tower` and `0x8000 >> tower`.
    pub nominated: u32,
    /// Towers that produced projections, `0x8000 >> tower`.
    pub projected: u16,
    /// Projections found across all towers.
    pub projections: u32,
}

/// Everything the filter learned about one event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultRecord {
    /// Sequence number of the first contributor.
    pub evt_num: u32,
    pub status: StatusWord,
    /// Calorimeter energy in LEU, -1 until summed.
    pub energy: i32,
    pub layer_energy: [i32; 8],
    pub times: StageTimes,
    pub sizes: EventSizes,
    pub acd: AcdParity,
    /// ACD pulse heights that found no accept bit, as received.
    pub unmatched_phas: HVec<u16, MAX_UNMATCHED>,
    pub tkr: TrackSummary,
}

impl ResultRecord {
    /// Record for an event not yet evaluated.
    pub fn new() -> Self {
        Self {
            energy: -1,
            ..Self::default()
        }
    }

    pub fn is_vetoed(&self) -> bool {
        self.status.contains(StatusWord::VETOED)
    }
}
