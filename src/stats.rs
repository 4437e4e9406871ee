//! Run statistics
//!
//! Histograms of filter outcomes binned by calorimeter energy. Every status
//! bit and a handful of event categories get their own histogram, kept
//! twice: once for all events and once for the events that reached the
//! tracker stage.
//!
//! Feed it results directly, or wrap it in a [`Mutex`] and subscribe it to
//! the filter as an observer.

use crate::cal::mev_to_leu;
use crate::observer::{FilterEvent, FilterObserver};
use crate::results::ResultRecord;
use crate::status::StatusWord;
use std::sync::Mutex;
use tracing::info;

/// Energy bins per histogram.
pub const ENERGY_BINS: usize = 7;

/// Upper edges of bins 1..5 in MeV. Bin 0 holds unknown or non-positive
/// energies, bin 6 everything above the last edge.
pub const BIN_EDGES_MEV: [i32; ENERGY_BINS - 2] = [10, 300, 350, 500, 5000];

/// Status bits with their own histogram.
pub const STATUS_BITS: usize = 36;

/// Energy bin of a calorimeter energy in LEU.
pub fn energy_bin(energy: i32) -> usize {
    if energy <= 0 {
        return 0;
    }
    BIN_EDGES_MEV
        .iter()
        .position(|&mev| energy <= mev_to_leu(mev))
        .map_or(ENERGY_BINS - 1, |i| i + 1)
}

/// Event counts per energy bin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnergyHistogram {
    pub bins: [u64; ENERGY_BINS],
}

impl EnergyHistogram {
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    fn add(&mut self, bin: usize) {
        self.bins[bin] += 1;
    }

    fn merge(&mut self, other: &Self) {
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }
}

/// Event classes counted alongside the status bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    All,
    /// No ACD tile struck.
    NoTiles,
    /// No top or upper-row side tile struck.
    NoFilterTiles,
    /// A top or upper-row side tile struck.
    FilterTiles,
    /// Triggered by CAL-LO alone.
    CalLoOnly,
    /// CAL-LO alone and flagged `ZBOTTOM`.
    CalLoOnlyZbottom,
    /// Any veto bit set, enabled or not.
    AnyVeto,
    NoVeto,
}

impl Category {
    pub const COUNT: usize = 8;

    pub const ALL: [Category; Self::COUNT] = [
        Self::All,
        Self::NoTiles,
        Self::NoFilterTiles,
        Self::FilterTiles,
        Self::CalLoOnly,
        Self::CalLoOnlyZbottom,
        Self::AnyVeto,
        Self::NoVeto,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::NoTiles => "no_tiles",
            Self::NoFilterTiles => "no_filter_tiles",
            Self::FilterTiles => "filter_tiles",
            Self::CalLoOnly => "cal_lo_only",
            Self::CalLoOnlyZbottom => "cal_lo_only_zbottom",
            Self::AnyVeto => "any_veto",
            Self::NoVeto => "no_veto",
        }
    }

    /// Whether an event with this status belongs to the category.
    pub fn matches(self, status: StatusWord) -> bool {
        let tiles = StatusWord::ACD_TOP | StatusWord::ACD_SIDE;
        let filter_tiles = StatusWord::ACD_TOP | StatusWord::ACD_SIDE_FILTER;
        let triggers = StatusWord::CAL_LO
            | StatusWord::CAL_HI
            | StatusWord::TKR_POSSIBLE
            | StatusWord::TKR_TRIGGER;
        let cal_lo_only = (status & triggers) == StatusWord::CAL_LO;
        match self {
            Self::All => true,
            Self::NoTiles => !status.intersects(tiles),
            Self::NoFilterTiles => !status.intersects(filter_tiles),
            Self::FilterTiles => status.intersects(filter_tiles),
            Self::CalLoOnly => cal_lo_only,
            Self::CalLoOnlyZbottom => cal_lo_only && status.contains(StatusWord::ZBOTTOM),
            Self::AnyVeto => !status.vetoes().is_empty(),
            Self::NoVeto => status.vetoes().is_empty(),
        }
    }
}

/// Histograms for one event population.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tally {
    bits: [EnergyHistogram; STATUS_BITS],
    categories: [EnergyHistogram; Category::COUNT],
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            bits: [EnergyHistogram::default(); STATUS_BITS],
            categories: [EnergyHistogram::default(); Category::COUNT],
        }
    }
}

impl Tally {
    /// Histogram of a single status bit. Multi-bit or unknown flags yield `None`.
    pub fn bit(&self, flag: StatusWord) -> Option<&EnergyHistogram> {
        let bits = flag.bits();
        if bits.count_ones() != 1 {
            return None;
        }
        self.bits.get(bits.trailing_zeros() as usize)
    }

    pub fn category(&self, category: Category) -> &EnergyHistogram {
        &self.categories[category as usize]
    }

    fn add(&mut self, status: StatusWord, bin: usize) {
        let bits = status.bits();
        for (i, hist) in self.bits.iter_mut().enumerate() {
            if bits & (1 << i) != 0 {
                hist.add(bin);
            }
        }
        for category in Category::ALL {
            if category.matches(status) {
                self.categories[category as usize].add(bin);
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            a.merge(b);
        }
        for (a, b) in self.categories.iter_mut().zip(other.categories.iter()) {
            a.merge(b);
        }
    }
}

/// Accumulated statistics of a filter run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterStatistics {
    /// Every event.
    pub all: Tally,
    /// Events that reached the tracker stage.
    pub tracked: Tally,
    events: u64,
}

impl FilterStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event.
    pub fn accumulate(&mut self, status: StatusWord, energy: i32) {
        let mut status = status;
        // a real tower trigger supersedes a possible one
        if status.contains(StatusWord::TKR_TRIGGER) {
            status = StatusWord::from_bits(status.bits() & !StatusWord::TKR_POSSIBLE.bits());
        }
        let bin = energy_bin(energy);
        self.events += 1;
        self.all.add(status, bin);
        if status.contains(StatusWord::TKR) {
            self.tracked.add(status, bin);
        }
    }

    pub fn accumulate_result(&mut self, result: &ResultRecord) {
        self.accumulate(result.status, result.energy);
    }

    /// Add another run's statistics into this one.
    pub fn merge(&mut self, other: &Self) {
        self.all.merge(&other.all);
        self.tracked.merge(&other.tracked);
        self.events += other.events;
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Log the category totals.
    pub fn log_summary(&self) {
        for category in Category::ALL {
            info!(
                category = category.name(),
                all = self.all.category(category).total(),
                tracked = self.tracked.category(category).total(),
                "filter statistics"
            );
        }
    }
}

impl FilterObserver for Mutex<FilterStatistics> {
    fn on_event(&self, event: &FilterEvent) {
        let (status, energy) = match event {
            FilterEvent::Accepted { status, energy, .. } => (*status, *energy),
            FilterEvent::Vetoed { status, energy, .. } => (*status, *energy),
            _ => return,
        };
        let mut stats = self.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.accumulate(status, energy);
    }
}
