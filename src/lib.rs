//! Onboard Filter - first-level background rejection for a gamma-ray telescope
//!
//! Charged cosmic rays outnumber gamma rays by orders of magnitude. This
//! crate decides, event by event and with integer arithmetic only, whether
//! a raw detector event looks like background and should be dropped before
//! it reaches the downlink.
//!
//! # Core Types
//!
//! - **OnboardFilter**: The pipeline, with its configuration and collaborators
//! - **StatusWord**: The per-event audit trail of every decision taken
//! - **ResultRecord**: Energy, stage timings, sizes and diagnostics of one event
//! - **FilterConfig**: Thresholds, veto mask, toggles and static tables
//!
//! # Pipeline
//!
//! Stages run cheapest first and the first enabled veto ends the event:
//!
//! 1. **Trigger** - calorimeter discriminators and tracker throttle from the GEM summary
//! 2. **ACD** - struck-tile classification and the splash veto
//! 3. **CAL0** - total calorimeter energy against the struck tiles
//! 4. **Directory** - one pass over the contributors, ACD record unpacked
//! 5. **ATF** - struck tiles shadowing towers with a tracker coincidence
//! 6. **CAL1** - calorimeter shape checks
//! 7. **TKR** - tower nomination and projection matching
//!
//! Vetoes are never errors. A vetoed event is an `Ok` result with the
//! `VETOED` bit set and every bit that led there. `Err` is reserved for
//! buffers that cannot be decoded.
//!
//! # Observers
//!
//! The filter keeps no counters. Subscribe a [`FilterObserver`] to watch
//! stage completions, vetoes and ACD parity anomalies; wrap a
//! [`FilterStatistics`] in a `Mutex` to accumulate run statistics.
//!
//! # Example
//!
//! ```rust
//! use onboard_filter::{
//!     layer_mask, EventBuilder, FilterConfig, FilterEvent, FnObserver, LogWord,
//!     OnboardFilter, StatusWord, TowerData,
//! };
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! // 1. Build the filter from a validated configuration
//! let mut filter = OnboardFilter::new(FilterConfig::default()).unwrap();
//!
//! // 2. Count accepted events
//! let accepted = Arc::new(AtomicUsize::new(0));
//! let counter = accepted.clone();
//! filter.subscribe(Arc::new(FnObserver(move |event: &FilterEvent| {
//!     if matches!(event, FilterEvent::Accepted { .. }) {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }
//! })));
//!
//! // 3. An event with a clean three-layer track and a little energy
//! let layers = layer_mask([15, 16, 17]);
//! let mut tower = TowerData { x: layers, y: layers, ..TowerData::default() };
//! tower.layer_logs[0].push(LogWord::new(3, 0, 1224, 0, 1224).0);
//! let event = EventBuilder::new().sequence(1).tower(5, tower).build();
//!
//! let (status, result) = filter.filter(&event).unwrap();
//! assert!(!status.contains(StatusWord::VETOED));
//! assert!(status.contains(StatusWord::TKR_TRIGGER));
//! assert_eq!(result.energy, 225);
//! assert_eq!(accepted.load(Ordering::Relaxed), 1);
//! ```

mod acd;
mod bits;
mod builder;
mod cal;
mod clock;
mod config;
mod directory;
mod error;
mod filter;
mod gem;
mod observer;
mod projector;
mod results;
mod shadow;
mod splash;
mod stats;
mod status;
mod trigger;

pub use acd::{
    remap, AcdMasks, AcdParity, AcdRecord, BoardRemap, BOARD_COUNT, BOARD_NAMES,
    CHANNELS_PER_BOARD, LIST_RU, LIST_XY, LIST_XZ, LIST_YZ, MAX_PHAS_PER_BOARD, MAX_UNMATCHED,
    PHA_SLOTS, REMAP, SIDE_FILTER_TILES, UPPER_ROWS,
};
pub use bits::{bit, clear_bit, highest_set_bit, BitIter};
pub use builder::{encode_acd, AcdBoardData, EventBuilder, TowerData};
pub use cal::{
    directory_energy, event_energy, event_threshold_sum, log_ends, mev_to_gain, mev_to_leu,
    ratio_check, threshold_sum, tower_energy, xtal_ratio_check, CalConstants, LogConstants,
    LogWord, RangeConstants, LAYERS_PER_TOWER, LEU_PER_MEV, LOGS_PER_LAYER, LOG_COUNT,
};
pub use clock::{Clock, MonotonicClock, StepClock};
pub use config::{FilterConfig, FilterTables, RatioLimits, Thresholds, Toggles};
pub use directory::{
    find_contributor, Contributor, ContributorIter, Directory, TowerView, CID_ACD, CID_GEM,
    TOWER_COUNT,
};
pub use error::{ConfigError, DecodeError};
pub use filter::{filter, nominate_towers, OnboardFilter};
pub use gem::GemRecord;
pub use observer::{ChannelObserver, FilterEvent, FilterObserver, FnObserver, Stage};
pub use projector::{AcdMatch, NullProjector, Projections, Projector, TowerTracker};
pub use results::{EventSizes, ResultRecord, StageTimes, TemSize, TrackSummary};
pub use shadow::{
    bottom_planes, evaluate_atf, evaluate_zbottom, filter_sides, filter_top, side_mask,
    Candidates, ShadowTable,
};
pub use splash::SplashMap;
pub use stats::{energy_bin, Category, EnergyHistogram, FilterStatistics, Tally, ENERGY_BINS};
pub use status::StatusWord;
pub use trigger::{
    accept_layers, encode_accepts, layer_bit, layer_mask, trigger_form, TriggerClass,
    TriggerSummary,
};
