//! The filter pipeline
//!
//! Runs the stages in fixed order, cheapest first, and stops at the first
//! stage whose status carries an enabled veto bit. Whatever the outcome,
//! the result record is then completed so every event carries its number,
//! sizes and energy.

use crate::acd::{AcdMasks, AcdRecord};
use crate::bits::BitIter;
use crate::cal::{event_energy, log_ends, ratio_check, xtal_ratio_check};
use crate::clock::{Clock, MonotonicClock};
use crate::config::FilterConfig;
use crate::directory::{find_contributor, Directory, CID_GEM};
use crate::error::{ConfigError, DecodeError};
use crate::gem::GemRecord;
use crate::observer::{FilterEvent, FilterObserver, Stage};
use crate::projector::{AcdMatch, NullProjector, Projector, TowerTracker};
use crate::results::{ResultRecord, TrackSummary};
use crate::shadow::{evaluate_atf, evaluate_zbottom};
use crate::status::StatusWord;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Towers worth running pattern recognition on.
///
/// Towers with a three-layer coincidence land in the high half
/// (`0x8000_0000 >> tower`), towers with only a two-layer coincidence in
/// the low half (`0x8000 >> tower`). A tower appears in one half at most.
pub fn nominate_towers(dir: &Directory<'_>) -> u32 {
    let mut tcids = 0u32;
    for view in dir.towers_in(dir.tkr_towers()) {
        let (x, y) = view.layer_masks();
        let xy00 = x & y;
        if xy00 == 0 {
            continue;
        }
        // odd layers sit 9 above their even neighbours
        let xy11 = xy00 >> 9;
        let xy22 = xy00 << 1;
        let xy33 = xy00 >> 10;
        let tower = view.tower();
        if (xy00 & xy11 & xy22) != 0 || (xy33 & xy00 & xy11) != 0 {
            tcids |= 0x8000_0000 >> tower;
        } else if ((xy00 | xy22) & xy11) != 0 {
            tcids |= 0x8000 >> tower;
        }
    }
    tcids
}

/// Calorimeter energy against the struck tiles.
fn evaluate_cal0(
    status: StatusWord,
    energy: i32,
    masks: &AcdMasks,
    config: &FilterConfig,
) -> StatusWord {
    let t = &config.thresholds;
    if status.intersects(StatusWord::ACD_TOP | StatusWord::ACD_SIDE) {
        if energy < t.e0_tile {
            return StatusWord::E0_TILE;
        }
        if status.intersects(StatusWord::ACD_TOP | StatusWord::ACD_SIDE_FILTER)
            && energy < t.e350_filter_tile
        {
            return StatusWord::E350_FILTER_TILE;
        }
    }

    if config.toggles.splash1 && energy < t.splash1_max {
        let splash = masks.tile_count() >= config.splash_tile_limit
            || config.tables.splash.is_splash(masks);
        if splash {
            return StatusWord::SPLASH_1;
        }
    }
    StatusWord::empty()
}

/// Shared state of one filter invocation.
struct Pipeline<'c> {
    config: &'c FilterConfig,
    projector: &'c dyn Projector,
    clock: &'c dyn Clock,
    observers: &'c [Arc<dyn FilterObserver>],
}

/// How far an event got.
struct Outcome<'a> {
    vetoed_at: Option<Stage>,
    dir: Option<Directory<'a>>,
}

impl<'c> Pipeline<'c> {
    fn emit(&self, event: FilterEvent) {
        for observer in self.observers {
            observer.on_event(&event);
        }
    }

    fn passed(&self, stage: Stage, status: StatusWord) {
        trace!(%stage, %status, "stage complete");
        if !self.observers.is_empty() {
            self.emit(FilterEvent::StageComplete { stage, status });
        }
    }

    fn run(&self, raw: &[u32]) -> Result<(StatusWord, ResultRecord), DecodeError> {
        let mut result = ResultRecord::new();
        let outcome = self.evaluate(raw, &mut result)?;
        self.complete(raw, outcome.dir, &mut result)?;

        match outcome.vetoed_at {
            Some(stage) => {
                debug!(
                    evt_num = result.evt_num,
                    %stage,
                    status = %result.status,
                    energy = result.energy,
                    "event vetoed"
                );
                self.emit(FilterEvent::Vetoed {
                    evt_num: result.evt_num,
                    stage,
                    status: result.status,
                    energy: result.energy,
                });
            }
            None => self.emit(FilterEvent::Accepted {
                evt_num: result.evt_num,
                status: result.status,
                energy: result.energy,
            }),
        }
        Ok((result.status, result))
    }

    fn evaluate<'a>(
        &self,
        raw: &'a [u32],
        result: &mut ResultRecord,
    ) -> Result<Outcome<'a>, DecodeError> {
        let config = self.config;
        let vetoes = config.vetoes;
        let t = &config.thresholds;
        let toggles = &config.toggles;
        let clock = self.clock;
        let mut status = StatusWord::empty();

        macro_rules! veto {
            ($stage:expr, $time:ident, $dir:expr) => {{
                result.status = status | StatusWord::VETOED;
                result.times.$time = clock.now();
                return Ok(Outcome {
                    vetoed_at: Some($stage),
                    dir: $dir,
                });
            }};
        }

        // ---------------------------------------------------------------
        // Trigger summary
        // ---------------------------------------------------------------
        result.times.beg = clock.now();
        let gem = find_contributor(raw, CID_GEM)?.ok_or(DecodeError::MissingGem)?;
        let gem = GemRecord::parse(gem.payload)?;
        if gem.cal_lo() != 0 {
            status |= StatusWord::CAL_LO;
        }
        if gem.cal_hi() != 0 {
            status |= StatusWord::CAL_HI;
        }
        if gem.tkr_throttle() != 0 {
            status |= StatusWord::TKR_THROTTLE;
        }
        if toggles.cal_hi_pass && status.contains(StatusWord::CAL_HI) {
            result.status = StatusWord::CAL_HI;
            result.times.acd = clock.now();
            return Ok(Outcome {
                vetoed_at: None,
                dir: None,
            });
        }
        self.passed(Stage::Trigger, status);

        // ---------------------------------------------------------------
        // ACD classification and splash
        // ---------------------------------------------------------------
        let masks = gem.acd_masks();
        if masks.top != 0 {
            status |= StatusWord::ACD_TOP;
        }
        if masks.any_side() {
            status |= StatusWord::ACD_SIDE;
            if masks.any_side_filter() {
                status |= StatusWord::ACD_SIDE_FILTER;
            }
        }

        if !status.contains(StatusWord::CAL_LO)
            && status.intersects(StatusWord::ACD_TOP | StatusWord::ACD_SIDE_FILTER)
        {
            status |= StatusWord::NOCALLO_FILTER_TILE;
            if status.is_vetoed_by(vetoes) {
                veto!(Stage::Acd, cal0, None);
            }
        }

        if !status.contains(StatusWord::CAL_HI) {
            let splash = masks.tile_count() >= config.splash_tile_limit
                || config.tables.splash.is_splash(&masks);
            if splash {
                status |= StatusWord::SPLASH_0;
            }
            if status.is_vetoed_by(vetoes) {
                veto!(Stage::Acd, cal0, None);
            }
        }
        self.passed(Stage::Acd, status);

        // ---------------------------------------------------------------
        // Calorimeter phase 0
        // ---------------------------------------------------------------
        result.times.cal0 = clock.now();
        let (energy, layers) = event_energy(raw, &config.tables.cal)?;
        result.energy = energy;
        result.layer_energy = layers;
        status |= evaluate_cal0(status, energy, &masks, config) | StatusWord::ACD;
        if status.is_vetoed_by(vetoes) {
            veto!(Stage::Cal0, acd, None);
        }
        result.times.acd = clock.now();
        self.passed(Stage::Cal0, status);

        // ---------------------------------------------------------------
        // Directory
        // ---------------------------------------------------------------
        let dir = Directory::compose(raw)?;
        status |= StatusWord::DIR;
        result.times.dir = clock.now();

        if toggles.unpack_acd {
            if let Some(acd) = dir.acd() {
                let record = AcdRecord::unpack(acd.payload)?;
                let parity = record.parity();
                if parity.missing_start() != 0 {
                    status |= StatusWord::ACD_START_PARITY;
                }
                if parity.header_errors() != 0 {
                    status |= StatusWord::ACD_HEADER_PARITY;
                }
                if parity.pha_errors() != 0 {
                    status |= StatusWord::ACD_PHA_PARITY;
                }
                if parity.unmatched_boards() != 0 {
                    status |= StatusWord::ACD_UNMATCHED_PHA;
                }
                result.acd = parity;
                result.unmatched_phas = record.uphas;
                if !parity.is_clean() {
                    self.emit(FilterEvent::AcdParity {
                        evt_num: dir.sequence(),
                        parity,
                    });
                }
            }
        }
        self.passed(Stage::Directory, status);

        // ---------------------------------------------------------------
        // Shadow match and bottom-tracker support
        // ---------------------------------------------------------------
        status |= evaluate_atf(&config.tables.shadow, &dir, &masks, energy, t.atf_max);
        if !status.is_vetoed_by(vetoes) {
            status |= evaluate_zbottom(&dir, energy, t.zbottom_min, t.zbottom_floor);
        }
        if status.is_vetoed_by(vetoes) {
            veto!(Stage::Atf, atf, Some(dir));
        }
        result.times.atf = clock.now();
        self.passed(Stage::Atf, status);

        // ---------------------------------------------------------------
        // Calorimeter phase 1
        // ---------------------------------------------------------------
        if energy > 0 {
            let ratio = &config.ratio;
            if energy < t.cal1_ratio_max {
                if toggles.ratio_check {
                    status |= ratio_check(
                        layers[0],
                        energy,
                        ratio.lo,
                        StatusWord::EL0_ETOT_01,
                        ratio.hi,
                        StatusWord::EL0_ETOT_90,
                    );
                }
            } else if toggles.xtal_ratio {
                status |= xtal_ratio_check(
                    energy,
                    log_ends(&dir, &config.tables.cal),
                    ratio.xtal_energy,
                    ratio.xtal_count,
                    StatusWord::EL0_ETOT_90,
                );
            }
            if status.is_vetoed_by(vetoes) {
                status |= StatusWord::CAL1;
                veto!(Stage::Cal1, cal1, Some(dir));
            }
            result.times.cal1 = clock.now();
            status |= StatusWord::CAL1;
            self.passed(Stage::Cal1, status);
        }

        // ---------------------------------------------------------------
        // Tracker
        // ---------------------------------------------------------------
        let tcids = nominate_towers(&dir);
        if tcids == 0 {
            if energy > t.tkr_eq0_min {
                status |= StatusWord::TKR | StatusWord::TKR_EQ_0;
            }
        } else {
            status |= classify_nominated(tcids);
            let (tkr, summary) = self.track(&dir, tcids, energy, &masks);
            status |= tkr | StatusWord::TKR;
            result.tkr = summary;
        }
        result.times.tkr = clock.now();

        if status.is_vetoed_by(vetoes) {
            veto!(Stage::Tkr, tkr, Some(dir));
        }
        result.status = status;
        self.passed(Stage::Tkr, status);
        Ok(Outcome {
            vetoed_at: None,
            dir: Some(dir),
        })
    }

    /// Pattern recognition over the nominated towers, lowest tower first.
    fn track(
        &self,
        dir: &Directory<'_>,
        tcids: u32,
        energy: i32,
        masks: &AcdMasks,
    ) -> (StatusWord, TrackSummary) {
        let t = &self.config.thresholds;
        let mut summary = TrackSummary {
            nominated: tcids,
            ..TrackSummary::default()
        };

        let towers = (tcids | (tcids << 16)) & 0xffff_0000;
        for tower in BitIter::new(towers) {
            let Some(view) = dir.tower(tower) else {
                continue;
            };
            let tracker = TowerTracker::from_view(view);
            let projections = self.projector.project(&tracker);
            if projections.total() == 0 {
                continue;
            }
            summary.projections += projections.total();
            summary.projected |= 0x8000 >> tower;

            let matched = self.projector.acd_match(&tracker, &projections, masks);
            let status = match matched {
                AcdMatch::None => None,
                AcdMatch::Top if energy < t.tkr_top_max => Some(StatusWord::TKR_TOP),
                AcdMatch::Side { row01: true } if energy < t.tkr_row01_max => {
                    Some(StatusWord::TKR_ROW01)
                }
                AcdMatch::Side { row01: false } if energy < t.tkr_row2_max => {
                    Some(StatusWord::TKR_ROW2)
                }
                _ => Some(StatusWord::empty()),
            };
            // the first tile match decides the event
            if let Some(status) = status {
                return (status, summary);
            }

            if (t.skirt_min..=t.skirt_max).contains(&energy)
                && self.projector.skirt_match(&tracker, &projections)
            {
                return (StatusWord::TKR_SKIRT, summary);
            }
        }

        let status = match summary.projections {
            0 | 1 if energy > t.tkr_eq0_min => StatusWord::TKR_EQ_0,
            0 | 1 => StatusWord::empty(),
            2 => {
                let lone = self.config.toggles.lt2_elo && energy < t.lt2_elo_max;
                if lone {
                    StatusWord::TKR_EQ_1 | StatusWord::TKR_LT_2_ELO
                } else {
                    StatusWord::TKR_EQ_1
                }
            }
            _ => StatusWord::TKR_GE_2,
        };
        (status, summary)
    }

    /// Fill in what the short-circuited stages skipped.
    fn complete<'a>(
        &self,
        raw: &'a [u32],
        dir: Option<Directory<'a>>,
        result: &mut ResultRecord,
    ) -> Result<(), DecodeError> {
        let dir = match dir {
            Some(dir) => dir,
            None => Directory::compose(raw)?,
        };
        result.evt_num = dir.sequence();
        if result.energy == -1 {
            let (energy, layers) = event_energy(raw, &self.config.tables.cal)?;
            result.energy = energy;
            result.layer_energy = layers;
        }
        result.sizes = dir.sizes();
        if !result.status.contains(StatusWord::TKR) {
            result.status |= classify_nominated(nominate_towers(&dir));
        }
        Ok(())
    }
}

/// `TKR_TRIGGER` for any three-layer tower, else `TKR_POSSIBLE` for any
/// two-layer tower.
fn classify_nominated(tcids: u32) -> StatusWord {
    if tcids & 0xffff_0000 != 0 {
        StatusWord::TKR_TRIGGER
    } else if tcids & 0xffff != 0 {
        StatusWord::TKR_POSSIBLE
    } else {
        StatusWord::empty()
    }
}

// =========================================================================
// FILTER
// =========================================================================

/// Onboard event filter.
///
/// Holds the validated configuration, the projection collaborator, the
/// clock and any subscribed observers. Filtering takes `&self`; events are
/// independent of one another.
pub struct OnboardFilter {
    config: FilterConfig,
    projector: Box<dyn Projector>,
    clock: Box<dyn Clock>,
    observers: Vec<Arc<dyn FilterObserver>>,
}

impl OnboardFilter {
    /// Create a filter, failing fast on an invalid configuration.
    pub fn new(config: FilterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            projector: Box::new(NullProjector),
            clock: Box::new(MonotonicClock::new()),
            observers: Vec::new(),
        })
    }

    pub fn with_projector(mut self, projector: impl Projector + 'static) -> Self {
        self.projector = Box::new(projector);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Subscribe an observer to filter events.
    pub fn subscribe(&mut self, observer: Arc<dyn FilterObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter one event.
    ///
    /// A vetoed event is an `Ok` result with `VETOED` set. An `Err` means
    /// the buffer could not be decoded and nothing about the event should
    /// be trusted.
    pub fn filter(&self, raw: &[u32]) -> Result<(StatusWord, ResultRecord), DecodeError> {
        let pipeline = Pipeline {
            config: &self.config,
            projector: self.projector.as_ref(),
            clock: self.clock.as_ref(),
            observers: &self.observers,
        };
        pipeline.run(raw).map_err(|error| {
            warn!(%error, "event decode failed");
            pipeline.emit(FilterEvent::DecodeFailed {
                error: error.clone(),
            });
            error
        })
    }
}

/// Filter one event with no projection collaborator.
///
/// The configuration is used as given; call [`FilterConfig::validate`]
/// once beforehand.
pub fn filter(raw: &[u32], config: &FilterConfig) -> Result<(StatusWord, ResultRecord), DecodeError> {
    let clock = MonotonicClock::new();
    let pipeline = Pipeline {
        config,
        projector: &NullProjector,
        clock: &clock,
        observers: &[],
    };
    pipeline.run(raw).map_err(|error| {
        warn!(%error, "event decode failed");
        error
    })
}
