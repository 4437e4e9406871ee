//! End-to-end tests for the filter pipeline
//!
//! Tests cover:
//! - Quiet events and the splash shortcut
//! - Each veto stage, in order
//! - Tracker stage outcomes with a deterministic projector
//! - ACD record diagnostics and the pulse height cap
//! - Decode failures, observers, statistics and timing

use onboard_filter::{
    filter, layer_mask, AcdBoardData, AcdMasks, AcdMatch, ChannelObserver, ConfigError,
    DecodeError, EventBuilder, FilterConfig, FilterEvent, FilterStatistics, GemRecord, LogWord,
    OnboardFilter, Projections, Projector, SplashMap, Stage, StatusWord, StepClock, Thresholds,
    TowerData, TowerTracker, BOARD_COUNT,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// A log worth exactly 1640 LEU at nominal calibration.
fn log_1640(column: u32) -> u32 {
    LogWord::new(column, 1, 1124, 1, 1124).0
}

/// A log worth 225 LEU at nominal calibration.
fn log_225(column: u32) -> u32 {
    LogWord::new(column, 0, 1224, 0, 1224).0
}

fn tracker(x: &[u32], y: &[u32]) -> TowerData {
    TowerData {
        x: layer_mask(x.iter().copied()),
        y: layer_mask(y.iter().copied()),
        ..TowerData::default()
    }
}

/// A three-layer track at the bottom of the stack.
fn track_tower() -> TowerData {
    tracker(&[0, 1, 2], &[0, 1, 2])
}

fn with_log(mut tower: TowerData, log: u32) -> TowerData {
    tower.layer_logs[0].push(log);
    tower
}

fn gem(cal_hi_lo: u32, masks: AcdMasks) -> GemRecord {
    GemRecord {
        cal_hi_lo,
        veto_xy: masks.top,
        veto_yz: masks.x,
        veto_xz: masks.y,
        ..GemRecord::default()
    }
}

fn run(event: &[u32]) -> (StatusWord, onboard_filter::ResultRecord) {
    filter(event, &FilterConfig::default()).unwrap()
}

/// Projector returning fixed answers for every tower.
struct FixedProjector {
    projections: Projections,
    matched: AcdMatch,
    skirt: bool,
}

impl FixedProjector {
    fn counts(x: u16, y: u16) -> Self {
        Self {
            projections: Projections { x, y },
            matched: AcdMatch::None,
            skirt: false,
        }
    }
}

impl Projector for FixedProjector {
    fn project(&self, _tracker: &TowerTracker<'_>) -> Projections {
        self.projections
    }

    fn acd_match(&self, _: &TowerTracker<'_>, _: &Projections, _: &AcdMasks) -> AcdMatch {
        self.matched
    }

    fn skirt_match(&self, _: &TowerTracker<'_>, _: &Projections) -> bool {
        self.skirt
    }
}

fn filter_with(projector: FixedProjector) -> OnboardFilter {
    OnboardFilter::new(FilterConfig::default())
        .unwrap()
        .with_projector(projector)
}

#[cfg(test)]
mod scenarios {
    use super::*;

    #[test]
    fn test_quiet_event_passes() {
        let event = EventBuilder::new().sequence(11).build();
        let (status, result) = run(&event);

        assert_eq!(status, StatusWord::ACD | StatusWord::DIR | StatusWord::ATF);
        assert_eq!(result.status, status);
        assert_eq!(result.energy, 0);
        assert_eq!(result.evt_num, 11);
        assert_eq!(result.sizes.evt as usize, event.len() * 4);
        assert_eq!(result.sizes.gem, 64);
    }

    #[test]
    fn test_four_spread_tiles_splash() {
        // the four corners of the top face: no two adjacent
        let masks = AcdMasks::new(1 | (1 << 4) | (1 << 20) | (1 << 24), 0, 0);
        let event = EventBuilder::new().gem(gem(1, masks)).build();

        let expected =
            StatusWord::CAL_LO | StatusWord::ACD_TOP | StatusWord::SPLASH_0 | StatusWord::VETOED;
        assert_eq!(run(&event).0, expected);

        // the tile count decides before the adjacency map is consulted
        let config = FilterConfig::default().with_splash_map(SplashMap::from_relation(|_, _| false));
        assert_eq!(filter(&event, &config).unwrap().0, expected);
    }

    #[test]
    fn test_adjacent_layers_form_coincidence() {
        let event = EventBuilder::new()
            .tower(2, tracker(&[14, 15], &[14, 15]))
            .build();
        let (status, _) = run(&event);
        assert!(status.contains(StatusWord::TKR_POSSIBLE));
        assert!(!status.contains(StatusWord::VETOED));

        // alternate layers never pair up
        let event = EventBuilder::new()
            .tower(2, TowerData {
                x: 0x3c000,
                y: 0x3c000,
                ..TowerData::default()
            })
            .build();
        let (status, _) = run(&event);
        assert!(!status.intersects(StatusWord::TKR_POSSIBLE | StatusWord::TKR_TRIGGER));
    }

    #[test]
    fn test_pha_cap() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[0].phas = (0..18).collect();
        let event = EventBuilder::new().acd(&boards).build();
        let (status, result) = run(&event);
        assert!(status.contains(StatusWord::ACD_UNMATCHED_PHA));
        assert_eq!(result.unmatched_phas.len(), 18);

        boards[0].phas.push(18);
        let event = EventBuilder::new().acd(&boards).build();
        assert_eq!(
            filter(&event, &FilterConfig::default()).unwrap_err(),
            DecodeError::PhaOverflow { board: 0, max: 18 }
        );
    }
}

#[cfg(test)]
mod veto_stages {
    use super::*;

    #[test]
    fn test_filter_tile_without_cal_lo() {
        let event = EventBuilder::new()
            .gem(gem(0, AcdMasks::new(1, 0, 0)))
            .tower(4, with_log(TowerData::default(), log_225(0)))
            .build();
        let (status, result) = run(&event);
        assert_eq!(
            status,
            StatusWord::ACD_TOP | StatusWord::NOCALLO_FILTER_TILE | StatusWord::VETOED
        );
        // energy is filled in after the veto
        assert_eq!(result.energy, 225);
        assert_eq!(result.layer_energy[0], 225);
    }

    #[test]
    fn test_zero_energy_with_tile() {
        let event = EventBuilder::new().gem(gem(1, AcdMasks::new(1, 0, 0))).build();
        let (status, _) = run(&event);
        assert_eq!(
            status,
            StatusWord::CAL_LO
                | StatusWord::ACD_TOP
                | StatusWord::E0_TILE
                | StatusWord::ACD
                | StatusWord::VETOED
        );
    }

    #[test]
    fn test_low_energy_filter_tile() {
        let event = EventBuilder::new()
            .gem(gem(1, AcdMasks::new(1, 0, 0)))
            .tower(4, with_log(TowerData::default(), log_225(0)))
            .build();
        let (status, _) = run(&event);
        assert!(status.contains(StatusWord::E350_FILTER_TILE | StatusWord::VETOED));
    }

    #[test]
    fn test_lower_side_row_passes() {
        let event = EventBuilder::new()
            .gem(gem(1, AcdMasks::new(0, 1 << 12, 0)))
            .tower(4, with_log(TowerData::default(), log_225(0)))
            .build();
        let (status, _) = run(&event);
        assert!(status.contains(StatusWord::ACD_SIDE | StatusWord::CAL1));
        assert!(!status.contains(StatusWord::ACD_SIDE_FILTER));
        assert!(!status.contains(StatusWord::VETOED));
    }

    #[test]
    fn test_shadowed_tower_top_veto() {
        let tower = with_log(tracker(&[15, 16, 17], &[15, 16, 17]), log_1640(0));
        let event = EventBuilder::new()
            .gem(gem(1, AcdMasks::new(1, 0, 0)))
            .tower(0, tower)
            .build();
        let (status, _) = run(&event);
        assert_eq!(
            status,
            StatusWord::CAL_LO
                | StatusWord::ACD_TOP
                | StatusWord::ACD
                | StatusWord::DIR
                | StatusWord::ATF
                | StatusWord::TKR_TRIGGER
                | StatusWord::TOP
                | StatusWord::VETOED
        );
    }

    #[test]
    fn test_energy_without_tracker_support() {
        let event = EventBuilder::new()
            .tower(3, with_log(TowerData::default(), log_1640(0)))
            .build();
        let (status, _) = run(&event);
        assert_eq!(
            status,
            StatusWord::ACD
                | StatusWord::DIR
                | StatusWord::ATF
                | StatusWord::ZBOTTOM
                | StatusWord::VETOED
        );
    }

    #[test]
    fn test_no_track_candidate() {
        // four bottom planes hit but no two views agree on adjacent layers
        let tower = with_log(tracker(&[0, 1], &[0, 2]), log_1640(0));
        let event = EventBuilder::new().tower(3, tower).build();
        let (status, _) = run(&event);
        assert_eq!(
            status,
            StatusWord::ACD
                | StatusWord::DIR
                | StatusWord::ATF
                | StatusWord::CAL1
                | StatusWord::TKR
                | StatusWord::TKR_EQ_0
                | StatusWord::VETOED
        );
    }

    #[test]
    fn test_disabled_vetoes_only_flag() {
        let event = EventBuilder::new().gem(gem(0, AcdMasks::new(1, 0, 0))).build();
        let config = FilterConfig::default().with_vetoes(StatusWord::SPLASH_0);
        let (status, _) = filter(&event, &config).unwrap();
        assert!(status.contains(StatusWord::NOCALLO_FILTER_TILE | StatusWord::E0_TILE));
        assert!(!status.contains(StatusWord::VETOED));
    }

    #[test]
    fn test_cal_hi_pass_through() {
        let event = EventBuilder::new()
            .gem(gem(0x0001_0000, AcdMasks::new(0xff, 0, 0)))
            .build();
        let mut config = FilterConfig::default();
        config.toggles.cal_hi_pass = true;
        let (status, _) = filter(&event, &config).unwrap();
        assert_eq!(status, StatusWord::CAL_HI);
    }
}

#[cfg(test)]
mod tracker_stage {
    use super::*;

    fn tracked_event() -> Vec<u32> {
        EventBuilder::new()
            .sequence(5)
            .tower(3, with_log(track_tower(), log_1640(0)))
            .build()
    }

    #[test]
    fn test_no_projections_vetoes() {
        let (status, result) = run(&tracked_event());
        assert!(status.contains(StatusWord::TKR_EQ_0 | StatusWord::VETOED));
        assert!(status.contains(StatusWord::TKR_TRIGGER));
        assert_eq!(result.tkr.nominated, 0x8000_0000 >> 3);
        assert_eq!(result.tkr.projections, 0);
    }

    #[test]
    fn test_one_track_accepted() {
        let filter = filter_with(FixedProjector::counts(1, 1));
        let (status, result) = filter.filter(&tracked_event()).unwrap();
        assert_eq!(
            status,
            StatusWord::ACD
                | StatusWord::DIR
                | StatusWord::ATF
                | StatusWord::CAL1
                | StatusWord::TKR
                | StatusWord::TKR_TRIGGER
                | StatusWord::TKR_EQ_1
        );
        assert_eq!(result.tkr.projected, 0x8000 >> 3);
        assert_eq!(result.tkr.projections, 2);
        assert_eq!(result.evt_num, 5);
    }

    #[test]
    fn test_two_tracks() {
        let filter = filter_with(FixedProjector::counts(2, 1));
        let (status, _) = filter.filter(&tracked_event()).unwrap();
        assert!(status.contains(StatusWord::TKR_GE_2));
        assert!(!status.contains(StatusWord::VETOED));
    }

    #[test]
    fn test_lone_track_at_low_energy() {
        let tower = with_log(track_tower(), LogWord::new(0, 1, 700, 1, 700).0);
        let event = EventBuilder::new().tower(3, tower).build();
        let mut config = FilterConfig::default();
        config.toggles.lt2_elo = true;
        let filter = OnboardFilter::new(config)
            .unwrap()
            .with_projector(FixedProjector::counts(1, 1));
        let (status, result) = filter.filter(&event).unwrap();
        assert!(result.energy < Thresholds::default().lt2_elo_max);
        assert!(status.contains(StatusWord::TKR_LT_2_ELO | StatusWord::VETOED));
    }

    #[test]
    fn test_top_match() {
        let filter = filter_with(FixedProjector {
            matched: AcdMatch::Top,
            ..FixedProjector::counts(1, 1)
        });
        let (status, _) = filter.filter(&tracked_event()).unwrap();
        assert!(status.contains(StatusWord::TKR_TOP | StatusWord::VETOED));
        assert!(!status.contains(StatusWord::TKR_EQ_1));
    }

    #[test]
    fn test_match_above_energy_cut_stops_quietly() {
        let thresholds = Thresholds {
            tkr_row01_max: 1000,
            ..Thresholds::default()
        };
        let filter = OnboardFilter::new(FilterConfig::default().with_thresholds(thresholds))
            .unwrap()
            .with_projector(FixedProjector {
                matched: AcdMatch::Side { row01: true },
                ..FixedProjector::counts(1, 1)
            });
        let (status, _) = filter.filter(&tracked_event()).unwrap();
        assert!(status.contains(StatusWord::TKR));
        assert!(!status.intersects(StatusWord::TKR_ROW01 | StatusWord::TKR_EQ_1));
        assert!(!status.contains(StatusWord::VETOED));
    }

    #[test]
    fn test_skirt_match_at_zero_energy() {
        let event = EventBuilder::new().tower(3, track_tower()).build();
        let filter = filter_with(FixedProjector {
            skirt: true,
            ..FixedProjector::counts(1, 1)
        });
        let (status, _) = filter.filter(&event).unwrap();
        assert_eq!(
            status,
            StatusWord::ACD
                | StatusWord::DIR
                | StatusWord::ATF
                | StatusWord::TKR
                | StatusWord::TKR_TRIGGER
                | StatusWord::TKR_SKIRT
                | StatusWord::VETOED
        );
    }
}

#[cfg(test)]
mod acd_record {
    use super::*;

    #[test]
    fn test_parity_bits_reported() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[4].header_parity = true;
        boards[3].phas = vec![0x10, 0x20];
        let event = EventBuilder::new().acd(&boards).build();

        let (tx, rx) = mpsc::channel();
        let mut filter = OnboardFilter::new(FilterConfig::default()).unwrap();
        filter.subscribe(Arc::new(ChannelObserver::new(tx)));
        let (status, result) = filter.filter(&event).unwrap();

        assert!(status.contains(StatusWord::ACD_HEADER_PARITY | StatusWord::ACD_UNMATCHED_PHA));
        assert!(!status.contains(StatusWord::VETOED));
        assert_eq!(result.acd.header_errors(), 1 << 4);
        assert_eq!(result.unmatched_phas.as_slice(), &[0x2010, 0x20]);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, FilterEvent::AcdParity { .. })));
    }

    #[test]
    fn test_unpack_disabled() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[0].phas = (0..19).collect();
        let event = EventBuilder::new().acd(&boards).build();
        let mut config = FilterConfig::default();
        config.toggles.unpack_acd = false;
        let (status, result) = filter(&event, &config).unwrap();
        assert!(!status.intersects(StatusWord::ACD_PARITY));
        assert!(result.unmatched_phas.is_empty());
        assert!(result.sizes.acd > 0);
    }
}

#[cfg(test)]
mod decode_errors {
    use super::*;

    #[test]
    fn test_empty_and_mismatched() {
        let config = FilterConfig::default();
        assert_eq!(filter(&[], &config).unwrap_err(), DecodeError::Empty);

        let mut event = EventBuilder::new().build();
        event[0] += 4;
        assert!(matches!(
            filter(&event, &config),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_gem() {
        let mut event = EventBuilder::new().build();
        event[1] = (event[1] & !(0x1f << 17)) | (20 << 17);
        assert_eq!(
            filter(&event, &FilterConfig::default()).unwrap_err(),
            DecodeError::MissingGem
        );
    }

    #[test]
    fn test_short_tower_reported_to_observers() {
        let mut event = EventBuilder::new().tower(2, TowerData::default()).build();
        // claim fifteen logs in layer 0 of a tower that carries none
        event[19] = 0xf000_0000;

        let (tx, rx) = mpsc::channel();
        let mut filter = OnboardFilter::new(FilterConfig::default()).unwrap();
        filter.subscribe(Arc::new(ChannelObserver::new(tx)));
        let err = filter.filter(&event).unwrap_err();
        assert!(matches!(err, DecodeError::ShortTower { tower: 2, .. }));
        match rx.try_recv() {
            Ok(FilterEvent::DecodeFailed { error }) => assert_eq!(error, err),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unchecked_ratio_limits_do_not_panic() {
        let mut config = FilterConfig::default();
        config.toggles.ratio_check = true;
        config.toggles.xtal_ratio = true;
        config.ratio.lo = -5;
        config.ratio.hi = 4000;
        config.ratio.xtal_energy = 0;
        config.ratio.xtal_count = 5000;
        assert!(config.validate().is_err());

        for log in [log_225(0), log_1640(0)] {
            let event = EventBuilder::new()
                .tower(4, with_log(track_tower(), log))
                .build();
            assert!(filter(&event, &config).is_ok());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FilterConfig::default().with_splash_tile_limit(0);
        assert!(matches!(
            OnboardFilter::new(config),
            Err(ConfigError::ZeroTileLimit)
        ));
    }
}

#[cfg(test)]
mod observers {
    use super::*;
    use onboard_filter::Category;

    #[test]
    fn test_stage_sequence() {
        let (tx, rx) = mpsc::channel();
        let mut filter = filter_with(FixedProjector::counts(1, 1));
        filter.subscribe(Arc::new(ChannelObserver::new(tx)));
        let event = EventBuilder::new()
            .sequence(9)
            .tower(3, with_log(track_tower(), log_1640(0)))
            .build();
        filter.filter(&event).unwrap();

        let events: Vec<FilterEvent> = rx.try_iter().collect();
        let stages: Vec<Stage> = events
            .iter()
            .filter_map(|e| match e {
                FilterEvent::StageComplete { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::Trigger,
                Stage::Acd,
                Stage::Cal0,
                Stage::Directory,
                Stage::Atf,
                Stage::Cal1,
                Stage::Tkr
            ]
        );
        assert!(matches!(
            events.last(),
            Some(FilterEvent::Accepted { evt_num: 9, .. })
        ));
    }

    #[test]
    fn test_veto_reports_stage() {
        let (tx, rx) = mpsc::channel();
        let mut filter = OnboardFilter::new(FilterConfig::default()).unwrap();
        filter.subscribe(Arc::new(ChannelObserver::new(tx)));
        let event = EventBuilder::new()
            .tower(3, with_log(TowerData::default(), log_1640(0)))
            .build();
        filter.filter(&event).unwrap();

        let vetoed = rx.try_iter().find_map(|e| match e {
            FilterEvent::Vetoed { stage, energy, .. } => Some((stage, energy)),
            _ => None,
        });
        assert_eq!(vetoed, Some((Stage::Atf, 1640)));
    }

    #[test]
    fn test_statistics_observer() {
        let stats = Arc::new(Mutex::new(FilterStatistics::new()));
        let mut filter = OnboardFilter::new(FilterConfig::default()).unwrap();
        filter.subscribe(stats.clone());

        let quiet = EventBuilder::new().build();
        let splash = EventBuilder::new()
            .gem(gem(1, AcdMasks::new(0xf, 0, 0)))
            .build();
        let unsupported = EventBuilder::new()
            .tower(3, with_log(TowerData::default(), log_1640(0)))
            .build();
        for event in [&quiet, &splash, &unsupported] {
            filter.filter(event).unwrap();
        }

        let stats = stats.lock().unwrap();
        assert_eq!(stats.events(), 3);
        assert_eq!(stats.all.category(Category::AnyVeto).total(), 2);
        assert_eq!(stats.all.category(Category::NoTiles).total(), 2);
        assert_eq!(stats.all.bit(StatusWord::ZBOTTOM).unwrap().total(), 1);
        assert_eq!(stats.tracked.category(Category::All).total(), 0);
    }

    #[test]
    fn test_stage_times() {
        let filter = OnboardFilter::new(FilterConfig::default())
            .unwrap()
            .with_clock(StepClock::new(100, 10));
        let event = EventBuilder::new()
            .tower(3, with_log(TowerData::default(), log_1640(0)))
            .build();
        let (_, result) = filter.filter(&event).unwrap();
        let t = result.times;
        assert_eq!((t.beg, t.cal0, t.acd, t.dir, t.atf), (100, 110, 120, 130, 140));
        assert_eq!((t.cal1, t.tkr), (0, 0));
        assert_eq!(t.elapsed(), 40);
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_round_trip {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let mut config = FilterConfig::default().with_vetoes(StatusWord::SPLASH_0 | StatusWord::TOP);
        config.toggles.splash1 = true;
        let json = serde_json::to_string(&config).unwrap();
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_short_calibration_table_rejected() {
        let mut value = serde_json::to_value(FilterConfig::default()).unwrap();
        assert_eq!(value["tables"]["cal"].as_array().map(Vec::len), Some(1536));
        value["tables"]["cal"] = serde_json::json!([]);
        let err = serde_json::from_value::<FilterConfig>(value).unwrap_err();
        assert!(err.to_string().contains("has 0 channels"));
    }

    #[test]
    fn test_result_round_trip() {
        let mut boards: [AcdBoardData; BOARD_COUNT] = Default::default();
        boards[3].phas = vec![0x10, 0x20];
        let event = EventBuilder::new()
            .tower(3, with_log(TowerData::default(), log_225(1)))
            .acd(&boards)
            .build();
        let (_, result) = run(&event);
        let json = serde_json::to_string(&result).unwrap();
        let back: onboard_filter::ResultRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
