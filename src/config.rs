//! Filter configuration
//!
//! Every energy threshold is in LEU (see [`mev_to_leu`]). Cuts the flight
//! configuration marks as experimental are kept as toggles, off unless
//! stated otherwise.

use crate::cal::{mev_to_leu, CalConstants};
use crate::error::ConfigError;
use crate::shadow::ShadowTable;
use crate::splash::SplashMap;
use crate::status::StatusWord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Static lookup tables shared by every event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilterTables {
    /// Splash adjacency map.
    #[cfg_attr(feature = "serde", serde(skip, default))]
    pub splash: SplashMap,

    /// Tile to tower shadows.
    #[cfg_attr(feature = "serde", serde(skip, default))]
    pub shadow: ShadowTable,

    /// Calorimeter gains and pedestals.
    pub cal: CalConstants,
}

/// Energy thresholds, all in LEU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Thresholds {
    /// Any struck tile vetoes below this energy.
    pub e0_tile: i32,
    /// Struck filter tiles veto below this energy.
    pub e350_filter_tile: i32,
    /// The shadow match is skipped above this energy.
    pub atf_max: i32,
    /// The bottom-tracker check applies above this energy.
    pub zbottom_min: i32,
    /// And never below this one.
    pub zbottom_floor: i32,
    /// The layer 0 ratio check applies below this energy.
    pub cal1_ratio_max: i32,
    /// No tracker candidate vetoes above this energy.
    pub tkr_eq0_min: i32,
    /// Top tile matches veto below this energy.
    pub tkr_top_max: i32,
    /// Row 0 and 1 side tile matches veto below this energy.
    pub tkr_row01_max: i32,
    /// Row 2 side tile matches veto below this energy.
    pub tkr_row2_max: i32,
    /// The second splash pass applies below this energy.
    pub splash1_max: i32,
    /// A lone projection pair vetoes below this energy.
    pub lt2_elo_max: i32,
    /// Skirt matches are only tried for energies in `[skirt_min, skirt_max]`.
    pub skirt_min: i32,
    pub skirt_max: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            e0_tile: mev_to_leu(10),
            e350_filter_tile: mev_to_leu(350),
            atf_max: mev_to_leu(5000),
            zbottom_min: mev_to_leu(100),
            zbottom_floor: mev_to_leu(10),
            cal1_ratio_max: mev_to_leu(300),
            tkr_eq0_min: mev_to_leu(250),
            tkr_top_max: mev_to_leu(30_000),
            tkr_row01_max: mev_to_leu(10_000),
            tkr_row2_max: mev_to_leu(30_000),
            splash1_max: mev_to_leu(40_000),
            lt2_elo_max: mev_to_leu(350),
            skirt_min: 0,
            skirt_max: 0,
        }
    }
}

/// Experimental cuts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Toggles {
    /// Second splash pass after the calorimeter sum.
    pub splash1: bool,
    /// Layer 0 to total energy ratio check.
    pub ratio_check: bool,
    /// Per-crystal energy share check, used when the ratio check is off.
    pub xtal_ratio: bool,
    /// Pass CAL-HI events straight through.
    pub cal_hi_pass: bool,
    /// Veto a lone projection pair at low energy.
    pub lt2_elo: bool,
    /// Unpack the ACD record and report its parity diagnostics.
    pub unpack_acd: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            splash1: false,
            ratio_check: false,
            xtal_ratio: false,
            cal_hi_pass: false,
            lt2_elo: false,
            unpack_acd: true,
        }
    }
}

/// Limits of the calorimeter shape checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RatioLimits {
    /// Layer 0 share at or below this (in 1/1024) sets `EL0_ETOT_01`.
    pub lo: i32,
    /// Layer 0 share at or above this sets `EL0_ETOT_90`.
    pub hi: i32,
    /// A crystal counts when it holds more than `1 / xtal_energy` of the total.
    pub xtal_energy: i32,
    /// Share of crystals, in 1/1024, that must count.
    pub xtal_count: i32,
}

impl Default for RatioLimits {
    fn default() -> Self {
        Self {
            lo: 10,
            hi: 900,
            xtal_energy: 128,
            xtal_count: 200,
        }
    }
}

/// Complete filter configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilterConfig {
    /// Veto bits that reject an event; others are recorded only.
    pub vetoes: StatusWord,

    /// Tile count at which the splash check short-circuits.
    pub splash_tile_limit: u32,

    pub thresholds: Thresholds,
    pub toggles: Toggles,
    pub ratio: RatioLimits,
    pub tables: FilterTables,
}

impl FilterConfig {
    /// Standard configuration with the given calibration.
    pub fn new(cal: CalConstants) -> Self {
        Self {
            tables: FilterTables {
                cal,
                ..FilterTables::default()
            },
            ..Self::default()
        }
    }

    pub fn with_vetoes(mut self, vetoes: StatusWord) -> Self {
        self.vetoes = vetoes;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_splash_tile_limit(mut self, limit: u32) -> Self {
        self.splash_tile_limit = limit;
        self
    }

    pub fn with_ratio_limits(mut self, ratio: RatioLimits) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_splash_map(mut self, splash: SplashMap) -> Self {
        self.tables.splash = splash;
        self
    }

    pub fn with_shadow_table(mut self, shadow: ShadowTable) -> Self {
        self.tables.shadow = shadow;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !StatusWord::VETOES.contains(self.vetoes) {
            return Err(ConfigError::VetoMask {
                mask: self.vetoes.bits(),
            });
        }
        if self.splash_tile_limit == 0 {
            return Err(ConfigError::ZeroTileLimit);
        }

        let t = &self.thresholds;
        let ordered = [
            ("e0_tile", t.e0_tile, "e350_filter_tile", t.e350_filter_tile),
            ("zbottom_floor", t.zbottom_floor, "zbottom_min", t.zbottom_min),
            ("skirt_min", t.skirt_min, "skirt_max", t.skirt_max),
        ];
        for (lower, lower_value, upper, upper_value) in ordered {
            if lower_value > upper_value {
                return Err(ConfigError::ThresholdOrder {
                    lower,
                    lower_value,
                    upper,
                    upper_value,
                });
            }
        }

        let r = &self.ratio;
        for (name, value) in [("lo", r.lo), ("hi", r.hi), ("xtal_count", r.xtal_count)] {
            if !(0..=1024).contains(&value) {
                return Err(ConfigError::RatioLimit { name, value });
            }
        }
        if r.xtal_energy <= 0 {
            return Err(ConfigError::RatioLimit {
                name: "xtal_energy",
                value: r.xtal_energy,
            });
        }

        self.tables.cal.validate()
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            vetoes: StatusWord::VETOES,
            splash_tile_limit: 4,
            thresholds: Thresholds::default(),
            toggles: Toggles::default(),
            ratio: RatioLimits::default(),
            tables: FilterTables::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.e350_filter_tile, 1400);
        assert_eq!(config.thresholds.atf_max, 20_000);
        assert!(config.toggles.unpack_acd);
        assert!(!config.toggles.ratio_check);
    }

    #[test]
    fn test_veto_mask_rejected() {
        let config = FilterConfig::default().with_vetoes(StatusWord::VETOED);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::VetoMask { .. })
        ));
    }

    #[test]
    fn test_zero_tile_limit() {
        let config = FilterConfig::default().with_splash_tile_limit(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTileLimit));
    }

    #[test]
    fn test_threshold_order() {
        let thresholds = Thresholds {
            e0_tile: 2000,
            ..Thresholds::default()
        };
        let config = FilterConfig::default().with_thresholds(thresholds);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOrder {
                lower: "e0_tile",
                ..
            })
        ));
    }

    #[test]
    fn test_ratio_limits() {
        let ratio = RatioLimits {
            hi: 2000,
            ..RatioLimits::default()
        };
        let config = FilterConfig::default().with_ratio_limits(ratio);
        assert_eq!(
            config.validate(),
            Err(ConfigError::RatioLimit {
                name: "hi",
                value: 2000
            })
        );
    }

    #[test]
    fn test_subset_of_vetoes() {
        let config = FilterConfig::default().with_vetoes(StatusWord::SPLASH_0 | StatusWord::ZBOTTOM);
        assert!(config.validate().is_ok());
    }
}
