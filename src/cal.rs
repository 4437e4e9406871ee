//! Calorimeter energy reconstruction
//!
//! Energies are integers in LAT energy units (LEU), 4 per MeV. Each struck
//! log reports both ends, each through one of four ADC ranges; the
//! calibration table supplies a gain and pedestal per log, end and range.
//!
//! Three summation flavors share the per-log formula:
//!
//! - [`directory_energy`] over a composed directory, with per-layer sums
//! - [`threshold_sum`] and [`event_threshold_sum`] which stop as soon as
//!   the answer is known
//! - [`event_energy`] straight off the raw contributor stream, used before
//!   the directory exists

use crate::directory::{
    cal_log_count, check_event, Contributor, ContributorIter, Directory, TowerView, TOWER_COUNT,
};
use crate::error::{ConfigError, DecodeError};
use crate::status::StatusWord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// LAT energy units per MeV.
pub const LEU_PER_MEV: i32 = 4;

/// Fixed-point scale of a calibration gain.
pub const GAIN_PER_LEU: i32 = 1024;

pub const LAYERS_PER_TOWER: usize = 8;
pub const LOGS_PER_LAYER: usize = 12;
pub const LOGS_PER_TOWER: usize = LAYERS_PER_TOWER * LOGS_PER_LAYER;
pub const LOG_COUNT: usize = TOWER_COUNT * LOGS_PER_TOWER;

/// ADC ranges per log end.
pub const RANGES: usize = 4;

/// Full scale of each ADC range, in MeV.
pub const RANGE_LIMITS_MEV: [i32; RANGES] = [205, 1640, 13123, 104986];

/// Pedestal used by the nominal calibration.
pub const NOMINAL_PEDESTAL: i32 = 100;

/// Convert MeV to LEU.
pub const fn mev_to_leu(mev: i32) -> i32 {
    mev * LEU_PER_MEV
}

/// Gain that maps a full-scale 12-bit ADC reading to `mev`.
pub const fn mev_to_gain(mev: i32) -> i32 {
    mev * LEU_PER_MEV * GAIN_PER_LEU / (1 << 12)
}

// =========================================================================
// LOG WORD
// =========================================================================

/// One struck log: column, and range plus ADC value for each end.
///
/// Layout: column in bits 28..31, range A 26..27, value A 14..25,
/// range B 12..13, value B 0..11.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogWord(pub u32);

impl LogWord {
    pub fn new(column: u32, range_a: u32, value_a: u32, range_b: u32, value_b: u32) -> Self {
        Self(
            ((column & 0xf) << 28)
                | ((range_a & 3) << 26)
                | ((value_a & 0xfff) << 14)
                | ((range_b & 3) << 12)
                | (value_b & 0xfff),
        )
    }

    pub fn column(self) -> u32 {
        self.0 >> 28
    }

    pub fn range_a(self) -> usize {
        ((self.0 >> 26) & 3) as usize
    }

    pub fn value_a(self) -> i32 {
        ((self.0 >> 14) & 0xfff) as i32
    }

    pub fn range_b(self) -> usize {
        ((self.0 >> 12) & 3) as usize
    }

    pub fn value_b(self) -> i32 {
        (self.0 & 0xfff) as i32
    }
}

// =========================================================================
// CALIBRATION
// =========================================================================

/// Gain and pedestal of both ends for one ADC range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RangeConstants {
    pub gain_a: i32,
    pub pedestal_a: i32,
    pub gain_b: i32,
    pub pedestal_b: i32,
}

/// Calibration of one log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogConstants {
    pub ranges: [RangeConstants; RANGES],
}

impl LogConstants {
    /// Nominal constants: pedestal 100, each range spanning its full scale.
    pub fn nominal() -> Self {
        let mut ranges = [RangeConstants::default(); RANGES];
        for (r, limit) in ranges.iter_mut().zip(RANGE_LIMITS_MEV) {
            let gain = mev_to_gain(limit);
            *r = RangeConstants {
                gain_a: gain,
                pedestal_a: NOMINAL_PEDESTAL,
                gain_b: gain,
                pedestal_b: NOMINAL_PEDESTAL,
            };
        }
        Self { ranges }
    }

    /// Energy of one log, the mean of its two ends.
    #[inline]
    pub fn energy(&self, log: LogWord) -> i32 {
        let a = &self.ranges[log.range_a()];
        let b = &self.ranges[log.range_b()];
        let sum = i64::from(log.value_a() - a.pedestal_a) * i64::from(a.gain_a)
            + i64::from(log.value_b() - b.pedestal_b) * i64::from(b.gain_b);
        (sum / i64::from(GAIN_PER_LEU) / 2) as i32
    }

    /// Energies of each end, rounded separately.
    pub fn end_energies(&self, log: LogWord) -> (i32, i32) {
        let a = &self.ranges[log.range_a()];
        let b = &self.ranges[log.range_b()];
        (
            end_energy(log.value_a(), a.pedestal_a, a.gain_a),
            end_energy(log.value_b(), b.pedestal_b, b.gain_b),
        )
    }
}

#[inline]
fn end_energy(value: i32, pedestal: i32, gain: i32) -> i32 {
    let g = i64::from(GAIN_PER_LEU);
    ((i64::from(value - pedestal) * i64::from(gain) + g / 2) / g) as i32
}

/// Calibration constants for every log of the instrument.
///
/// Indexed by `tower * 96 + layer * 12 + column`.
///
/// A table always holds [`LOG_COUNT`] entries with nonzero gains. A
/// deserialized table goes through [`CalConstants::from_logs`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "Vec<LogConstants>", into = "Vec<LogConstants>")
)]
pub struct CalConstants {
    logs: Vec<LogConstants>,
}

impl CalConstants {
    /// Every log at nominal calibration.
    pub fn nominal() -> Self {
        Self {
            logs: vec![LogConstants::nominal(); LOG_COUNT],
        }
    }

    /// Build from a full table of log constants.
    pub fn from_logs(logs: Vec<LogConstants>) -> Result<Self, ConfigError> {
        let cal = Self { logs };
        cal.validate()?;
        Ok(cal)
    }

    /// Check table size and that every gain is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logs.len() != LOG_COUNT {
            return Err(ConfigError::CalibrationSize {
                expected: LOG_COUNT,
                got: self.logs.len(),
            });
        }
        for (channel, log) in self.logs.iter().enumerate() {
            for (range, r) in log.ranges.iter().enumerate() {
                if r.gain_a == 0 || r.gain_b == 0 {
                    return Err(ConfigError::ZeroGain { channel, range });
                }
            }
        }
        Ok(())
    }

    /// Constants of the logs of a tower layer, empty when out of range.
    #[inline]
    fn layer(&self, tower: usize, layer: usize) -> &[LogConstants] {
        let base = tower * LOGS_PER_TOWER + layer * LOGS_PER_LAYER;
        self.logs.get(base..base + LOGS_PER_LAYER).unwrap_or(&[])
    }

    pub fn log(&self, tower: usize, layer: usize, column: usize) -> Option<&LogConstants> {
        self.layer(tower, layer).get(column)
    }

    pub fn log_mut(
        &mut self,
        tower: usize,
        layer: usize,
        column: usize,
    ) -> Option<&mut LogConstants> {
        if column >= LOGS_PER_LAYER {
            return None;
        }
        self.logs
            .get_mut(tower * LOGS_PER_TOWER + layer * LOGS_PER_LAYER + column)
    }

    /// Energy of one log word read in the given tower and layer.
    #[inline]
    pub fn log_energy(&self, tower: usize, layer: usize, log: LogWord) -> i32 {
        // columns past 11 are rejected when the tower is parsed
        self.layer(tower, layer)
            .get(log.column() as usize)
            .map_or(0, |c| c.energy(log))
    }
}

impl Default for CalConstants {
    fn default() -> Self {
        Self::nominal()
    }
}

impl TryFrom<Vec<LogConstants>> for CalConstants {
    type Error = ConfigError;

    fn try_from(logs: Vec<LogConstants>) -> Result<Self, Self::Error> {
        Self::from_logs(logs)
    }
}

impl From<CalConstants> for Vec<LogConstants> {
    fn from(cal: CalConstants) -> Self {
        cal.logs
    }
}

// =========================================================================
// SUMMATION
// =========================================================================

/// Layer of each log word of a tower, in readout order.
fn layer_logs(
    counts: u32,
    logs: &[u32],
) -> impl Iterator<Item = (usize, LogWord)> + Clone + '_ {
    (0..LAYERS_PER_TOWER)
        .flat_map(move |layer| {
            let count = (counts >> (28 - 4 * layer as u32)) & 0xf;
            std::iter::repeat(layer).take(count as usize)
        })
        .zip(logs.iter().map(|&word| LogWord(word)))
}

/// Walk the struck logs of one tower, layer by layer.
fn for_each_log(
    tower: usize,
    counts: u32,
    logs: &[u32],
    mut f: impl FnMut(usize, usize, LogWord),
) {
    for (layer, log) in layer_logs(counts, logs) {
        f(tower, layer, log);
    }
}

/// Energy of one tower with per-layer sums added into `layers`.
pub fn tower_energy(view: &TowerView<'_>, cal: &CalConstants, layers: &mut [i32; 8]) -> i32 {
    let mut sum = 0;
    for_each_log(
        view.tower() as usize,
        view.cal_counts(),
        view.logs(),
        |tower, layer, log| {
            let e = cal.log_energy(tower, layer, log);
            layers[layer] += e;
            sum += e;
        },
    );
    sum
}

/// Total energy of all calorimeter towers with per-layer sums.
pub fn directory_energy(dir: &Directory<'_>, cal: &CalConstants) -> (i32, [i32; 8]) {
    let mut layers = [0i32; 8];
    let total = dir
        .towers_in(dir.cal_towers())
        .map(|view| tower_energy(view, cal, &mut layers))
        .sum();
    (total, layers)
}

/// Running sum started at `-threshold`, stopped as soon as it reaches zero.
///
/// The result is non-negative exactly when the total energy reaches
/// `threshold` LEU, so a large event is decided after a few logs.
pub fn threshold_sum(dir: &Directory<'_>, cal: &CalConstants, threshold: i32) -> i32 {
    let mut energy = -threshold;
    if energy >= 0 {
        return energy;
    }
    for view in dir.towers_in(dir.cal_towers()) {
        if let Some(e) = threshold_tower(view.tower(), view.cal_counts(), view.logs(), cal, &mut energy) {
            return e;
        }
    }
    energy
}

/// Threshold sum over the raw contributor stream.
pub fn event_threshold_sum(
    event: &[u32],
    cal: &CalConstants,
    threshold: i32,
) -> Result<i32, DecodeError> {
    check_event(event)?;
    let mut energy = -threshold;
    if energy >= 0 {
        return Ok(energy);
    }
    for contributor in ContributorIter::new(event) {
        let contributor = contributor?;
        if let Some((counts, logs)) = tower_logs(&contributor)? {
            if let Some(e) = threshold_tower(contributor.cid, counts, logs, cal, &mut energy) {
                return Ok(e);
            }
        }
    }
    Ok(energy)
}

fn threshold_tower(
    tower: u32,
    counts: u32,
    logs: &[u32],
    cal: &CalConstants,
    energy: &mut i32,
) -> Option<i32> {
    let mut next = logs.iter();
    for layer in 0..LAYERS_PER_TOWER {
        let count = (counts >> (28 - 4 * layer as u32)) & 0xf;
        for word in next.by_ref().take(count as usize) {
            *energy += cal.log_energy(tower as usize, layer, LogWord(*word));
            if *energy >= 0 {
                return Some(*energy);
            }
        }
    }
    None
}

/// Calorimeter counts and log words of a tower contributor with struck logs.
fn tower_logs<'a>(contributor: &Contributor<'a>) -> Result<Option<(u32, &'a [u32])>, DecodeError> {
    if !contributor.is_tower() {
        return Ok(None);
    }
    let counts = contributor.payload.first().copied().unwrap_or(0);
    if counts == 0 {
        return Ok(None);
    }
    let nlogs = cal_log_count(counts) as usize;
    let logs = contributor
        .payload
        .get(1..1 + nlogs)
        .ok_or(DecodeError::ShortTower {
            tower: contributor.cid,
            needed: 1 + nlogs,
            got: contributor.payload.len(),
        })?;
    Ok(Some((counts, logs)))
}

/// Total and per-layer energy read directly off the raw event.
///
/// Only the contributor headers and calorimeter sections are touched.
pub fn event_energy(event: &[u32], cal: &CalConstants) -> Result<(i32, [i32; 8]), DecodeError> {
    check_event(event)?;
    let mut layers = [0i32; 8];
    let mut total = 0;
    for contributor in ContributorIter::new(event) {
        let contributor = contributor?;
        let Some((counts, logs)) = tower_logs(&contributor)? else {
            continue;
        };
        for_each_log(contributor.cid as usize, counts, logs, |tower, layer, log| {
            let e = cal.log_energy(tower, layer, log);
            layers[layer] += e;
            total += e;
        });
    }
    Ok((total, layers))
}

// =========================================================================
// SHAPE CHECKS
// =========================================================================

/// Classify `num / den` against limits given in units of 1/1024.
///
/// Returns `lo_status` at or below `lo`, `hi_status` at or above `hi`,
/// otherwise an empty word. Large denominators are scaled down first so
/// the products stay in range.
pub fn ratio_check(
    num: i32,
    den: i32,
    lo: i32,
    lo_status: StatusWord,
    hi: i32,
    hi_status: StatusWord,
) -> StatusWord {
    let mut num = i64::from(num);
    let mut den = i64::from(den);
    let shift = (den as u32).leading_zeros() as i32 - 11;
    if shift < 0 {
        num >>= -shift;
        den >>= -shift;
    }
    num <<= 10;
    if num <= i64::from(lo) * den {
        lo_status
    } else if num >= i64::from(hi) * den {
        hi_status
    } else {
        StatusWord::empty()
    }
}

/// Returns `status` unless enough logs carry a noticeable share of the energy.
///
/// A log counts when its summed end energies exceed `energy / p_energy`.
/// At least `logs * p_count / 1024` such logs are needed to pass, where
/// `logs` is the number of pairs `log_ends` yields.
pub fn xtal_ratio_check<I>(
    energy: i32,
    log_ends: I,
    p_energy: i32,
    p_count: i32,
    status: StatusWord,
) -> StatusWord
where
    I: IntoIterator<Item = (i32, i32)>,
    I::IntoIter: Clone,
{
    let ends = log_ends.into_iter();
    let mut needed = ends.clone().count() as i64 * i64::from(p_count) / 1024;
    let energy = i64::from(energy);
    let p = i64::from(p_energy);
    for (a, b) in ends {
        let e = i64::from(a) + i64::from(b);
        if e * p + p / 2 > energy {
            needed -= 1;
            if needed <= 0 {
                return StatusWord::empty();
            }
        }
    }
    status
}

/// End energies of every struck log in the calorimeter towers.
pub fn log_ends<'a>(
    dir: &'a Directory<'_>,
    cal: &'a CalConstants,
) -> impl Iterator<Item = (i32, i32)> + Clone + 'a {
    dir.towers_in(dir.cal_towers()).flat_map(move |view| {
        let tower = view.tower() as usize;
        layer_logs(view.cal_counts(), view.logs()).map(move |(layer, log)| {
            cal.log(tower, layer, log.column() as usize)
                .map_or((0, 0), |c| c.end_energies(log))
        })
    })
}
