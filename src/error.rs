//! Error types for event decoding and configuration loading.

use thiserror::Error;

/// Errors that abort decoding of the current event.
///
/// A decode error is never a veto: the event is unusable and no partial
/// status should be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer holds no words at all.
    #[error("Empty event buffer")]
    Empty,

    /// The event header's byte length disagrees with the buffer.
    #[error("Event length mismatch: header says {declared} bytes, buffer holds {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// A contributor's declared length runs past the end of the event.
    #[error("Contributor {cid} at word {offset} overruns the event: needs {needed} words, {available} left")]
    ContributorOverrun {
        cid: u32,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A contributor length of zero or not a multiple of a 16-byte packet.
    #[error("Contributor at word {offset} has malformed length {length:#x}")]
    ContributorLength { offset: usize, length: u32 },

    /// Two contributors claim the same id.
    #[error("Duplicate contributor {cid} at word {offset}")]
    DuplicateContributor { cid: u32, offset: usize },

    /// The trigger summary record is absent.
    #[error("Event has no GEM contributor")]
    MissingGem,

    /// The trigger summary record is too short.
    #[error("GEM record truncated: need {needed} words, got {got}")]
    ShortGem { needed: usize, got: usize },

    /// A tower's calorimeter or tracker section runs past its contributor.
    #[error("Tower {tower} payload truncated: need {needed} words, got {got}")]
    ShortTower { tower: u32, needed: usize, got: usize },

    /// A calorimeter log word names a column the layer does not have.
    #[error("Tower {tower} log {index} has column {column}, layers hold 12 logs")]
    BadColumn { tower: u32, index: usize, column: u32 },

    /// An ACD board record runs past the ACD contributor.
    #[error("ACD record truncated at board {board}, half-word {offset}")]
    AcdTruncated { board: usize, offset: usize },

    /// A board reported more pulse heights than the hardware can produce.
    #[error("ACD board {board} PHA list exceeds {max} values")]
    PhaOverflow { board: usize, max: usize },
}

/// Errors raised while loading or validating a filter configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Calibration table has the wrong number of channel entries.
    #[error("Calibration table has {got} channels, expected {expected}")]
    CalibrationSize { expected: usize, got: usize },

    /// A calibration gain of zero makes every log read as pedestal.
    #[error("Calibration channel {channel} range {range} has zero gain")]
    ZeroGain { channel: usize, range: usize },

    /// The dense-splash shortcut needs at least one tile.
    #[error("splash_tile_limit must be > 0")]
    ZeroTileLimit,

    /// Two thresholds that must be ordered are not.
    #[error("Threshold {lower} ({lower_value}) must not exceed {upper} ({upper_value})")]
    ThresholdOrder {
        lower: &'static str,
        lower_value: i32,
        upper: &'static str,
        upper_value: i32,
    },

    /// A ratio bound lies outside [0, 1024].
    #[error("Ratio limit {name} = {value} outside [0, 1024]")]
    RatioLimit { name: &'static str, value: i32 },

    /// The enabled-veto mask names bits outside the veto class.
    #[error("Veto mask {mask:#x} contains non-veto bits")]
    VetoMask { mask: u64 },
}
