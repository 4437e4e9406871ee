//! Observer pattern for filter diagnostics
//!
//! The filter keeps no counters of its own. Anything that wants to watch
//! the pipeline - run statistics, debug logging, a test harness - subscribes
//! and is told as each event moves through the stages.

use crate::acd::AcdParity;
use crate::error::DecodeError;
use crate::status::StatusWord;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stage {
    /// GEM trigger summary read.
    Trigger,
    /// ACD classification and splash check.
    Acd,
    /// Calorimeter energy sum and tile energy cuts.
    Cal0,
    /// Event directory composed.
    Directory,
    /// Shadow match and bottom-tracker check.
    Atf,
    /// Calorimeter shape checks.
    Cal1,
    /// Tracker nomination and projections.
    Tkr,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Acd => "acd",
            Self::Cal0 => "cal0",
            Self::Directory => "dir",
            Self::Atf => "atf",
            Self::Cal1 => "cal1",
            Self::Tkr => "tkr",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event emitted as the filter works through one event
#[derive(Clone, Debug)]
pub enum FilterEvent {
    /// A stage ran to completion without a veto
    StageComplete { stage: Stage, status: StatusWord },
    /// The event was rejected
    Vetoed {
        evt_num: u32,
        stage: Stage,
        status: StatusWord,
        /// Calorimeter energy in LEU, -1 if not yet summed
        energy: i32,
    },
    /// The event survived every stage
    Accepted {
        evt_num: u32,
        status: StatusWord,
        energy: i32,
    },
    /// The ACD record carried parity anomalies
    AcdParity { evt_num: u32, parity: AcdParity },
    /// The event could not be decoded
    DecodeFailed { error: DecodeError },
}

/// Observer that receives filter events
pub trait FilterObserver: Send + Sync {
    /// Called when a filter event occurs
    fn on_event(&self, event: &FilterEvent);
}

/// Function-based observer for simple cases
pub struct FnObserver<F: Fn(&FilterEvent) + Send + Sync>(pub F);

impl<F: Fn(&FilterEvent) + Send + Sync> FilterObserver for FnObserver<F> {
    fn on_event(&self, event: &FilterEvent) {
        (self.0)(event);
    }
}

/// Channel-based observer - sends events to a channel
pub struct ChannelObserver {
    sender: std::sync::mpsc::Sender<FilterEvent>,
}

impl ChannelObserver {
    pub fn new(sender: std::sync::mpsc::Sender<FilterEvent>) -> Self {
        Self { sender }
    }
}

impl FilterObserver for ChannelObserver {
    fn on_event(&self, event: &FilterEvent) {
        let _ = self.sender.send(event.clone());
    }
}
