//! Track projection seam
//!
//! Pattern recognition inside a tower and the geometric match of its track
//! projections against ACD tiles and the calorimeter skirt live outside this
//! crate. The filter hands each nominated tower to a [`Projector`] and acts
//! on what comes back.

use crate::acd::AcdMasks;
use crate::directory::TowerView;
use crate::trigger::{trigger_form, TriggerSummary};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tracker data of one nominated tower.
#[derive(Clone, Copy, Debug)]
pub struct TowerTracker<'a> {
    pub tower: u32,
    /// Right-justified X layer mask.
    pub x: u32,
    /// Right-justified Y layer mask.
    pub y: u32,
    pub trigger: TriggerSummary,
    /// Accept words followed by the strip data.
    pub data: &'a [u32],
}

impl<'a> TowerTracker<'a> {
    pub fn from_view(view: &TowerView<'a>) -> Self {
        let (x, y) = view.layer_masks();
        Self {
            tower: view.tower(),
            x,
            y,
            trigger: trigger_form(x, y),
            data: view.tkr_words(),
        }
    }
}

/// Projections found in one tower, per view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Projections {
    pub x: u16,
    pub y: u16,
}

impl Projections {
    pub fn total(&self) -> u32 {
        u32::from(self.x) + u32::from(self.y)
    }
}

/// Where a tower's projections meet a struck ACD tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcdMatch {
    #[default]
    None,
    Top,
    /// A side tile; `row01` when it sits in one of the two upper rows.
    Side { row01: bool },
}

/// Tracker pattern recognition and geometric matching.
pub trait Projector: Send + Sync {
    /// Find the projections of one tower.
    fn project(&self, tracker: &TowerTracker<'_>) -> Projections;

    /// Match projections against the struck tiles.
    fn acd_match(
        &self,
        tracker: &TowerTracker<'_>,
        projections: &Projections,
        masks: &AcdMasks,
    ) -> AcdMatch;

    /// Whether the projections point into the calorimeter skirt.
    fn skirt_match(&self, tracker: &TowerTracker<'_>, projections: &Projections) -> bool;
}

/// Finds nothing. Every nominated tower counts as having no projection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProjector;

impl Projector for NullProjector {
    fn project(&self, _tracker: &TowerTracker<'_>) -> Projections {
        Projections::default()
    }

    fn acd_match(&self, _: &TowerTracker<'_>, _: &Projections, _: &AcdMasks) -> AcdMatch {
        AcdMatch::None
    }

    fn skirt_match(&self, _: &TowerTracker<'_>, _: &Projections) -> bool {
        false
    }
}
