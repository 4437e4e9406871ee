//! GEM trigger summary record

use crate::acd::AcdMasks;
use crate::error::DecodeError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The trigger electronics' per-event summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GemRecord {
    /// Tracker trigger vector (low half) and throttle bits (high half).
    pub thr_tkr: u32,
    /// CAL-LO tower vector (low half) and CAL-HI tower vector (high half).
    pub cal_hi_lo: u32,
    pub cno_reqvec: u32,
    /// Y face veto tiles.
    pub veto_xz: u32,
    /// X face veto tiles.
    pub veto_yz: u32,
    /// Top face veto tiles.
    pub veto_xy: u32,
    pub veto_ru: u32,
    pub deadtime: u32,
    pub evttime: u32,
    pub ppstime: u32,
    pub throttled: u32,
    pub prescaled: u32,
    pub sent: u32,
}

impl GemRecord {
    /// Payload words in a GEM record.
    pub const WORDS: usize = 13;

    /// Decode the GEM contributor payload.
    pub fn parse(payload: &[u32]) -> Result<Self, DecodeError> {
        let w = payload.get(..Self::WORDS).ok_or(DecodeError::ShortGem {
            needed: Self::WORDS,
            got: payload.len(),
        })?;
        Ok(Self {
            thr_tkr: w[0],
            cal_hi_lo: w[1],
            cno_reqvec: w[2],
            veto_xz: w[3],
            veto_yz: w[4],
            veto_xy: w[5],
            veto_ru: w[6],
            deadtime: w[7],
            evttime: w[8],
            ppstime: w[9],
            throttled: w[10],
            prescaled: w[11],
            sent: w[12],
        })
    }

    /// Encode into payload words.
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.thr_tkr,
            self.cal_hi_lo,
            self.cno_reqvec,
            self.veto_xz,
            self.veto_yz,
            self.veto_xy,
            self.veto_ru,
            self.deadtime,
            self.evttime,
            self.ppstime,
            self.throttled,
            self.prescaled,
            self.sent,
        ]
    }

    /// Towers whose CAL low discriminator fired.
    pub fn cal_lo(&self) -> u32 {
        self.cal_hi_lo & 0xffff
    }

    /// Towers whose CAL high discriminator fired.
    pub fn cal_hi(&self) -> u32 {
        self.cal_hi_lo >> 16
    }

    /// Towers with a tracker trigger.
    pub fn tkr_vector(&self) -> u32 {
        self.thr_tkr & 0xffff
    }

    /// Tracker throttle bits.
    pub fn tkr_throttle(&self) -> u32 {
        self.thr_tkr & 0xffff_0000
    }

    /// Struck veto tiles in the geographic layout.
    pub fn acd_masks(&self) -> AcdMasks {
        AcdMasks {
            top: self.veto_xy,
            x: self.veto_yz,
            y: self.veto_xz,
        }
    }
}
