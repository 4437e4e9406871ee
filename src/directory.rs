//! Event directory - one pass over the raw event, no payload copies
//!
//! An event is a length word followed by back-to-back contributors. Each
//! contributor starts with a two-word header:
//!
//! - word 0: contributor id in bits 17..21, length in bytes (header
//!   included) in bits 0..15, always a non-zero multiple of 16
//! - word 1: event sequence number
//!
//! Ids 0..15 are the towers, 16 the GEM trigger summary, 17 the ACD.

use crate::bits::{bit, BitIter};
use crate::error::DecodeError;
use crate::results::{EventSizes, TemSize};
use crate::trigger::accept_layers;

/// Contributor id slots.
pub const MAX_CONTRIBUTORS: usize = 32;

/// Towers in the instrument.
pub const TOWER_COUNT: usize = 16;

/// Id of the trigger summary contributor.
pub const CID_GEM: u32 = 16;

/// Id of the ACD contributor.
pub const CID_ACD: u32 = 17;

/// Header words in front of every contributor payload.
pub const HEADER_WORDS: usize = 2;

/// Tracker accept words at the head of a tower's TKR section.
pub const TKR_ACCEPT_WORDS: usize = 3;

/// Contributor id from a header word.
#[inline]
pub fn contributor_id(header: u32) -> u32 {
    (header >> 17) & 0x1f
}

/// Contributor length in bytes from a header word.
#[inline]
pub fn contributor_bytes(header: u32) -> u32 {
    header & 0xffff
}

/// Number of struck logs from a packed per-layer count word.
///
/// Each nibble is one layer's count; the nibbles are summed in parallel.
#[inline]
pub fn cal_log_count(counts: u32) -> u32 {
    const M: u32 = 0x0f0f_0f0f;
    let mut c = (counts & M) + ((counts >> 4) & M);
    c += c >> 16;
    c += c >> 8;
    c & 0xff
}

/// Check the event length word against the buffer.
pub fn check_event(event: &[u32]) -> Result<(), DecodeError> {
    let first = event.first().ok_or(DecodeError::Empty)?;
    let declared = *first as usize;
    let available = event.len() * 4;
    if declared != available {
        return Err(DecodeError::LengthMismatch {
            declared,
            available,
        });
    }
    Ok(())
}

/// A borrowed view of one contributor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contributor<'a> {
    pub cid: u32,
    /// Word offset of the header within the event.
    pub offset: usize,
    /// Event sequence number from the header.
    pub sequence: u32,
    /// Payload words following the header.
    pub payload: &'a [u32],
}

impl Contributor<'_> {
    /// Length in bytes, header included.
    pub fn bytes(&self) -> u32 {
        ((self.payload.len() + HEADER_WORDS) * 4) as u32
    }

    pub fn is_tower(&self) -> bool {
        (self.cid as usize) < TOWER_COUNT
    }
}

/// Walks the contributors of a raw event in order.
///
/// Yields an error at the first malformed header and stops.
#[derive(Clone, Debug)]
pub struct ContributorIter<'a> {
    event: &'a [u32],
    offset: usize,
}

impl<'a> ContributorIter<'a> {
    /// Iterate the contributors following the event length word.
    pub fn new(event: &'a [u32]) -> Self {
        Self { event, offset: 1 }
    }
}

impl<'a> Iterator for ContributorIter<'a> {
    type Item = Result<Contributor<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.event.len() {
            return None;
        }
        let offset = self.offset;
        let available = self.event.len() - offset;
        // any error ends the walk
        self.offset = self.event.len();

        let header = self.event[offset];
        let cid = contributor_id(header);
        if available < HEADER_WORDS {
            return Some(Err(DecodeError::ContributorOverrun {
                cid,
                offset,
                needed: HEADER_WORDS,
                available,
            }));
        }

        let bytes = contributor_bytes(header);
        if bytes == 0 || bytes & 0xf != 0 {
            return Some(Err(DecodeError::ContributorLength {
                offset,
                length: bytes,
            }));
        }

        let words = (bytes / 4) as usize;
        if words > available {
            return Some(Err(DecodeError::ContributorOverrun {
                cid,
                offset,
                needed: words,
                available,
            }));
        }

        self.offset = offset + words;
        Some(Ok(Contributor {
            cid,
            offset,
            sequence: self.event[offset + 1],
            payload: &self.event[offset + HEADER_WORDS..offset + words],
        }))
    }
}

/// Locate one contributor without composing the full directory.
///
/// Only the headers up to the match are validated.
pub fn find_contributor(event: &[u32], cid: u32) -> Result<Option<Contributor<'_>>, DecodeError> {
    check_event(event)?;
    for contributor in ContributorIter::new(event) {
        let contributor = contributor?;
        if contributor.cid == cid {
            return Ok(Some(contributor));
        }
    }
    Ok(None)
}

/// One tower's calorimeter and tracker sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TowerView<'a> {
    tower: u32,
    payload: &'a [u32],
    logs: usize,
}

impl<'a> TowerView<'a> {
    /// Split a tower payload, checking both sections fit.
    pub fn parse(tower: u32, payload: &'a [u32]) -> Result<Self, DecodeError> {
        let counts = *payload.first().ok_or(DecodeError::ShortTower {
            tower,
            needed: 1,
            got: 0,
        })?;
        let logs = cal_log_count(counts) as usize;
        let needed = 1 + logs + TKR_ACCEPT_WORDS;
        if payload.len() < needed {
            return Err(DecodeError::ShortTower {
                tower,
                needed,
                got: payload.len(),
            });
        }
        let view = Self {
            tower,
            payload,
            logs,
        };
        for (index, log) in view.logs().iter().enumerate() {
            let column = crate::cal::LogWord(*log).column();
            if column as usize >= crate::cal::LOGS_PER_LAYER {
                return Err(DecodeError::BadColumn {
                    tower,
                    index,
                    column,
                });
            }
        }
        Ok(view)
    }

    pub fn tower(&self) -> u32 {
        self.tower
    }

    /// Packed per-layer log counts, layer 0 in the top nibble.
    pub fn cal_counts(&self) -> u32 {
        self.payload[0]
    }

    /// Struck logs in one layer.
    pub fn layer_count(&self, layer: usize) -> usize {
        ((self.cal_counts() >> (28 - 4 * (layer as u32 & 7))) & 0xf) as usize
    }

    /// All struck log words, layer by layer.
    pub fn logs(&self) -> &'a [u32] {
        &self.payload[1..1 + self.logs]
    }

    pub fn has_cal(&self) -> bool {
        self.logs != 0
    }

    /// The three tracker accept words.
    pub fn tkr_accepts(&self) -> [u32; TKR_ACCEPT_WORDS] {
        let base = 1 + self.logs;
        [
            self.payload[base],
            self.payload[base + 1],
            self.payload[base + 2],
        ]
    }

    /// Right-justified `(x, y)` tracker layer masks.
    pub fn layer_masks(&self) -> (u32, u32) {
        accept_layers(self.tkr_accepts())
    }

    /// Tracker section: accept words followed by strip data.
    pub fn tkr_words(&self) -> &'a [u32] {
        &self.payload[1 + self.logs..]
    }

    /// A tower counts as having tracker data unless every accept word is zero.
    pub fn has_tkr(&self) -> bool {
        let [a0, a1, a2] = self.tkr_accepts();
        a2 != 0 || a1 != 0 || a0 != 0
    }

    /// Section sizes in bytes.
    pub fn sizes(&self) -> TemSize {
        let total = (self.payload.len() + HEADER_WORDS) * 4;
        let cal = (1 + self.logs) * 4;
        TemSize {
            tem: total as u32,
            cal: cal as u32,
            tkr: (self.payload.len() - 1 - self.logs) as u32 * 4,
        }
    }
}

/// Per-event directory of contributor views.
#[derive(Clone, Debug)]
pub struct Directory<'a> {
    event: &'a [u32],
    contributors: [Option<Contributor<'a>>; MAX_CONTRIBUTORS],
    towers: [Option<TowerView<'a>>; TOWER_COUNT],
    cids: u32,
    ctids: u32,
    sequence: u32,
}

impl<'a> Directory<'a> {
    /// Compose the directory in one linear scan.
    pub fn compose(event: &'a [u32]) -> Result<Self, DecodeError> {
        check_event(event)?;

        let mut dir = Self {
            event,
            contributors: [None; MAX_CONTRIBUTORS],
            towers: [None; TOWER_COUNT],
            cids: 0,
            ctids: 0,
            sequence: 0,
        };

        for contributor in ContributorIter::new(event) {
            let contributor = contributor?;
            let cid = contributor.cid;
            if dir.cids == 0 {
                dir.sequence = contributor.sequence;
            }
            if dir.cids & bit(cid) != 0 {
                return Err(DecodeError::DuplicateContributor {
                    cid,
                    offset: contributor.offset,
                });
            }
            dir.cids |= bit(cid);
            dir.contributors[cid as usize] = Some(contributor);

            if contributor.is_tower() {
                let view = TowerView::parse(cid, contributor.payload)?;
                if view.has_cal() {
                    dir.ctids |= bit(cid);
                }
                if view.has_tkr() {
                    dir.ctids |= bit(cid) >> 16;
                }
                dir.towers[cid as usize] = Some(view);
            }
        }

        Ok(dir)
    }

    pub fn event(&self) -> &'a [u32] {
        self.event
    }

    /// Present contributors, bit `0x8000_0000 >> cid`.
    pub fn cids(&self) -> u32 {
        self.cids
    }

    /// CAL towers in the high half, TKR towers in the low half.
    pub fn ctids(&self) -> u32 {
        self.ctids
    }

    /// Towers with calorimeter data, left-justified.
    pub fn cal_towers(&self) -> u32 {
        self.ctids & 0xffff_0000
    }

    /// Towers with tracker data, left-justified.
    pub fn tkr_towers(&self) -> u32 {
        self.ctids << 16
    }

    /// Sequence number of the first contributor.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn contributor(&self, cid: u32) -> Option<&Contributor<'a>> {
        self.contributors.get(cid as usize)?.as_ref()
    }

    pub fn gem(&self) -> Option<&Contributor<'a>> {
        self.contributor(CID_GEM)
    }

    pub fn acd(&self) -> Option<&Contributor<'a>> {
        self.contributor(CID_ACD)
    }

    pub fn tower(&self, tower: u32) -> Option<&TowerView<'a>> {
        self.towers.get(tower as usize)?.as_ref()
    }

    /// Towers of a left-justified mask, in ascending order.
    pub fn towers_in(&self, mask: u32) -> impl Iterator<Item = &TowerView<'a>> + Clone + '_ {
        BitIter::new(mask).filter_map(move |t| self.tower(t))
    }

    /// Byte sizes of every section.
    pub fn sizes(&self) -> EventSizes {
        let mut sizes = EventSizes {
            evt: (self.event.len() * 4) as u32,
            ..EventSizes::default()
        };
        if let Some(gem) = self.gem() {
            sizes.gem = gem.bytes();
        }
        if let Some(acd) = self.acd() {
            sizes.acd = acd.bytes();
        }
        for (slot, view) in sizes.tem.iter_mut().zip(self.towers.iter()) {
            if let Some(view) = view {
                *slot = view.sizes();
            }
        }
        sizes
    }
}
