//! Synthetic event construction
//!
//! Builds raw events in the wire layout the filter decodes: ground tests,
//! replay tools and benchmarks use it to produce events with a known
//! answer.

use crate::acd::{BOARD_COUNT, CHANNELS_PER_BOARD};
use crate::cal::LAYERS_PER_TOWER;
use crate::directory::{CID_ACD, CID_GEM, HEADER_WORDS, TOWER_COUNT};
use crate::gem::GemRecord;
use crate::trigger::encode_accepts;

/// Contributors are padded to whole 16-byte packets.
const PACKET_WORDS: usize = 4;

/// Calorimeter and tracker content of one tower.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TowerData {
    /// Log words per layer, layer 0 first. At most 12 per layer.
    pub layer_logs: [Vec<u32>; LAYERS_PER_TOWER],
    /// Right-justified X layer accept mask.
    pub x: u32,
    /// Right-justified Y layer accept mask.
    pub y: u32,
    /// Strip words following the accept words.
    pub strips: Vec<u32>,
}

impl TowerData {
    /// Tower payload: count word, logs, accept words, strips.
    pub fn payload(&self) -> Vec<u32> {
        let mut counts = 0u32;
        for (layer, logs) in self.layer_logs.iter().enumerate() {
            counts |= ((logs.len() as u32) & 0xf) << (28 - 4 * layer as u32);
        }
        let mut words = vec![counts];
        for logs in &self.layer_logs {
            words.extend(logs.iter().take(0xf));
        }
        words.extend(encode_accepts(self.x, self.y));
        words.extend(&self.strips);
        words
    }
}

/// Readout of one ACD electronics board.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcdBoardData {
    /// Hit channels, channel 0 at bit 17.
    pub hit: u32,
    /// Accepted channels, channel 0 at bit 17.
    pub accept: u32,
    /// 13-bit pulse heights, in readout order.
    pub phas: Vec<u16>,
    /// Clear the start bit.
    pub missing_start: bool,
    /// Set the header parity error bit.
    pub header_parity: bool,
    /// Set the parity error bit on the first pulse height.
    pub pha_parity: bool,
}

/// Encode an ACD contributor payload, boards in readout order.
pub fn encode_acd(boards: &[AcdBoardData; BOARD_COUNT]) -> Vec<u32> {
    let channels = (1u32 << CHANNELS_PER_BOARD) - 1;
    let mut halves: Vec<u16> = Vec::new();
    for board in boards {
        let hit = board.hit & channels;
        let accept = board.accept & channels;
        let start = if board.missing_start { 0 } else { 0x8000 };
        halves.push((start | (hit >> 3)) as u16);
        halves.push((((hit & 0x7) << 13) | (accept >> 5)) as u16);
        let mut d2 = (accept & 0x1f) << 11;
        if !board.phas.is_empty() {
            d2 |= 1 << 10;
        }
        if board.header_parity {
            d2 |= 1 << 9;
        }
        halves.push(d2 as u16);

        let last = board.phas.len().saturating_sub(1);
        for (i, pha) in board.phas.iter().enumerate() {
            let mut raw = (pha & 0x1fff) << 1;
            if i != last {
                raw |= 1 << 14;
            }
            if i == 0 && board.pha_parity {
                raw |= 1;
            }
            halves.push(raw);
        }
    }

    halves
        .chunks(2)
        .map(|pair| {
            let hi = u32::from(pair[0]) << 16;
            let lo = pair.get(1).copied().map_or(0, u32::from);
            hi | lo
        })
        .collect()
}

/// Assembles a raw event: length word, then GEM, towers and ACD.
#[derive(Clone, Debug, Default)]
pub struct EventBuilder {
    sequence: u32,
    gem: GemRecord,
    towers: Vec<(u32, TowerData)>,
    acd: Option<Vec<u32>>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number stamped in every contributor header.
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn gem(mut self, gem: GemRecord) -> Self {
        self.gem = gem;
        self
    }

    /// Add a tower. Towers are emitted in ascending id order; a repeated
    /// id replaces the earlier data.
    pub fn tower(mut self, tower: u32, data: TowerData) -> Self {
        let tower = tower % TOWER_COUNT as u32;
        self.towers.retain(|(t, _)| *t != tower);
        self.towers.push((tower, data));
        self.towers.sort_by_key(|(t, _)| *t);
        self
    }

    /// Add an ACD contributor built from board data.
    pub fn acd(mut self, boards: &[AcdBoardData; BOARD_COUNT]) -> Self {
        self.acd = Some(encode_acd(boards));
        self
    }

    /// Add an ACD contributor from raw payload words.
    pub fn acd_words(mut self, payload: Vec<u32>) -> Self {
        self.acd = Some(payload);
        self
    }

    pub fn build(&self) -> Vec<u32> {
        let mut event = vec![0u32];
        self.push(&mut event, CID_GEM, &self.gem.to_words());
        for (tower, data) in &self.towers {
            self.push(&mut event, *tower, &data.payload());
        }
        if let Some(acd) = &self.acd {
            self.push(&mut event, CID_ACD, acd);
        }
        event[0] = (event.len() * 4) as u32;
        event
    }

    fn push(&self, event: &mut Vec<u32>, cid: u32, payload: &[u32]) {
        let words = (HEADER_WORDS + payload.len()).div_ceil(PACKET_WORDS) * PACKET_WORDS;
        event.push((cid << 17) | (words * 4) as u32);
        event.push(self.sequence);
        event.extend_from_slice(payload);
        event.extend(std::iter::repeat(0).take(words - HEADER_WORDS - payload.len()));
    }
}
