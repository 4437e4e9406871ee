//! Bit primitives - the iteration mechanism over sparse masks
//!
//! Bit positions count from the most significant bit: position 0 is
//! `0x8000_0000`, position 31 is `0x0000_0001`. Every "for each struck
//! tile / tower / channel" loop in the filter takes the highest set bit,
//! clears it and repeats until the mask is empty.

/// Position of the highest set bit, MSB = 0. `None` for an empty word.
#[inline]
pub fn highest_set_bit(word: u32) -> Option<u32> {
    if word == 0 {
        None
    } else {
        Some(word.leading_zeros())
    }
}

/// Clear the bit at `position` (MSB = 0). Positions past 31 leave the word alone.
#[inline]
pub fn clear_bit(word: u32, position: u32) -> u32 {
    word & !bit(position)
}

/// The mask with only `position` set (MSB = 0), zero for positions past 31.
#[inline]
pub fn bit(position: u32) -> u32 {
    0x8000_0000u32.checked_shr(position).unwrap_or(0)
}

/// Iterator over set bit positions, highest first.
///
/// ```
/// use onboard_filter::BitIter;
///
/// let positions: Vec<u32> = BitIter::new(0x8000_0101).collect();
/// assert_eq!(positions, vec![0, 23, 31]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct BitIter(u32);

impl BitIter {
    pub fn new(word: u32) -> Self {
        Self(word)
    }

    /// Bits not yet visited.
    pub fn remaining(&self) -> u32 {
        self.0
    }
}

impl Iterator for BitIter {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        let n = highest_set_bit(self.0)?;
        self.0 = clear_bit(self.0, n);
        Some(n)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BitIter {}

/// Extract `count` bits of `word` starting at `from` (LSB = 0) and place
/// them at `to`.
#[inline]
pub const fn move_bits(word: u32, from: u32, count: u32, to: u32) -> u32 {
    let field = (word >> from) & ((1u32 << count) - 1);
    field << to
}

/// Number of low-order bits used by 18-bit layer masks.
pub const LAYER_BITS: u32 = 18;

/// Mask covering an 18-bit layer field.
pub const LAYER_MASK: u32 = (1 << LAYER_BITS) - 1;
