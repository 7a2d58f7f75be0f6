//! Persistence table of the random-access backend.
//!
//! ## Format
//!
//! The table is a run of little-endian `u64` words written at the logical
//! file size, trailing the real data:
//!
//! ```text
//! [count][start_0][written_0] ... [start_{count-1}][written_{count-1}]
//! ```
//!
//! so an encoded table is always `1 + 2 * count` words long.
//!
//! ## Invariants
//!
//! - One pair per writer ever created in the current generation
//! - A table that cannot be fully decoded is treated as absent, never as
//!   partial state

/// Width of one table word in bytes.
pub(crate) const WORD_SIZE: usize = 8;

/// Width of one `(start, written)` pair in bytes.
const PAIR_SIZE: usize = 2 * WORD_SIZE;

/// Region bookkeeping for every writer of a random-access storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PersistenceTable {
    pairs: Vec<(u64, u64)>,
}

impl PersistenceTable {
    /// Number of writer pairs.
    pub(crate) fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Adds a `(start, 0)` pair and returns its slot.
    pub(crate) fn push(&mut self, start: u64) -> usize {
        self.pairs.push((start, 0));
        self.pairs.len() - 1
    }

    /// Records the written size of the pair at `slot`.
    pub(crate) fn set_written(&mut self, slot: usize, written: u64) {
        if let Some(pair) = self.pairs.get_mut(slot) {
            pair.1 = written;
        }
    }

    /// Returns the `(start, written)` pairs in slot order.
    pub(crate) fn pairs(&self) -> &[(u64, u64)] {
        &self.pairs
    }

    /// Removes every pair.
    pub(crate) fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Serializes the table.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(WORD_SIZE + self.pairs.len() * PAIR_SIZE);
        bytes.extend_from_slice(&(self.pairs.len() as u64).to_le_bytes());
        for &(start, written) in &self.pairs {
            bytes.extend_from_slice(&start.to_le_bytes());
            bytes.extend_from_slice(&written.to_le_bytes());
        }
        bytes
    }

    /// Decodes the pair count from a header word.
    pub(crate) fn decode_count(header: &[u8]) -> Option<u64> {
        let word: [u8; WORD_SIZE] = header.get(..WORD_SIZE)?.try_into().ok()?;
        Some(u64::from_le_bytes(word))
    }

    /// Full encoded length of a table with `count` pairs, if addressable.
    pub(crate) fn encoded_len(count: u64) -> Option<usize> {
        usize::try_from(count)
            .ok()?
            .checked_mul(PAIR_SIZE)?
            .checked_add(WORD_SIZE)
    }

    /// Decodes a whole encoded table.
    ///
    /// Returns `None` for anything short, inconsistent or describing a
    /// region that does not fit in `u64`.
    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        let count = Self::decode_count(bytes)?;
        if bytes.len() != Self::encoded_len(count)? {
            return None;
        }

        let pairs = bytes[WORD_SIZE..]
            .chunks_exact(PAIR_SIZE)
            .map(|pair| {
                let (start, written) = pair.split_at(WORD_SIZE);
                let start = u64::from_le_bytes(start.try_into().ok()?);
                let written = u64::from_le_bytes(written.try_into().ok()?);
                start.checked_add(written)?;
                Some((start, written))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self { pairs })
    }
}
