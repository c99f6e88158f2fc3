//! Host-side reference and output buffers, partitioned into blocks.
//!
//! Block `i` covers bytes `[i * block_len, (i + 1) * block_len)` of both
//! buffers. The reference is written once by [`Dataset::generate`]; the
//! output starts zeroed and is only written by the device while a block
//! is bound.

use std::cmp::Ordering;
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{ProbeError, ProbeResult};

/// Symbols the reference sequence is drawn from.
pub const ALPHABET: &[u8; 4] = b"ATCG";

/// Reference and output sequences for one probe run.
#[derive(Debug)]
pub struct Dataset {
    reference: Vec<u8>,
    output: Vec<u8>,
    block_len: usize,
}

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
fn zeroed(len: usize) -> ProbeResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ProbeError::Allocation { bytes: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

impl Dataset {
    /// Allocate both buffers, zero-filled.
    ///
    /// `len` must be a multiple of `block_len`, and `block_len` must be
    /// non-zero.
    pub fn new(len: usize, block_len: usize) -> ProbeResult<Self> {
        if block_len == 0 {
            return Err(ProbeError::InvalidConfig(
                "block length must be non-zero".into(),
            ));
        }
        if len % block_len != 0 {
            return Err(ProbeError::InvalidConfig(format!(
                "dataset length {len} is not a multiple of block length {block_len}"
            )));
        }

        Ok(Dataset {
            reference: zeroed(len)?,
            output: zeroed(len)?,
            block_len,
        })
    }

    /// Fill the reference with random alphabet symbols and clear the output.
    pub fn generate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for byte in self.reference.iter_mut() {
            *byte = ALPHABET[rng.gen_range(0..ALPHABET.len())];
        }
        self.output.fill(0);
    }

    /// [`generate`](Self::generate) with a generator seeded from the clock.
    ///
    /// Returns the seed so a failing run can be reproduced.
    pub fn generate_time_seeded(&mut self) -> u64 {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        tracing::debug!(seed, "generating reference data");
        self.generate(&mut StdRng::seed_from_u64(seed));
        seed
    }

    /// Total length of each buffer in bytes.
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn block_count(&self) -> usize {
        self.len() / self.block_len
    }

    fn block_range(&self, block: usize) -> Range<usize> {
        assert!(
            block < self.block_count(),
            "block {block} out of range ({} blocks)",
            self.block_count()
        );
        let start = block * self.block_len;
        start..start + self.block_len
    }

    /// Output bytes for `block`.
    pub fn output_block(&self, block: usize) -> &[u8] {
        &self.output[self.block_range(block)]
    }

    /// Reference bytes for `block`.
    pub fn reference_block(&self, block: usize) -> &[u8] {
        &self.reference[self.block_range(block)]
    }

    /// Borrow `block`'s output mutably and its reference immutably at once.
    pub fn block_pair_mut(&mut self, block: usize) -> (&mut [u8], &[u8]) {
        let range = self.block_range(block);
        (&mut self.output[range.clone()], &self.reference[range])
    }

    /// Lexicographic comparison of `block`'s output against its reference.
    ///
    /// `Ordering::Equal` means the device returned the data unchanged.
    pub fn compare(&self, block: usize) -> Ordering {
        self.output_block(block).cmp(self.reference_block(block))
    }

    /// Offset within `block` of the first byte that differs, if any.
    pub fn first_difference(&self, block: usize) -> Option<usize> {
        self.output_block(block)
            .iter()
            .zip(self.reference_block(block))
            .position(|(out, reference)| out != reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(len: usize, block_len: usize) -> Dataset {
        let mut data = Dataset::new(len, block_len).unwrap();
        data.generate(&mut StdRng::seed_from_u64(7));
        data
    }

    #[test]
    fn test_new_rejects_partial_trailing_block() {
        let err = Dataset::new(100, 64).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }

    #[test]
    fn test_new_rejects_zero_block_len() {
        assert!(matches!(
            Dataset::new(64, 0),
            Err(ProbeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let data = Dataset::new(0, 64).unwrap();
        assert!(data.is_empty());
        assert_eq!(data.block_count(), 0);
    }

    #[test]
    fn test_generate_uses_alphabet_and_zeroes_output() {
        let data = generated(640, 64);
        assert_eq!(data.block_count(), 10);
        for block in 0..data.block_count() {
            assert!(data
                .reference_block(block)
                .iter()
                .all(|b| ALPHABET.contains(b)));
            assert!(data.output_block(block).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_generate_covers_alphabet() {
        let data = generated(4096, 64);
        for symbol in ALPHABET {
            assert!(
                (0..data.block_count()).any(|i| data.reference_block(i).contains(symbol)),
                "symbol {} never generated",
                *symbol as char
            );
        }
    }

    #[test]
    fn test_blocks_are_contiguous_and_disjoint() {
        let data = generated(256, 64);
        let whole: Vec<u8> = (0..4)
            .flat_map(|i| data.reference_block(i).to_vec())
            .collect();
        assert_eq!(whole, data.reference);
    }

    #[test]
    fn test_compare_after_copy_is_equal() {
        let mut data = generated(256, 64);
        let (out, reference) = data.block_pair_mut(2);
        out.copy_from_slice(reference);
        assert_eq!(data.compare(2), Ordering::Equal);
        assert_eq!(data.first_difference(2), None);
        // Untouched blocks are still zero, which sorts below any symbol.
        assert_eq!(data.compare(1), Ordering::Less);
    }

    #[test]
    fn test_first_difference_reports_offset() {
        let mut data = generated(128, 64);
        let (out, reference) = data.block_pair_mut(1);
        out.copy_from_slice(reference);
        out[17] = b'x';
        assert_eq!(data.first_difference(1), Some(17));
        assert_ne!(data.compare(1), Ordering::Equal);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_block_index_out_of_range_panics() {
        let data = generated(128, 64);
        let _ = data.output_block(2);
    }

    #[test]
    fn test_time_seeded_generation_fills_reference() {
        let mut data = Dataset::new(64, 64).unwrap();
        data.generate_time_seeded();
        assert!(data.reference_block(0).iter().all(|b| ALPHABET.contains(b)));
    }
}
