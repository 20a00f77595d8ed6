//! Coefficient preprocessing into frequency-domain partitions

use crate::error::CoeffError;
use crate::real::Real;
use crate::transform::Transform;

/// Frequency-domain partitions of one channel's impulse response
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffSet<T> {
    /// One working-layout spectrum per partition, each `2 × filter_length` long
    blocks: Vec<Vec<T>>,
}

impl<T: Real> CoeffSet<T> {
    pub fn blocks(&self) -> &[Vec<T>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, index: usize) -> &[T] {
        &self.blocks[index]
    }
}

/// Split `raw` into `coeff_blocks` partitions of `filter_length` samples and
/// transform each one.
///
/// Partitions past the end of `raw` become silence and the partition that
/// straddles the end is zero-padded. A non-finite partition fails the whole
/// set; `channel` only labels the error.
pub fn preprocess<T: Real>(
    transform: &mut Transform<T>,
    raw: &[T],
    filter_length: usize,
    coeff_blocks: usize,
    scale: f64,
    channel: usize,
) -> Result<CoeffSet<T>, CoeffError> {
    let size = transform.size();
    let mut blocks = Vec::with_capacity(coeff_blocks);

    for n in 0..coeff_blocks {
        let start = n * filter_length;
        let chunk = if start >= raw.len() {
            &[][..]
        } else {
            &raw[start..raw.len().min(start + filter_length)]
        };

        let mut block = vec![T::ZERO; size];
        if transform.coeffs_to_internal(chunk, scale, &mut block).is_err() {
            transform.log(&format!("Failed to preprocess coefficient block {}.", n));
            return Err(CoeffError::Preprocess { channel, block: n });
        }
        blocks.push(block);
    }

    Ok(CoeffSet { blocks })
}

/// Unit impulse of `length` samples (at least one)
pub fn dirac<T: Real>(length: usize) -> Vec<T> {
    let mut coeffs = vec![T::ZERO; length.max(1)];
    coeffs[0] = T::ONE;
    coeffs
}
