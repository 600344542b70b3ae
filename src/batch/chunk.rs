//! Deterministic partitioning of an ordered input into fixed-size batches.

use crate::{BatchError, Result};

/// Split `items` into contiguous batches of `size` elements.
///
/// Every batch holds exactly `size` items except possibly the last, which holds
/// the remainder. Empty input yields no batches at all. Boundaries depend only
/// on `items.len()` and `size`, never on item content.
///
/// A `size` of zero is rejected with [`BatchError::Config`].
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Result<Vec<Vec<T>>> {
    if size == 0 {
        return Err(BatchError::Config(
            "chunk size must be at least 1".to_string(),
        ));
    }

    Ok(items.chunks(size).map(<[T]>::to_vec).collect())
}

/// Number of batches `chunk` produces for `len` items.
///
/// Rejects a `size` of zero the same way [`chunk`] does.
pub fn batch_count(len: usize, size: usize) -> Result<usize> {
    if size == 0 {
        return Err(BatchError::Config(
            "chunk size must be at least 1".to_string(),
        ));
    }

    Ok(len.div_ceil(size))
}
