//! Little-endian `f32` BLOB encoding for embeddings and centroids.

use crate::errors::{Result, StoreError};

/// Convert an f32 slice to a byte blob for storage.
pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a byte blob back to an f32 vector.
///
/// Trailing bytes that do not form a whole `f32` are ignored.
pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Decode a blob and check it has exactly `dims` components.
pub fn decode_checked(blob: &[u8], dims: usize) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let v = blob_to_f32_vec(blob);
    if v.len() != dims {
        return Err(StoreError::DimensionMismatch {
            expected: dims,
            actual: v.len(),
        });
    }
    Ok(v)
}
