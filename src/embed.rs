//! Embedding contract and the canonical byte codec for vectors.
//!
//! The crate never generates embeddings itself — callers supply an
//! [`Embedder`] (or a plain closure wrapped in [`FnEmbedder`]). Vectors are
//! fixed at [`EMBEDDING_DIM`] 32-bit floats. On disk and for any binary
//! interchange they are encoded as little-endian f32, `4 * D` bytes; over
//! HTTP they travel as a JSON array of numbers.

use crate::error::{LoreError, Result};

/// Number of dimensions produced by the reference model (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`EMBEDDING_DIM`] dimensions.
/// All methods are synchronous — callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this embedder produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Wraps a plain function as an [`Embedder`].
pub struct FnEmbedder<F>(pub F);

impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&str) -> Vec<f32> + Send + Sync,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok((self.0)(text))
    }
}

/// Encode a vector as little-endian f32 bytes (the canonical blob form).
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob back into a vector.
///
/// A length that is not a multiple of 4 means the blob is corrupt.
pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(LoreError::Integrity(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Reject vectors whose dimension does not match the configured width.
pub fn check_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(LoreError::invalid(format!(
            "embedding must have {} dimensions, got {}",
            EMBEDDING_DIM,
            vector.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_values() {
        let v: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i as f32) * 0.017 - 3.0).collect();
        let decoded = bytes_to_vector(&vector_to_bytes(&v)).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn blob_length_is_four_per_dimension() {
        let v = vec![0.5f32; EMBEDDING_DIM];
        assert_eq!(vector_to_bytes(&v).len(), 4 * EMBEDDING_DIM);
    }

    #[test]
    fn encoding_is_little_endian() {
        let bytes = vector_to_bytes(&[1.0f32]);
        assert_eq!(bytes, 1.0f32.to_le_bytes());
    }

    #[test]
    fn truncated_blob_is_integrity_error() {
        let err = bytes_to_vector(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, LoreError::Integrity(_)));
    }

    #[test]
    fn wrong_dimension_rejected() {
        assert!(check_dimension(&vec![0.0; EMBEDDING_DIM]).is_ok());
        assert!(check_dimension(&vec![0.0; 10]).is_err());
    }

    #[test]
    fn fn_embedder_delegates() {
        let embedder = FnEmbedder(|_: &str| vec![0.25f32; EMBEDDING_DIM]);
        let v = embedder.embed("anything").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert_eq!(v[0], 0.25);
    }
}
