//! Output dimensionality negotiation and vector reshaping

use crate::error::{EmbedResult, EmbeddingError};
use crate::types::DimensionAdjustment;

/// Outcome of matching a requested width against a provider's capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedDimensions {
    /// Width the final vector must have
    pub target: usize,
    /// Width to ask the provider for
    pub native: usize,
}

/// Pick the width to request from a provider
///
/// A supported width is requested as-is. Anything else falls back to the
/// provider default, and the returned vector is later reshaped to `requested`.
pub fn negotiate_dimensions(
    requested: usize,
    supported: &[usize],
    provider_default: usize,
) -> NegotiatedDimensions {
    if supported.contains(&requested) {
        return NegotiatedDimensions {
            target: requested,
            native: requested,
        };
    }

    tracing::warn!(
        requested,
        provider_default,
        ?supported,
        "Requested dimensionality not supported by provider; using provider default"
    );
    NegotiatedDimensions {
        target: requested,
        native: provider_default,
    }
}

/// Reshape a vector to exactly `target` elements
///
/// Shorter vectors are padded by cyclic duplication of their own values,
/// longer ones are truncated. Deterministic for a given input.
///
/// # Errors
/// Returns `EmbeddingError::DimensionMismatch` when the vector is empty
pub fn fit_to_dimensions(
    mut embedding: Vec<f32>,
    target: usize,
) -> EmbedResult<(Vec<f32>, DimensionAdjustment)> {
    let native = embedding.len();
    if native == 0 {
        return Err(EmbeddingError::DimensionMismatch {
            expected: target,
            actual: 0,
        });
    }

    match native.cmp(&target) {
        std::cmp::Ordering::Equal => Ok((embedding, DimensionAdjustment::None)),
        std::cmp::Ordering::Greater => {
            embedding.truncate(target);
            Ok((embedding, DimensionAdjustment::Truncated { native }))
        }
        std::cmp::Ordering::Less => {
            let padded: Vec<f32> = embedding.iter().copied().cycle().take(target).collect();
            Ok((padded, DimensionAdjustment::Padded { native }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_width_requested_natively() {
        let negotiated = negotiate_dimensions(1536, &[768, 1536, 3072], 768);
        assert_eq!(negotiated.native, 1536);
        assert_eq!(negotiated.target, 1536);
    }

    #[test]
    fn test_unsupported_width_falls_back_to_default() {
        let negotiated = negotiate_dimensions(1000, &[768, 1536, 3072], 768);
        assert_eq!(negotiated.native, 768);
        assert_eq!(negotiated.target, 1000);
    }

    #[test]
    fn test_pad_by_cyclic_duplication() {
        let (vector, adjustment) = fit_to_dimensions(vec![1.0, 2.0, 3.0], 7).unwrap();
        assert_eq!(vector, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(adjustment, DimensionAdjustment::Padded { native: 3 });
    }

    #[test]
    fn test_truncate_longer_vector() {
        let (vector, adjustment) = fit_to_dimensions(vec![0.5; 1536], 768).unwrap();
        assert_eq!(vector.len(), 768);
        assert_eq!(adjustment, DimensionAdjustment::Truncated { native: 1536 });
    }

    #[test]
    fn test_exact_width_untouched() {
        let (vector, adjustment) = fit_to_dimensions(vec![0.1; 768], 768).unwrap();
        assert_eq!(vector.len(), 768);
        assert!(!adjustment.is_adjusted());
    }

    #[test]
    fn test_empty_vector_is_an_error() {
        assert!(matches!(
            fit_to_dimensions(Vec::new(), 768),
            Err(EmbeddingError::DimensionMismatch {
                expected: 768,
                actual: 0
            })
        ));
    }
}
