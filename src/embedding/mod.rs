use sha2::{Digest, Sha256};

/// Dimension used when the configuration does not override it.
pub const DEFAULT_DIMENSION: usize = 384;

/// Deterministic feature-hashing embedder used by the bundled indexers.
///
/// Each lowercase alphanumeric token is hashed into one slot of the vector with a signed
/// weight, and the result is L2-normalized, so texts sharing vocabulary land close together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct an embedder producing vectors of `dimension` slots (at least one).
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension: if dimension == 0 { 1 } else { dimension },
        }
    }

    /// Length of produced vectors.
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `text`. Text without tokens maps to the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut slot_bytes = [0_u8; 8];
            slot_bytes.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(slot_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[slot] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Cosine similarity of two equal-length vectors, clamped to `[0, 1]`.
pub fn similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    (dot / (left_norm * right_norm)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let first = embedder.embed("Aspirin for chest pain");
        let second = embedder.embed("aspirin FOR chest pain");

        assert_eq!(first.len(), 64);
        assert_eq!(first, second);
        let norm = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("metformin diabetes");
        let related = embedder.embed("patient with diabetes started metformin");
        let unrelated = embedder.embed("knee x-ray shows no fracture");

        assert!(similarity(&query, &related) > similarity(&query, &unrelated));
    }

    #[test]
    fn blank_text_is_the_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed("  ,; ").iter().all(|v| *v == 0.0));
        assert_eq!(similarity(&embedder.embed(""), &embedder.embed("x")), 0.0);
    }

    #[test]
    fn zero_dimension_is_raised_to_one() {
        assert_eq!(HashingEmbedder::new(0).dimension(), 1);
    }
}
