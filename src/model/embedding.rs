use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Embedder, GeminiClient};

const DEFAULT_DIMENSIONS: usize = 256;

/// Deterministic bag-of-words embedder. Identical text always yields an
/// identical unit vector, so it is usable offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimensions;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Gemini(GeminiClient),
    Hashing(HashingEmbedder),
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        match self {
            EmbeddingBackend::Gemini(client) => client.embed(text).await,
            EmbeddingBackend::Hashing(embedder) => embedder.embed(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_sync("quiet luxury outerwear");
        let b = embedder.embed_sync("Quiet  luxury, outerwear");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert_eq!(embedder.embed_sync("  "), vec![0.0; 8]);
    }
}
