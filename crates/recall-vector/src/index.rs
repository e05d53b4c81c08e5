//! Append-only flat vector index with brute-force squared-L2 search.
//!
//! Vectors are L2-normalized on the way in, so squared distance lies in
//! [0, 4] and maps to cosine similarity as `1 - d / 2`. Slots are assigned
//! densely from zero and never reused or removed.

use std::cmp::Ordering;

use recall_core::error::{RecallError, Result};

/// Scale `v` to unit length in place. The zero vector is left as-is.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Map a squared distance between unit vectors to a similarity score.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

/// Flat in-memory index of normalized `dimension`-length vectors.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl SimilarityIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Rebuild from row-major stored vectors, which must already be normalized.
    pub fn from_raw(dimension: usize, vectors: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(RecallError::Corrupt("index dimension is zero".to_string()));
        }
        if vectors.len() % dimension != 0 {
            return Err(RecallError::Corrupt(format!(
                "{} stored floats is not a multiple of dimension {}",
                vectors.len(),
                dimension
            )));
        }
        Ok(Self { dimension, vectors })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of slots assigned so far.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Row-major storage, `dimension` floats per slot.
    pub fn raw(&self) -> &[f32] {
        &self.vectors
    }

    /// Stored (normalized) vector at `slot`.
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    fn check_dimension(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Normalize and append `vector`, returning its slot.
    pub fn append(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dimension(vector)?;
        let slot = self.len();
        let start = self.vectors.len();
        self.vectors.extend_from_slice(vector);
        normalize(&mut self.vectors[start..]);
        Ok(slot)
    }

    /// Up to `k` nearest slots by squared L2 distance to the normalized
    /// query, ascending. Ties go to the lower slot.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.check_dimension(query)?;
        if self.is_empty() {
            return Err(RecallError::EmptyIndex);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, row)| (slot, squared_l2(&q, row)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
