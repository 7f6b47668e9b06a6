/// Exact nearest-neighbor index over L2-normalized vectors.
///
/// The corpus tops out around 10⁵ rows, where a brute-force dot-product scan
/// is both faster to build and simpler to reason about than an approximate
/// structure. Vectors live in one flat buffer; ids in a parallel list.
///
/// An index is immutable once built — rebuilds construct a new one and the
/// engine swaps the `Arc`, so concurrent queries see old or new, never a mix.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    ids: Vec<i64>,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build from (id, vector) pairs. Vectors are L2-normalized on the way
    /// in; entries with the wrong dimension or zero norm are skipped.
    pub fn build(dim: usize, entries: Vec<(i64, Vec<f32>)>) -> Self {
        let mut ids = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len() * dim);

        for (id, mut v) in entries {
            if v.len() != dim {
                continue;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm == 0.0 || !norm.is_finite() {
                continue;
            }
            for x in &mut v {
                *x /= norm;
            }
            ids.push(id);
            data.extend_from_slice(&v);
        }

        Self { dim, ids, data }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Top-`k` entries by similarity to `query`, best first.
    ///
    /// Scores are cosine similarity mapped onto [0, 1]: 1.0 is an identical
    /// direction, 0.5 orthogonal.
    pub fn query(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        if k == 0 || self.ids.is_empty() || query.len() != self.dim {
            return Vec::new();
        }

        let norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Vec::new();
        }
        let q: Vec<f32> = query.iter().map(|x| x / norm).collect();

        let mut scored: Vec<(i64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, &id)| {
                let start = row * self.dim;
                let dot: f32 = self.data[start..start + self.dim]
                    .iter()
                    .zip(&q)
                    .map(|(a, b)| a * b)
                    .sum();
                (id, (dot + 1.0) / 2.0)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
