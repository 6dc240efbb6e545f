//! Embedding matrix with top-k dot-product search.
//!
//! Rows are stored flat and row-major, positionally aligned with the code
//! list. Rows are expected to be unit length, so the dot product is the
//! cosine similarity.

use std::cmp::Ordering;

use rayon::prelude::*;

/// Stores at least this many rows are scored in parallel.
const PARALLEL_MIN_ROWS: usize = 4096;

/// An ordered code list paired with one embedding row per code.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    codes: Vec<String>,
    dimensions: usize,
    data: Vec<f32>,
}

/// Search result from the embedding matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Row position in the store
    pub row: usize,
    pub code: String,
    /// Dot product with the query
    pub score: f32,
}

impl EmbeddingMatrix {
    /// Create a matrix from a code list and flat row-major data.
    pub fn new(codes: Vec<String>, dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::Shape(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        if data.len() != codes.len() * dimensions {
            return Err(IndexError::Shape(format!(
                "{} codes x {} dimensions needs {} values, got {}",
                codes.len(),
                dimensions,
                codes.len() * dimensions,
                data.len()
            )));
        }

        Ok(Self {
            codes,
            dimensions,
            data,
        })
    }

    /// Create a matrix from one vector per code.
    pub fn from_rows(
        codes: Vec<String>,
        dimensions: usize,
        rows: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if rows.len() != codes.len() {
            return Err(IndexError::Shape(format!(
                "{} codes but {} rows",
                codes.len(),
                rows.len()
            )));
        }

        let mut data = Vec::with_capacity(rows.len() * dimensions);
        for row in rows {
            if row.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: row.len(),
                });
            }
            data.extend_from_slice(&row);
        }

        Self::new(codes, dimensions, data)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    pub(crate) fn data(&self) -> &[f32] {
        &self.data
    }

    /// Return the `top_k` rows with the highest dot product against `query`.
    ///
    /// Length is `min(top_k, len)`, ordered by score descending. Equal scores
    /// keep store order. Only the selected subset is sorted, after a linear
    /// partition over all scores.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let k = top_k.min(self.len());
        if k == 0 {
            return Ok(vec![]);
        }

        let mut ranked: Vec<(usize, f32)> = self.scores(query).into_iter().enumerate().collect();

        if k < ranked.len() {
            ranked.select_nth_unstable_by(k - 1, rank_order);
            ranked.truncate(k);
        }
        ranked.sort_unstable_by(rank_order);

        Ok(ranked
            .into_iter()
            .map(|(row, score)| SearchResult {
                row,
                code: self.codes[row].clone(),
                score,
            })
            .collect())
    }

    /// Dot product of `query` with every row, in store order.
    fn scores(&self, query: &[f32]) -> Vec<f32> {
        if self.len() >= PARALLEL_MIN_ROWS {
            self.data
                .par_chunks_exact(self.dimensions)
                .map(|row| dot(row, query))
                .collect()
        } else {
            self.data
                .chunks_exact(self.dimensions)
                .map(|row| dot(row, query))
                .collect()
        }
    }
}

/// Score descending, then row ascending. NaN ranks below every number.
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    key(b.1)
        .partial_cmp(&key(a.1))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during matrix operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid embedding matrix shape: {0}")]
    Shape(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn codes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    fn three_code_store() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(
            codes(&["A00", "B01", "C02"]),
            3,
            vec![
                vec![1.0, 0.0, 0.0],
                unit(vec![0.6, 0.8, 0.0]),
                vec![0.0, 0.0, 1.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_three_code_scenario() {
        let store = three_code_store();
        let q = unit(vec![0.9, 0.3, 0.1]);

        let results = store.search(&q, 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].code, "A00");
        assert_eq!(results[1].code, "B01");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_zero_top_k_is_empty() {
        let store = three_code_store();
        assert!(store.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_top_k_clamped_to_store_size() {
        let store = three_code_store();
        let results = store.search(&[1.0, 0.0, 0.0], 50).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_empty_store() {
        let store = EmbeddingMatrix::new(vec![], 4, vec![]).unwrap();
        assert!(store.search(&[0.5, 0.5, 0.5, 0.5], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let store = three_code_store();
        let result = store.search(&[1.0, 0.0], 2);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_shape_validation() {
        let result = EmbeddingMatrix::new(codes(&["A", "B"]), 3, vec![0.0; 5]);
        assert!(matches!(result, Err(IndexError::Shape(_))));

        let result = EmbeddingMatrix::new(codes(&["A"]), 0, vec![]);
        assert!(matches!(result, Err(IndexError::Shape(_))));

        let result = EmbeddingMatrix::from_rows(codes(&["A"]), 2, vec![vec![1.0, 0.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_ties_keep_store_order() {
        let store = EmbeddingMatrix::from_rows(
            codes(&["D", "A", "C", "B", "E"]),
            2,
            vec![
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![1.0, 0.0],
            ],
        )
        .unwrap();

        let results = store.search(&[1.0, 0.0], 2).unwrap();
        let got: Vec<&str> = results.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(got, vec!["A", "B"]);

        // Repeated runs produce the same order.
        for _ in 0..10 {
            assert_eq!(store.search(&[1.0, 0.0], 4).unwrap(), store.search(&[1.0, 0.0], 4).unwrap());
        }
    }

    #[test]
    fn test_nan_ranks_last() {
        let store = EmbeddingMatrix::from_rows(
            codes(&["N", "X"]),
            1,
            vec![vec![f32::NAN], vec![0.2]],
        )
        .unwrap();

        let results = store.search(&[1.0], 2).unwrap();
        assert_eq!(results[0].code, "X");
        assert_eq!(results[1].code, "N");
    }

    #[test]
    fn test_top_k_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let dims = 8;

        for n in [1usize, 5, 37, 200] {
            let rows: Vec<Vec<f32>> = (0..n)
                .map(|_| unit((0..dims).map(|_| rng.random_range(-1.0..1.0)).collect()))
                .collect();
            let names: Vec<String> = (0..n).map(|i| format!("C{i:04}")).collect();
            let store = EmbeddingMatrix::from_rows(names, dims, rows.clone()).unwrap();
            let query = unit((0..dims).map(|_| rng.random_range(-1.0..1.0)).collect());

            let mut brute: Vec<(usize, f32)> = rows
                .iter()
                .map(|r| dot(r, &query))
                .enumerate()
                .collect();
            brute.sort_by(rank_order);

            for k in [1usize, 3, n / 2, n] {
                let results = store.search(&query, k).unwrap();
                assert_eq!(results.len(), k.min(n));

                for pair in results.windows(2) {
                    assert!(pair[0].score >= pair[1].score);
                }
                let expected: Vec<usize> = brute.iter().take(k).map(|(row, _)| *row).collect();
                let got: Vec<usize> = results.iter().map(|r| r.row).collect();
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_parallel_scoring_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = PARALLEL_MIN_ROWS + 17;
        let dims = 4;
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|_| unit((0..dims).map(|_| rng.random_range(-1.0..1.0)).collect()))
            .collect();
        let names: Vec<String> = (0..n).map(|i| format!("R{i}")).collect();
        let store = EmbeddingMatrix::from_rows(names, dims, rows.clone()).unwrap();
        let query = unit(vec![0.3, -0.2, 0.9, 0.1]);

        let results = store.search(&query, 10).unwrap();
        let best = rows
            .iter()
            .map(|r| dot(r, &query))
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].score, best);
    }
}
