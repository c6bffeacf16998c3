//! Row-compressed binary feature blocks
//!
//! Encoders emit one sorted list of active column indices per row. Blocks are
//! stacked horizontally and densified only when the model matrix is built.

use ndarray::Array2;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinaryMatrix {
    n_cols: usize,
    rows: Vec<Vec<u32>>,
}

impl BinaryMatrix {
    pub fn new(n_cols: usize, mut rows: Vec<Vec<u32>>) -> Self {
        for row in rows.iter_mut() {
            row.sort_unstable();
            row.dedup();
        }
        Self { n_cols, rows }
    }

    pub fn empty(n_rows: usize) -> Self {
        Self {
            n_cols: 0,
            rows: vec![Vec::new(); n_rows],
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.rows[i]
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.rows[row].binary_search(&(col as u32)).is_ok()
    }

    /// Number of set cells
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Place `other` to the right of `self`; both must have the same row count
    pub fn hstack(mut self, other: &BinaryMatrix) -> BinaryMatrix {
        debug_assert_eq!(self.n_rows(), other.n_rows());
        let offset = self.n_cols as u32;
        for (row, extra) in self.rows.iter_mut().zip(&other.rows) {
            row.extend(extra.iter().map(|c| c + offset));
        }
        self.n_cols += other.n_cols;
        self
    }

    /// Reorder rows; `order[i]` is the source row of output row `i`
    pub fn take_rows(&self, order: &[usize]) -> BinaryMatrix {
        BinaryMatrix {
            n_cols: self.n_cols,
            rows: order.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::<f32>::zeros((self.n_rows(), self.n_cols));
        for (i, row) in self.rows.iter().enumerate() {
            for &c in row {
                dense[[i, c as usize]] = 1.0;
            }
        }
        dense
    }
}
