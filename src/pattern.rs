use core::fmt;
use core::ops::Range;

/// Sparsity mask for the Jacobian of the full parameter space.
///
/// The mask covers all `vars` columns, not just the active subset; the
/// differentiation engine looks up columns by full-space variable index.
/// A row listed in a column means "this residual responds to this
/// parameter"; everything else is guaranteed zero and is never evaluated.
///
/// Stored column-compressed: zero-based indices, sorted rows per column.
#[derive(Debug, Clone)]
pub struct JacobianPattern {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
}

/// Validation errors for a JacobianPattern.
#[derive(Debug, Clone)]
pub enum PatternError {
    /// col_ptrs length is not ncols + 1.
    ColPtrLen { expected: usize, actual: usize },
    /// col_ptrs[0] is not 0.
    ColPtrStart { value: usize },
    /// col_ptrs is not non-decreasing.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// col_ptrs[ncols] does not match row_indices length.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    /// A column index is >= ncols.
    ColIndexOutOfBounds { col: usize, ncols: usize },
    /// A row index is >= nrows.
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Row indices in a column are not sorted.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "col_ptrs length {actual} does not match expected {expected}")
            }
            Self::ColPtrStart { value } => {
                write!(f, "col_ptrs must start at 0 (got {value})")
            }
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "col_ptrs not monotonic at col {col}: {prev} > {next}")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => {
                write!(
                    f,
                    "col_ptrs end {last} exceeds row_indices length {row_indices_len}"
                )
            }
            Self::ColIndexOutOfBounds { col, ncols } => {
                write!(f, "column index {col} exceeds ncols {ncols}")
            }
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row index {row} in col {col} exceeds nrows {nrows}")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "row indices not sorted in col {col}: {prev} > {next}")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl JacobianPattern {
    /// Creates a validated column-compressed sparsity mask.
    ///
    /// Requirements:
    /// - `col_ptrs.len() == ncols + 1`
    /// - `col_ptrs` is non-decreasing and starts at `0`
    /// - `col_ptrs[ncols] == row_indices.len()`
    /// - row indices are sorted and `< nrows` within each column
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
    ) -> Result<Self, PatternError> {
        let expected = ncols + 1;
        if col_ptrs.len() != expected {
            return Err(PatternError::ColPtrLen {
                expected,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs.first().copied().unwrap_or(0) != 0 {
            return Err(PatternError::ColPtrStart { value: col_ptrs[0] });
        }
        for col in 0..ncols {
            let prev = col_ptrs[col];
            let next = col_ptrs[col + 1];
            if prev > next {
                return Err(PatternError::ColPtrNotMonotonic { col, prev, next });
            }
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(PatternError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }

        for col in 0..ncols {
            let start = col_ptrs[col];
            let end = col_ptrs[col + 1];
            if start == end {
                continue;
            }
            let mut prev = row_indices[start];
            if prev >= nrows {
                return Err(PatternError::RowIndexOutOfBounds {
                    col,
                    row: prev,
                    nrows,
                });
            }
            for &row in &row_indices[start + 1..end] {
                if prev >= row {
                    return Err(PatternError::RowIndexNotSorted { col, prev, next: row });
                }
                if row >= nrows {
                    return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
                }
                prev = row;
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
        })
    }

    /// Builds a mask from `(row, col)` entries in any order.
    ///
    /// Duplicates are merged; everything not listed is masked out.
    pub fn from_entries(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize)],
    ) -> Result<Self, PatternError> {
        let mut cols: Vec<Vec<usize>> = vec![Vec::new(); ncols];
        for &(row, col) in entries {
            if col >= ncols {
                return Err(PatternError::ColIndexOutOfBounds { col, ncols });
            }
            cols[col].push(row);
        }
        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        col_ptrs.push(0);
        for col_rows in &mut cols {
            col_rows.sort_unstable();
            col_rows.dedup();
            row_indices.extend_from_slice(col_rows);
            col_ptrs.push(row_indices.len());
        }
        Self::new(nrows, ncols, col_ptrs, row_indices)
    }

    /// Number of residuals (rows of the mask).
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of parameters of the full space (columns of the mask).
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of unmasked entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    /// Index range in row_indices for the given column.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Sorted residual rows that respond to the given parameter.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        let range = self.col_range(col);
        &self.row_indices[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_build_a_sorted_mask() {
        let pattern =
            JacobianPattern::from_entries(4, 3, &[(3, 0), (0, 0), (2, 2), (0, 0)]).unwrap();
        assert_eq!(pattern.nnz(), 3);
        assert_eq!(pattern.row_indices_of_col(0), &[0, 3]);
        assert!(pattern.row_indices_of_col(1).is_empty());
        assert_eq!(pattern.row_indices_of_col(2), &[2]);
    }

    #[test]
    fn out_of_range_entries_are_rejected() {
        let err = JacobianPattern::new(2, 1, vec![0, 1], vec![5]).unwrap_err();
        assert!(matches!(err, PatternError::RowIndexOutOfBounds { row: 5, .. }));

        let err = JacobianPattern::from_entries(2, 1, &[(0, 3)]).unwrap_err();
        assert!(matches!(err, PatternError::ColIndexOutOfBounds { col: 3, .. }));
    }

    #[test]
    fn unsorted_rows_are_rejected() {
        let err = JacobianPattern::new(3, 1, vec![0, 2], vec![2, 1]).unwrap_err();
        assert!(matches!(err, PatternError::RowIndexNotSorted { .. }));
    }
}
