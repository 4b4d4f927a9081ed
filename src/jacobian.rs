use std::thread;

use crate::problem::{EvaluationError, LeastSquaresProblem, Residual};

/// Dense column-major Jacobian over the active parameters.
///
/// Column `k` belongs to the `k`-th entry of the problem's active set;
/// rows follow the residual order.
#[derive(Debug, Clone)]
pub struct Jacobian {
    nrows: usize,
    ncols: usize,
    values: Vec<f64>,
}

impl Jacobian {
    fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: vec![0.0; nrows * ncols],
        }
    }

    /// Number of residuals.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of active parameters.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Column `k`, aligned with the `k`-th active parameter.
    pub fn col(&self, col: usize) -> &[f64] {
        &self.values[col * self.nrows..(col + 1) * self.nrows]
    }

    /// Single entry.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[col * self.nrows + row]
    }
}

/// One differentiation work item: a variable of the full parameter space
/// together with the Jacobian column it owns exclusively. `x` and `y`
/// travel as shared read-only references.
struct ColumnSlice<'a> {
    var: usize,
    rows: Option<&'a [usize]>,
    col: &'a mut [f64],
}

/// Measure `J[:, k] = (f(x + h e_{v_k}) - y) / h` for every active
/// variable `v_k`, reusing `y = f(x)` from the caller.
///
/// Columns are assigned round-robin to the problem's worker count and
/// computed on scoped OS threads, all joined before this returns. The
/// first worker failure in spawn order is reported; columns whose mask
/// is empty are skipped and stay zero.
pub(crate) fn forward_difference<R: Residual>(
    problem: &LeastSquaresProblem<R>,
    x: &[f64],
    y: &[f64],
) -> Result<Jacobian, EvaluationError> {
    let m = problem.conds();
    let active = problem.active();
    let n = active.len();
    let h = problem.diff_step();

    let mut jacobian = Jacobian::zeros(m, n);

    let workers = problem.diff_threads().min(n.max(1));
    let mut batches: Vec<Vec<ColumnSlice<'_>>> = (0..workers).map(|_| Vec::new()).collect();
    for (k, (&var, col)) in active.iter().zip(jacobian.values.chunks_mut(m)).enumerate() {
        let rows = problem.pattern().map(|p| p.row_indices_of_col(var));
        if rows.is_some_and(|r| r.is_empty()) {
            continue;
        }
        batches[k % workers].push(ColumnSlice { var, rows, col });
    }

    let results: Vec<Result<(), EvaluationError>> = thread::scope(|scope| {
        let handles: Vec<_> = batches
            .into_iter()
            .filter(|batch| !batch.is_empty())
            .map(|batch| scope.spawn(move || diff_worker(problem, x, y, h, batch)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    // Every worker has joined; surface the first failure in spawn order.
    for result in results {
        result?;
    }

    Ok(jacobian)
}

fn diff_worker<R: Residual>(
    problem: &LeastSquaresProblem<R>,
    x: &[f64],
    y: &[f64],
    h: f64,
    batch: Vec<ColumnSlice<'_>>,
) -> Result<(), EvaluationError> {
    // The worker owns its perturbed copy of x and its evaluation buffer.
    let mut x_pert = x.to_vec();
    let mut y_pert = vec![0.0; y.len()];
    for slice in batch {
        x_pert.copy_from_slice(x);
        x_pert[slice.var] += h;
        problem.evaluate(&x_pert, &mut y_pert)?;
        match slice.rows {
            None => {
                for (out, (&fp, &f0)) in slice.col.iter_mut().zip(y_pert.iter().zip(y)) {
                    *out = (fp - f0) / h;
                }
            }
            Some(rows) => {
                for &row in rows {
                    slice.col[row] = (y_pert[row] - y[row]) / h;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::JacobianPattern;

    struct Curved;

    impl Residual for Curved {
        fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
            y[0] = x[0] * x[1];
            y[1] = x[1].sin() + x[2];
            y[2] = x[0] * x[0] - x[2] * x[1];
            y[3] = x[0] + 2.0 * x[1] + 3.0 * x[2];
            Ok(())
        }

        fn set_solution(&mut self, _x: &[f64]) -> bool {
            true
        }
    }

    fn fixture(threads: usize) -> LeastSquaresProblem<Curved> {
        LeastSquaresProblem::new(Curved, 3, 4)
            .unwrap()
            .with_diff_step(1e-7)
            .with_diff_threads(threads)
    }

    /// Sequential rendition of the same formula, column by column.
    fn reference(problem: &LeastSquaresProblem<Curved>, x: &[f64], y: &[f64]) -> Vec<f64> {
        let m = problem.conds();
        let h = problem.diff_step();
        let mut j = vec![0.0; m * problem.active().len()];
        let mut x_pert = x.to_vec();
        let mut y_pert = vec![0.0; m];
        for (k, &var) in problem.active().iter().enumerate() {
            x_pert.copy_from_slice(x);
            x_pert[var] += h;
            problem.evaluate(&x_pert, &mut y_pert).unwrap();
            for i in 0..m {
                j[k * m + i] = (y_pert[i] - y[i]) / h;
            }
        }
        j
    }

    #[test]
    fn worker_count_does_not_change_the_bits() {
        let x = [0.3, -1.1, 2.0];
        let mut y = [0.0; 4];
        for threads in [1, 4, 16] {
            let problem = fixture(threads);
            problem.evaluate(&x, &mut y).unwrap();
            let jac = problem.jacobian(&x, &y).unwrap();
            let expected = reference(&problem, &x, &y);
            for col in 0..jac.ncols() {
                for row in 0..jac.nrows() {
                    let want = expected[col * jac.nrows() + row];
                    assert!(
                        jac.get(row, col).to_bits() == want.to_bits(),
                        "entry ({row}, {col}) differs with {threads} workers"
                    );
                }
            }
        }
    }

    #[test]
    fn active_order_selects_columns() {
        let x = [0.3, -1.1, 2.0];
        let mut y = [0.0; 4];
        let mut problem = fixture(2);
        problem.evaluate(&x, &mut y).unwrap();
        let full = reference(&problem, &x, &y);

        problem.set_active(vec![2, 0]).unwrap();
        let jac = problem.jacobian(&x, &y).unwrap();
        assert_eq!(jac.ncols(), 2);
        for row in 0..4 {
            assert_eq!(jac.get(row, 0), full[2 * 4 + row]);
            assert_eq!(jac.get(row, 1), full[row]);
        }
    }

    #[test]
    fn masked_entries_stay_zero() {
        let x = [0.3, -1.1, 2.0];
        let mut y = [0.0; 4];
        // The residual responds almost everywhere; the mask keeps two
        // entries per column at most and blanks column 2 entirely.
        let pattern = JacobianPattern::from_entries(4, 3, &[(0, 0), (2, 0), (1, 1)]).unwrap();
        let problem = fixture(2);
        problem.evaluate(&x, &mut y).unwrap();
        let full = reference(&problem, &x, &y);

        let masked = fixture(2).with_pattern(pattern).unwrap();
        let jac = masked.jacobian(&x, &y).unwrap();
        for (row, col) in [(0usize, 0usize), (2, 0), (1, 1)] {
            assert_eq!(jac.get(row, col), full[col * 4 + row]);
        }
        for (row, col) in [(1, 0), (3, 0), (0, 1), (3, 1), (0, 2), (1, 2), (2, 2), (3, 2)] {
            assert_eq!(jac.get(row, col), 0.0);
        }
    }

    struct Picky {
        base: Vec<f64>,
    }

    impl Residual for Picky {
        fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
            let perturbed = x
                .iter()
                .zip(&self.base)
                .position(|(a, b)| a.to_bits() != b.to_bits());
            match perturbed {
                Some(0) => Err(EvaluationError::undefined("zero")),
                Some(1) => Err(EvaluationError::undefined("one")),
                _ => {
                    y.fill(0.0);
                    Ok(())
                }
            }
        }

        fn set_solution(&mut self, _x: &[f64]) -> bool {
            true
        }
    }

    #[test]
    fn first_failure_in_spawn_order_wins() {
        let base = vec![0.5, 1.5, 2.5, 3.5];
        let problem = LeastSquaresProblem::new(Picky { base: base.clone() }, 4, 2)
            .unwrap()
            .with_diff_threads(2);
        let mut y = [0.0; 2];
        problem.evaluate(&base, &mut y).unwrap();

        // Worker 0 holds columns {0, 2} and fails on variable 0; worker 1
        // holds {1, 3} and fails on variable 1. Spawn order picks 0.
        let err = problem.jacobian(&base, &y).unwrap_err();
        match err {
            EvaluationError::Undefined { detail } => assert_eq!(detail, "zero"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
