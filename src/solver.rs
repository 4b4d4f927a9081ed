use core::fmt;

use std::time::{Duration, Instant};

use faer::prelude::*;
use faer::{Mat, Side};

use crate::jacobian::Jacobian;
use crate::problem::{EvaluationError, LeastSquaresProblem, Residual};
use crate::report::{emit_line, IterationReport, Reporter, SolveStats, SolveStatus, StdoutReporter};

/// Errors that abort a solve.
///
/// Reaching the update cap is not one of them; it is a normal outcome
/// reported as [`SolveStatus::MaxUpdates`].
#[derive(Debug, Clone)]
pub enum SolveError {
    /// The initial guess has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// The residual failed to evaluate; the first observed failure wins.
    Evaluation(EvaluationError),
    /// A zero appeared on diag(J^T J) or the proposed step is non-finite.
    IllPosed { unresponsive: Vec<usize> },
    /// More active parameters than residuals.
    Underdetermined { conds: usize, active: usize },
    /// The solution sink refused the final parameters.
    SolutionRejected,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "x length {actual} does not match expected {expected}")
            }
            Self::Evaluation(err) => write!(f, "residual evaluation failed: {err}"),
            Self::IllPosed { unresponsive } if unresponsive.is_empty() => {
                write!(f, "problem ill-posed: non-finite step")
            }
            Self::IllPosed { unresponsive } => {
                write!(
                    f,
                    "problem ill-posed: {} unresponsive parameter(s)",
                    unresponsive.len()
                )
            }
            Self::Underdetermined { conds, active } => {
                write!(f, "{active} active parameters exceed {conds} residuals")
            }
            Self::SolutionRejected => write!(f, "error setting solution"),
        }
    }
}

impl std::error::Error for SolveError {}

impl From<EvaluationError> for SolveError {
    fn from(err: EvaluationError) -> Self {
        Self::Evaluation(err)
    }
}

/// Stopping thresholds.
///
/// `max_count` is one shared hard cap for accepted updates and for inner
/// rejection trials; `epsilon` is one shared relative threshold for the
/// error-drop ratio and the step-size ratio.
#[derive(Debug, Clone)]
pub struct Termination {
    /// Hard iteration cap.
    pub max_count: usize,
    /// Relative convergence threshold.
    pub epsilon: f64,
}

impl Default for Termination {
    fn default() -> Self {
        Self {
            max_count: 100,
            epsilon: 1e-8,
        }
    }
}

/// Damped Gauss-Newton (Levenberg-Marquardt) driver.
///
/// A negative `lambda` asks the solver to seed the damping from
/// `mean(diag(J^T J))` on the first iteration. `eta` must exceed 1; the
/// damping divides by it on acceptance and multiplies on rejection.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Damping seed; negative means automatic.
    pub lambda: f64,
    /// Gain factor applied to the damping.
    pub eta: f64,
    /// Stopping thresholds.
    pub term: Termination,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda: -1.0,
            eta: 10.0,
            term: Termination::default(),
            verbose: false,
        }
    }
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl LevenbergMarquardt {
    /// Minimize `rms(f(x))` from `x0`, writing the accepted parameters
    /// through the problem's solution sink on success.
    ///
    /// No partial results are published on error; the sink is only
    /// written on `Ok`.
    pub fn solve<R: Residual>(
        &self,
        problem: &mut LeastSquaresProblem<R>,
        x0: &[f64],
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolveStats, SolveError> {
        assert!(self.eta > 1.0, "gain factor must exceed 1");

        if x0.len() != problem.vars() {
            return Err(SolveError::DimensionMismatch {
                expected: problem.vars(),
                actual: x0.len(),
            });
        }
        let m = problem.conds();
        let n = problem.active().len();
        if n > m {
            return Err(SolveError::Underdetermined { conds: m, active: n });
        }

        let start_time = self.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, self.verbose);

        let mut lambda = self.lambda;
        let mut converged: Option<SolveStatus> = None;
        let mut derr: Vec<f64> = Vec::new();

        let mut x_best = x0.to_vec();
        let mut y_best = vec![0.0; m];
        problem.evaluate(&x_best, &mut y_best)?;
        let mut e_best = rms(&y_best);
        if !e_best.is_finite() {
            return Err(SolveError::Evaluation(EvaluationError::undefined(
                "non-finite residual at the initial guess",
            )));
        }

        let mut updates = 0usize;
        let mut step_ratio = f64::NAN;
        let mut derr_ratio = f64::NAN;

        if let Some(r) = reporter.as_mut() {
            r.on_update(&IterationReport {
                updates,
                rmse: e_best,
                lambda,
                step_ratio,
                derr_ratio,
            });
        }

        // Nothing to perturb: the initial guess already stands.
        if n == 0 {
            if !problem.set_solution(&x_best) {
                log::error!("error setting solution");
                return Err(SolveError::SolutionRejected);
            }
            let stats = SolveStats {
                status: SolveStatus::EmptyActiveSet,
                updates,
                rmse: e_best,
                lambda,
                step_ratio,
                derr_ratio,
            };
            return Ok(finish(stats, start_time, &mut reporter));
        }

        let status = loop {
            if let Some(status) = converged {
                break status;
            }

            let jac = problem.jacobian(&x_best, &y_best)?;

            // H = J^T J approximates the Hessian; g = J^T y is the gradient.
            let (hess, grad) = normal_equations(&jac, &y_best);

            if lambda < 0.0 {
                lambda = mean_diag(&hess, n);
            }

            let mut better = false;
            let mut trials = 0usize;

            while !better && converged.is_none() {
                // Augmented normal equations with Marquardt's diag(H) scaling.
                let delta = solve_damped(&hess, &grad, n, lambda);

                let x_try = problem.apply_update(&x_best, &delta);
                let mut y_try = vec![0.0; m];
                problem.evaluate(&x_try, &mut y_try)?;

                let e_try = rms(&y_try);
                let de = e_best - e_try;

                better = de > 0.0;
                trials += 1;

                if better {
                    // Accept the update.
                    lambda /= self.eta;
                    x_best = x_try;
                    y_best = y_try;
                    e_best = e_try;
                    derr.push(de);
                    updates += 1;
                } else {
                    // Reject the update.
                    lambda *= self.eta;
                }

                // derr only grows on acceptance, so during a rejection
                // streak this ratio keeps comparing the last two accepts.
                derr_ratio = if derr.len() > 1 {
                    derr[derr.len() - 1] / derr[derr.len() - 2]
                } else {
                    1.0
                };
                let step_norm = norm2(&delta);
                step_ratio = step_norm / norm2(&x_best);

                if updates >= self.term.max_count {
                    converged = Some(SolveStatus::MaxUpdates);
                } else if updates > 1 && derr_ratio < self.term.epsilon {
                    converged = Some(SolveStatus::ConvergedErrorDrop);
                } else if updates > 1 && step_ratio < self.term.epsilon {
                    converged = Some(SolveStatus::ConvergedStep);
                } else if !better && (lambda == 0.0 || trials >= self.term.max_count) {
                    converged = Some(SolveStatus::Stalled);
                }

                // A parameter no residual responds to leaves a zero on
                // diag(H) and makes the damped system singular.
                let mut unresponsive = Vec::new();
                for d in 0..n {
                    if hess[d * n + d] == 0.0 {
                        let var = problem.active()[d];
                        log::warn!("change of parameter {var} not responsive");
                        unresponsive.push(var);
                    }
                }
                if !unresponsive.is_empty() || !step_norm.is_finite() {
                    log::error!("problem ill-posed");
                    return Err(SolveError::IllPosed { unresponsive });
                }
            }

            if let Some(r) = reporter.as_mut() {
                r.on_update(&IterationReport {
                    updates,
                    rmse: e_best,
                    lambda,
                    step_ratio,
                    derr_ratio,
                });
            }
        };

        if !problem.set_solution(&x_best) {
            log::error!("error setting solution");
            return Err(SolveError::SolutionRejected);
        }

        let stats = SolveStats {
            status,
            updates,
            rmse: e_best,
            lambda,
            step_ratio,
            derr_ratio,
        };
        Ok(finish(stats, start_time, &mut reporter))
    }
}

fn finish(stats: SolveStats, start_time: Option<Instant>, reporter: &mut ReporterSlot<'_>) -> SolveStats {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("time: {elapsed}"));
    }
    stats
}

/// Dense `H = J^T J` and `g = J^T y` from the column-major Jacobian.
fn normal_equations(jac: &Jacobian, y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = jac.ncols();
    let mut hess = vec![0.0; n * n];
    let mut grad = vec![0.0; n];
    for a in 0..n {
        let col_a = jac.col(a);
        grad[a] = dot(col_a, y);
        for b in a..n {
            let v = dot(col_a, jac.col(b));
            hess[b * n + a] = v;
            hess[a * n + b] = v;
        }
    }
    (hess, grad)
}

/// Solve `(H + lambda diag(H)) delta = -g`, preferring Cholesky and
/// falling back to a pivoted LU when the damped matrix is not positive
/// definite.
fn solve_damped(hess: &[f64], grad: &[f64], n: usize, lambda: f64) -> Vec<f64> {
    let a = Mat::from_fn(n, n, |i, j| {
        let v = hess[j * n + i];
        if i == j {
            v + lambda * v
        } else {
            v
        }
    });
    let rhs = Mat::from_fn(n, 1, |i, _| -grad[i]);
    let solution = match a.as_ref().cholesky(Side::Lower) {
        Ok(llt) => llt.solve(&rhs),
        Err(_) => a.as_ref().partial_piv_lu().solve(&rhs),
    };
    (0..n).map(|i| solution.read(i, 0)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

fn norm2(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

fn rms(v: &[f64]) -> f64 {
    (dot(v, v) / v.len() as f64).sqrt()
}

fn mean_diag(hess: &[f64], n: usize) -> f64 {
    let mut sum = 0.0;
    for d in 0..n {
        sum += hess[d * n + d];
    }
    sum / n as f64
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}
