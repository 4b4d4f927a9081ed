//! Nonlinear least squares solved with a Levenberg-Marquardt (LM) loop
//! and a thread-farmed forward-difference Jacobian.
//!
//! This crate minimizes `rms(f(x))` for a residual `f : R^n -> R^m`. No
//! analytic Jacobian is ever supplied; the solver measures it with one
//! perturbed evaluation per active parameter, the columns farmed out
//! round-robin to OS worker threads that are joined before each
//! iteration continues.
//!
//! How it works (high level):
//! - `J[:, k] = (f(x + h e_{v_k}) - f(x)) / h` for each active variable.
//! - Damped normal equations `(H + lambda diag(H)) d = -J^T y` solved
//!   with dense Cholesky, pivoted LU when the damped matrix is not
//!   positive definite.
//! - `lambda` divides by the gain `eta` on acceptance and multiplies on
//!   rejection; convergence combines an update cap, an error-drop ratio
//!   and a relative step size.
//!
//! Calling it:
//! - Implement [`Residual`]: a thread-safe `evaluate` plus a solution
//!   sink.
//! - Wrap it in a [`LeastSquaresProblem`] carrying the dimensions, the
//!   active subset, an optional [`JacobianPattern`] mask and the
//!   differentiation settings.
//! - Call [`LevenbergMarquardt::solve`] and inspect [`SolveStats`].
//!
//! Example:
//! ```rust,no_run
//! use lmdif_rs::{EvaluationError, LeastSquaresProblem, LevenbergMarquardt, Residual};
//!
//! struct OneD {
//!     solution: Option<Vec<f64>>,
//! }
//!
//! impl Residual for OneD {
//!     fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
//!         y[0] = x[0] - 1.0;
//!         Ok(())
//!     }
//!     fn set_solution(&mut self, x: &[f64]) -> bool {
//!         self.solution = Some(x.to_vec());
//!         true
//!     }
//! }
//!
//! let mut problem = LeastSquaresProblem::new(OneD { solution: None }, 1, 1).unwrap();
//! let stats = LevenbergMarquardt::default()
//!     .solve(&mut problem, &[0.0], None)
//!     .unwrap();
//! assert!(stats.rmse.is_finite());
//! ```

mod jacobian;
mod pattern;
mod problem;
mod report;
mod solver;
mod vectorize;

pub use jacobian::Jacobian;
pub use pattern::{JacobianPattern, PatternError};
pub use problem::{EvaluationError, LeastSquaresProblem, ProblemError, Residual};
pub use report::{IterationReport, Reporter, SolveStats, SolveStatus, StdoutReporter};
pub use solver::{LevenbergMarquardt, SolveError, Termination};
pub use vectorize::Vectorizable;
