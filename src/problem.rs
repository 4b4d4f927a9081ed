use core::fmt;

use crate::jacobian::{self, Jacobian};
use crate::pattern::JacobianPattern;
use crate::vectorize::Vectorizable;

/// Errors while configuring a least-squares problem.
#[derive(Debug, Clone)]
pub enum ProblemError {
    /// The problem has zero parameters or zero residuals.
    InvalidDimensions { vars: usize, conds: usize },
    /// An active-set index is outside the parameter space.
    ActiveOutOfRange { index: usize, vars: usize },
    /// The sparsity mask shape does not match (conds, vars).
    PatternShape {
        nrows: usize,
        ncols: usize,
        conds: usize,
        vars: usize,
    },
}

impl fmt::Display for ProblemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions { vars, conds } => {
                write!(f, "invalid dimensions: vars={vars}, conds={conds}")
            }
            Self::ActiveOutOfRange { index, vars } => {
                write!(f, "active index {index} exceeds parameter count {vars}")
            }
            Self::PatternShape {
                nrows,
                ncols,
                conds,
                vars,
            } => {
                write!(
                    f,
                    "mask shape ({nrows}, {ncols}) does not match ({conds}, {vars})"
                )
            }
        }
    }
}

impl std::error::Error for ProblemError {}

/// The residual could not be evaluated.
#[derive(Debug, Clone)]
pub enum EvaluationError {
    /// The residual is ill-defined at the requested point.
    Undefined { detail: String },
    /// A `Vectorizable` refused to store its parameters.
    Vectorize,
}

impl EvaluationError {
    /// Convenience constructor for implementors of [`Residual`].
    pub fn undefined(detail: impl Into<String>) -> Self {
        Self::Undefined {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined { detail } => write!(f, "residual undefined: {detail}"),
            Self::Vectorize => write!(f, "vectorisation failed"),
        }
    }
}

impl std::error::Error for EvaluationError {}

/// A residual model the solver can minimize.
///
/// `evaluate` must be a pure function of `x`: side-effect-free, reentrant
/// and safe to call from several differentiation workers at once (`&self`
/// plus the `Sync` bound make that checkable). An error signals an
/// ill-defined residual and aborts the surrounding solve.
pub trait Residual: Sync {
    /// Fill `y` with the residuals at `x` (`|x| = vars`, `|y| = conds`).
    fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError>;

    /// One-shot sink for the accepted parameters, written on successful
    /// termination only. Returning false fails the solve.
    fn set_solution(&mut self, x: &[f64]) -> bool;
}

/// A residual model plus the configuration the solver and the
/// differentiation engine read: dimensions, the active subset, the
/// optional sparsity mask and the forward-difference settings.
///
/// The configuration is immutable for the duration of one solve; the
/// solver itself works in the reduced space of the active parameters
/// while `evaluate` always sees the full vector.
#[derive(Debug)]
pub struct LeastSquaresProblem<R> {
    residual: R,
    vars: usize,
    conds: usize,
    active: Vec<usize>,
    pattern: Option<JacobianPattern>,
    diff_step: f64,
    diff_threads: usize,
}

impl<R: Residual> LeastSquaresProblem<R> {
    /// Wrap a residual model with `vars` parameters and `conds` residuals.
    ///
    /// All parameters start active; differentiation defaults to a step of
    /// `1e-6` and one worker per hardware thread.
    pub fn new(residual: R, vars: usize, conds: usize) -> Result<Self, ProblemError> {
        if vars == 0 || conds == 0 {
            return Err(ProblemError::InvalidDimensions { vars, conds });
        }
        Ok(Self {
            residual,
            vars,
            conds,
            active: (0..vars).collect(),
            pattern: None,
            diff_step: 1e-6,
            diff_threads: hardware_concurrency(),
        })
    }

    /// Set the forward-difference perturbation (must be positive).
    pub fn with_diff_step(mut self, step: f64) -> Self {
        assert!(step > 0.0, "differentiation step must be positive");
        self.diff_step = step;
        self
    }

    /// Set the differentiation worker count.
    pub fn with_diff_threads(mut self, threads: usize) -> Self {
        self.diff_threads = threads.max(1);
        self
    }

    /// Attach a sparsity mask of shape `(conds, vars)`.
    ///
    /// Masked-out Jacobian entries are never evaluated and stay zero.
    pub fn with_pattern(mut self, pattern: JacobianPattern) -> Result<Self, ProblemError> {
        if pattern.nrows() != self.conds || pattern.ncols() != self.vars {
            return Err(ProblemError::PatternShape {
                nrows: pattern.nrows(),
                ncols: pattern.ncols(),
                conds: self.conds,
                vars: self.vars,
            });
        }
        self.pattern = Some(pattern);
        Ok(self)
    }

    /// Replace the active set.
    ///
    /// Order is kept; each index selects a parameter the solver may
    /// perturb, everything else stays frozen.
    pub fn set_active(&mut self, indices: Vec<usize>) -> Result<(), ProblemError> {
        for &index in &indices {
            if index >= self.vars {
                return Err(ProblemError::ActiveOutOfRange {
                    index,
                    vars: self.vars,
                });
            }
        }
        self.active = indices;
        Ok(())
    }

    /// Full parameter-space dimension.
    pub fn vars(&self) -> usize {
        self.vars
    }

    /// Residual dimension.
    pub fn conds(&self) -> usize {
        self.conds
    }

    /// Parameters the solver may perturb, in order.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    /// The sparsity mask, if any.
    pub fn pattern(&self) -> Option<&JacobianPattern> {
        self.pattern.as_ref()
    }

    /// Forward-difference perturbation.
    pub fn diff_step(&self) -> f64 {
        self.diff_step
    }

    /// Differentiation worker count.
    pub fn diff_threads(&self) -> usize {
        self.diff_threads
    }

    /// The wrapped residual model.
    pub fn residual(&self) -> &R {
        &self.residual
    }

    /// Mutable access to the wrapped residual model.
    pub fn residual_mut(&mut self) -> &mut R {
        &mut self.residual
    }

    /// Evaluate the residuals at `x`.
    pub fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
        debug_assert_eq!(x.len(), self.vars);
        debug_assert_eq!(y.len(), self.conds);
        self.residual.evaluate(x, y)
    }

    /// Evaluate at the parameters stored by a [`Vectorizable`] object.
    pub fn evaluate_object(
        &self,
        object: &impl Vectorizable,
        y: &mut [f64],
    ) -> Result<(), EvaluationError> {
        let mut x = Vec::with_capacity(object.dim());
        if !object.store(&mut x) || x.len() != self.vars {
            log::error!("vectorisation failed");
            return Err(EvaluationError::Vectorize);
        }
        self.evaluate(&x, y)
    }

    /// Add a reduced-space step into the active coordinates of `x0`.
    ///
    /// `delta` has one entry per active parameter; inactive coordinates
    /// are copied unchanged.
    pub fn apply_update(&self, x0: &[f64], delta: &[f64]) -> Vec<f64> {
        debug_assert_eq!(delta.len(), self.active.len());
        let mut x = x0.to_vec();
        for (&d, &var) in delta.iter().zip(&self.active) {
            x[var] += d;
        }
        x
    }

    /// Measure the reduced Jacobian at `x` by parallel forward
    /// differences, reusing the residuals `y = f(x)`.
    pub fn jacobian(&self, x: &[f64], y: &[f64]) -> Result<Jacobian, EvaluationError> {
        jacobian::forward_difference(self, x, y)
    }

    /// Write the accepted solution into the residual model.
    pub fn set_solution(&mut self, x: &[f64]) -> bool {
        self.residual.set_solution(x)
    }
}

fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
