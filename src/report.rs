use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// Why a successful solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Ratio of the last two accepted error drops fell below epsilon.
    ConvergedErrorDrop,
    /// Relative step size fell below epsilon.
    ConvergedStep,
    /// A rejected step could not be retried: the damping hit zero or the
    /// trial budget ran out.
    Stalled,
    /// Reached the accepted-update cap.
    MaxUpdates,
    /// The active set was empty; the initial guess stands.
    EmptyActiveSet,
}

/// Summary of a successful solve.
#[derive(Debug, Clone)]
pub struct SolveStats {
    /// Termination status.
    pub status: SolveStatus,
    /// Number of accepted updates.
    pub updates: usize,
    /// Final root-mean-square residual.
    pub rmse: f64,
    /// Final damping parameter.
    pub lambda: f64,
    /// Relative step size of the last trial.
    pub step_ratio: f64,
    /// Ratio of the last two accepted error drops.
    pub derr_ratio: f64,
}

/// Per-iteration diagnostics, one record per outer-loop boundary plus an
/// initial record before the first iteration (ratios NaN, damping as
/// seeded).
///
/// `step_ratio` and `derr_ratio` describe the most recent inner trial,
/// which may be the rejected one that forced termination.
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// Accepted updates so far.
    pub updates: usize,
    /// Root-mean-square residual of the best parameters.
    pub rmse: f64,
    /// Current damping parameter.
    pub lambda: f64,
    /// Relative step size, ||delta|| / ||x||.
    pub step_ratio: f64,
    /// Ratio of the last two accepted error drops.
    pub derr_ratio: f64,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Receives iteration updates from the solver.
///
/// Installing or omitting a reporter never changes the numerics.
pub trait Reporter {
    /// Called once per outer-loop boundary.
    fn on_update(&mut self, report: &IterationReport);
    /// Called once after the solver exits successfully.
    fn on_finish(&mut self) {}
}

/// Reporter that prints a UTF-8 table to stdout or the log.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    /// Create a new stdout reporter.
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_update(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("update").set_alignment(CellAlignment::Right),
            Cell::new("rmse").set_alignment(CellAlignment::Right),
            Cell::new("lambda").set_alignment(CellAlignment::Right),
            Cell::new("rel step").set_alignment(CellAlignment::Right),
            Cell::new("rel error drop").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.updates).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.6e}", row.rmse)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.lambda)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.step_ratio)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.derr_ratio)).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
