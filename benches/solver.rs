use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lmdif_rs::{EvaluationError, LeastSquaresProblem, LevenbergMarquardt, Residual};

struct Rosenbrock;

impl Residual for Rosenbrock {
    fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
        y[0] = 10.0 * (x[1] - x[0] * x[0]);
        y[1] = 1.0 - x[0];
        Ok(())
    }

    fn set_solution(&mut self, _x: &[f64]) -> bool {
        true
    }
}

/// Sum of Gaussians sampled on a grid; wide enough that measuring the
/// Jacobian dominates a solve.
struct GaussianMixture {
    ts: Vec<f64>,
    data: Vec<f64>,
}

fn mixture_model(x: &[f64], t: f64) -> f64 {
    x.chunks_exact(3)
        .map(|p| {
            let dt = t - p[1];
            p[0] * (-dt * dt / (p[2] * p[2] + 1e-12)).exp()
        })
        .sum()
}

fn mixture_truth(components: usize) -> Vec<f64> {
    let mut x = Vec::with_capacity(3 * components);
    for c in 0..components {
        let center = (c as f64 + 0.5) / components as f64;
        x.extend_from_slice(&[1.0 + 0.1 * c as f64, center, 0.08]);
    }
    x
}

impl GaussianMixture {
    fn new(samples: usize, components: usize) -> Self {
        let ts: Vec<f64> = (0..samples).map(|i| i as f64 / samples as f64).collect();
        let truth = mixture_truth(components);
        let data = ts.iter().map(|&t| mixture_model(&truth, t)).collect();
        Self { ts, data }
    }
}

impl Residual for GaussianMixture {
    fn evaluate(&self, x: &[f64], y: &mut [f64]) -> Result<(), EvaluationError> {
        for (i, (&t, &d)) in self.ts.iter().zip(&self.data).enumerate() {
            y[i] = mixture_model(x, t) - d;
        }
        Ok(())
    }

    fn set_solution(&mut self, _x: &[f64]) -> bool {
        true
    }
}

fn bench_rosenbrock_solve(c: &mut Criterion) {
    c.bench_function("rosenbrock_forward_difference_solve", |b| {
        b.iter(|| {
            let mut problem = LeastSquaresProblem::new(Rosenbrock, 2, 2)
                .unwrap()
                .with_diff_step(1e-8)
                .with_diff_threads(1);
            let stats = LevenbergMarquardt::default()
                .solve(&mut problem, &[-1.2, 1.0], None)
                .unwrap();
            black_box(stats);
        });
    });
}

fn bench_jacobian_threads(c: &mut Criterion) {
    let samples = 512;
    let components = 8;
    let vars = 3 * components;

    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut x0 = mixture_truth(components);
    for v in x0.iter_mut() {
        *v *= 1.05;
    }

    for threads in [1, hardware] {
        let problem = LeastSquaresProblem::new(GaussianMixture::new(samples, components), vars, samples)
            .unwrap()
            .with_diff_step(1e-7)
            .with_diff_threads(threads);
        let mut y = vec![0.0; samples];
        problem.evaluate(&x0, &mut y).unwrap();

        c.bench_function(&format!("jacobian_{samples}x{vars}_threads_{threads}"), |b| {
            b.iter(|| {
                let jac = problem.jacobian(&x0, &y).unwrap();
                black_box(jac);
            });
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1000));
    targets = bench_rosenbrock_solve, bench_jacobian_threads
}
criterion_main!(benches);
