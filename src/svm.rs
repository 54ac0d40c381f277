//! Support Vector Classifier
//!
//! RBF soft-margin SVM trained one-vs-one with an SMO solver. Each binary
//! machine carries a Platt sigmoid fit on its decision values, and the
//! pairwise probabilities are coupled into one distribution per row.

use crate::bayes::TrainingSet;
use crate::config::SvmConfig;
use crate::features::AttackCategory;
use crate::{DlhaError, Result};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Floor for a non-positive curvature in the two-variable subproblem
const TAU: f64 = 1e-12;
/// Pairwise probabilities are clipped to `[MIN_PROBABILITY, 1 - MIN_PROBABILITY]`
const MIN_PROBABILITY: f64 = 1e-7;
/// Kernel row cache budget
const KERNEL_CACHE_BYTES: usize = 200 * 1024 * 1024;

/// Fitted binary machine for one class pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySvm {
    /// Class index labelled +1
    positive: usize,
    /// Class index labelled -1
    negative: usize,
    support_vectors: Array2<f64>,
    /// `alpha_i * y_i` per support vector
    coefficients: Vec<f64>,
    rho: f64,
    sigmoid_a: f64,
    sigmoid_b: f64,
}

impl BinarySvm {
    fn fit(
        x: &Array2<f64>,
        y: &[f64],
        (positive, negative): (usize, usize),
        gamma: f64,
        config: &SvmConfig,
    ) -> Self {
        let solution = solve(x, y, config.c, gamma, config.tolerance, config.max_iterations);
        if !solution.converged {
            tracing::warn!(
                "SVM pair ({}, {}) hit the iteration cap of {} before converging",
                positive,
                negative,
                config.max_iterations
            );
        }

        let decisions: Vec<f64> = y
            .iter()
            .zip(&solution.gradient)
            .map(|(yt, gt)| yt * (gt + 1.0) - solution.rho)
            .collect();
        let (sigmoid_a, sigmoid_b) = fit_sigmoid(&decisions, y);

        let support: Vec<usize> = (0..y.len()).filter(|&t| solution.alpha[t] > 0.0).collect();
        tracing::debug!(
            "SVM pair ({}, {}): {} support vectors after {} iterations",
            positive,
            negative,
            support.len(),
            solution.iterations
        );

        Self {
            positive,
            negative,
            support_vectors: x.select(Axis(0), &support),
            coefficients: support.iter().map(|&t| solution.alpha[t] * y[t]).collect(),
            rho: solution.rho,
            sigmoid_a,
            sigmoid_b,
        }
    }

    /// Signed distance proxy; positive favours `positive`
    pub fn decision_value(&self, gamma: f64, row: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .outer_iter()
            .zip(&self.coefficients)
            .map(|(sv, coef)| coef * rbf(gamma, sv, row))
            .sum::<f64>()
            - self.rho
    }

    /// Number of support vectors
    pub fn n_support(&self) -> usize {
        self.coefficients.len()
    }
}

/// One-vs-one RBF classifier with calibrated probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmClassifier {
    classes: Vec<AttackCategory>,
    gamma: f64,
    n_features: usize,
    machines: Vec<BinarySvm>,
}

impl SvmClassifier {
    /// Train one machine per class pair
    pub fn fit(dataset: &TrainingSet, config: &SvmConfig) -> Result<Self> {
        let x = dataset.records();
        let y = dataset.targets();
        let (n, d) = x.dim();
        if n == 0 {
            return Err(DlhaError::EmptyTrainingSet);
        }

        let mut classes: Vec<AttackCategory> = y.iter().copied().collect();
        classes.sort();
        classes.dedup();

        let gamma = match config.gamma {
            Some(gamma) => gamma,
            None => scale_gamma(x),
        };

        let mut machines = Vec::with_capacity(classes.len() * classes.len().saturating_sub(1) / 2);
        for p in 0..classes.len() {
            for q in (p + 1)..classes.len() {
                let rows: Vec<usize> = (0..n)
                    .filter(|&i| y[i] == classes[p] || y[i] == classes[q])
                    .collect();
                let pair_x = x.select(Axis(0), &rows);
                let pair_y: Vec<f64> = rows
                    .iter()
                    .map(|&i| if y[i] == classes[p] { 1.0 } else { -1.0 })
                    .collect();
                machines.push(BinarySvm::fit(&pair_x, &pair_y, (p, q), gamma, config));
            }
        }

        Ok(Self {
            classes,
            gamma,
            n_features: d,
            machines,
        })
    }

    /// Classes in probability order
    pub fn classes(&self) -> &[AttackCategory] {
        &self.classes
    }

    /// Input width
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Kernel width in use
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Binary machines in pair order
    pub fn machines(&self) -> &[BinarySvm] {
        &self.machines
    }

    /// Calibrated class probabilities for one row
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Result<Vec<f64>> {
        if row.len() != self.n_features {
            return Err(DlhaError::ShapeMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(DlhaError::Numerical("non-finite SVM input".into()));
        }

        let k = self.classes.len();
        if k == 1 {
            return Ok(vec![1.0]);
        }

        let mut pairwise = vec![vec![0.0; k]; k];
        for machine in &self.machines {
            let decision = machine.decision_value(self.gamma, row);
            let p = sigmoid_predict(decision, machine.sigmoid_a, machine.sigmoid_b)
                .clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY);
            pairwise[machine.positive][machine.negative] = p;
            pairwise[machine.negative][machine.positive] = 1.0 - p;
        }

        let probabilities = if k == 2 {
            vec![pairwise[0][1], pairwise[1][0]]
        } else {
            couple_pairwise(&pairwise)
        };

        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(DlhaError::Numerical("non-finite SVM probability".into()));
        }
        Ok(probabilities)
    }

    /// Structural checks for a deserialized classifier
    pub fn validate(&self) -> Result<()> {
        let k = self.classes.len();
        if k == 0 || self.machines.len() != k * (k - 1) / 2 {
            return Err(DlhaError::CorruptBundle(format!(
                "{} SVM machines for {} classes",
                self.machines.len(),
                k
            )));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(DlhaError::CorruptBundle("SVM gamma must be positive".into()));
        }
        for machine in &self.machines {
            if machine.positive >= k
                || machine.negative >= k
                || machine.support_vectors.ncols() != self.n_features
                || machine.support_vectors.nrows() != machine.coefficients.len()
            {
                return Err(DlhaError::CorruptBundle(format!(
                    "SVM machine ({}, {}) is inconsistent",
                    machine.positive, machine.negative
                )));
            }
        }
        Ok(())
    }
}

/// `1 / (n_features * var(X))`, or 1.0 for a constant matrix
fn scale_gamma(x: &Array2<f64>) -> f64 {
    let mean = x.mean().unwrap_or(0.0);
    let variance = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
    if variance > 0.0 {
        1.0 / (x.ncols() as f64 * variance)
    } else {
        1.0
    }
}

fn rbf(gamma: f64, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let distance: f64 = a.iter().zip(b.iter()).map(|(u, v)| (u - v).powi(2)).sum();
    (-gamma * distance).exp()
}

/// Kernel rows computed on demand, evicted first-in first-out
struct KernelCache<'a> {
    x: &'a Array2<f64>,
    gamma: f64,
    capacity: usize,
    rows: HashMap<usize, Rc<Vec<f64>>>,
    order: VecDeque<usize>,
}

impl<'a> KernelCache<'a> {
    fn new(x: &'a Array2<f64>, gamma: f64) -> Self {
        let capacity = (KERNEL_CACHE_BYTES / (x.nrows().max(1) * std::mem::size_of::<f64>())).max(2);
        Self {
            x,
            gamma,
            capacity,
            rows: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn row(&mut self, i: usize) -> Rc<Vec<f64>> {
        if let Some(row) = self.rows.get(&i) {
            return Rc::clone(row);
        }

        let xi = self.x.row(i);
        let row: Rc<Vec<f64>> = Rc::new(
            self.x
                .outer_iter()
                .map(|xj| rbf(self.gamma, xi, xj))
                .collect(),
        );

        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.rows.remove(&evicted);
            }
        }
        self.order.push_back(i);
        self.rows.insert(i, Rc::clone(&row));
        row
    }
}

struct Solution {
    alpha: Vec<f64>,
    gradient: Vec<f64>,
    rho: f64,
    iterations: usize,
    converged: bool,
}

/// SMO on the C-SVC dual with second-order working set selection
fn solve(
    x: &Array2<f64>,
    y: &[f64],
    c: f64,
    gamma: f64,
    tolerance: f64,
    max_iterations: usize,
) -> Solution {
    let n = y.len();
    let mut alpha = vec![0.0; n];
    let mut gradient = vec![-1.0; n];
    let mut cache = KernelCache::new(x, gamma);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        let Some((i, j)) = select_working_set(&mut cache, y, &alpha, &gradient, c, tolerance) else {
            converged = true;
            break;
        };
        iterations += 1;

        let ki = cache.row(i);
        let kj = cache.row(j);
        let (old_i, old_j) = (alpha[i], alpha[j]);
        let quad = curvature(ki[j]);

        if y[i] != y[j] {
            let delta = (-gradient[i] - gradient[j]) / quad;
            let diff = alpha[i] - alpha[j];
            alpha[i] += delta;
            alpha[j] += delta;

            if diff > 0.0 {
                if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = diff;
                }
            } else if alpha[i] < 0.0 {
                alpha[i] = 0.0;
                alpha[j] = -diff;
            }
            if diff > 0.0 {
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = c - diff;
                }
            } else if alpha[j] > c {
                alpha[j] = c;
                alpha[i] = c + diff;
            }
        } else {
            let delta = (gradient[i] - gradient[j]) / quad;
            let sum = alpha[i] + alpha[j];
            alpha[i] -= delta;
            alpha[j] += delta;

            if sum > c {
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = sum - c;
                }
            } else if alpha[j] < 0.0 {
                alpha[j] = 0.0;
                alpha[i] = sum;
            }
            if sum > c {
                if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = sum - c;
                }
            } else if alpha[i] < 0.0 {
                alpha[i] = 0.0;
                alpha[j] = sum;
            }
        }

        let (delta_i, delta_j) = (alpha[i] - old_i, alpha[j] - old_j);
        for t in 0..n {
            gradient[t] += y[t] * (y[i] * ki[t] * delta_i + y[j] * kj[t] * delta_j);
        }
    }

    let rho = compute_rho(y, &alpha, &gradient, c);
    Solution {
        alpha,
        gradient,
        rho,
        iterations,
        converged,
    }
}

/// `K_ii + K_jj - 2 K_ij` for a unit-diagonal kernel
fn curvature(k_ij: f64) -> f64 {
    let quad = 2.0 - 2.0 * k_ij;
    if quad > 0.0 {
        quad
    } else {
        TAU
    }
}

/// Most violating pair, or `None` once the KKT gap is below tolerance
fn select_working_set(
    cache: &mut KernelCache<'_>,
    y: &[f64],
    alpha: &[f64],
    gradient: &[f64],
    c: f64,
    tolerance: f64,
) -> Option<(usize, usize)> {
    let mut gmax = f64::NEG_INFINITY;
    let mut selected = None;
    for t in 0..y.len() {
        if y[t] > 0.0 {
            if alpha[t] < c && -gradient[t] >= gmax {
                gmax = -gradient[t];
                selected = Some(t);
            }
        } else if alpha[t] > 0.0 && gradient[t] >= gmax {
            gmax = gradient[t];
            selected = Some(t);
        }
    }
    let i = selected?;
    let ki = cache.row(i);

    let mut gmax2 = f64::NEG_INFINITY;
    let mut best = f64::INFINITY;
    let mut partner = None;
    for t in 0..y.len() {
        let (violation, grad_diff) = if y[t] > 0.0 {
            if alpha[t] <= 0.0 {
                continue;
            }
            (gradient[t], gmax + gradient[t])
        } else {
            if alpha[t] >= c {
                continue;
            }
            (-gradient[t], gmax - gradient[t])
        };
        gmax2 = gmax2.max(violation);

        if grad_diff > 0.0 {
            let objective = -(grad_diff * grad_diff) / curvature(ki[t]);
            if objective <= best {
                best = objective;
                partner = Some(t);
            }
        }
    }

    if gmax + gmax2 < tolerance {
        return None;
    }
    partner.map(|j| (i, j))
}

fn compute_rho(y: &[f64], alpha: &[f64], gradient: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free = 0usize;
    let mut free_sum = 0.0;

    for t in 0..y.len() {
        let yg = y[t] * gradient[t];
        if alpha[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            free += 1;
            free_sum += yg;
        }
    }

    if free > 0 {
        free_sum / free as f64
    } else {
        (upper + lower) / 2.0
    }
}

/// Platt scaling by Newton's method with backtracking line search
fn fit_sigmoid(decisions: &[f64], y: &[f64]) -> (f64, f64) {
    const MAX_ITERATIONS: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const SIGMA: f64 = 1e-12;
    const EPS: f64 = 1e-5;

    let positives = y.iter().filter(|&&v| v > 0.0).count() as f64;
    let negatives = y.len() as f64 - positives;
    let hi_target = (positives + 1.0) / (positives + 2.0);
    let lo_target = 1.0 / (negatives + 2.0);
    let targets: Vec<f64> = y
        .iter()
        .map(|&v| if v > 0.0 { hi_target } else { lo_target })
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(f, t)| {
                let fapb = f * a + b;
                if fapb >= 0.0 {
                    t * fapb + (-fapb).exp().ln_1p()
                } else {
                    (t - 1.0) * fapb + fapb.exp().ln_1p()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((negatives + 1.0) / (positives + 1.0)).ln();
    let mut fval = objective(a, b);

    for _ in 0..MAX_ITERATIONS {
        let (mut h11, mut h22, mut h21, mut g1, mut g2) = (SIGMA, SIGMA, 0.0, 0.0, 0.0);
        for (f, t) in decisions.iter().zip(&targets) {
            let fapb = f * a + b;
            let (p, q) = if fapb >= 0.0 {
                let e = (-fapb).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = fapb.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }

        if g1.abs() < EPS && g2.abs() < EPS {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= MIN_STEP {
            let (new_a, new_b) = (a + step * da, b + step * db);
            let new_f = objective(new_a, new_b);
            if new_f < fval + 1e-4 * step * gd {
                a = new_a;
                b = new_b;
                fval = new_f;
                break;
            }
            step /= 2.0;
        }
        if step < MIN_STEP {
            tracing::debug!("Platt line search stalled at A={:.4} B={:.4}", a, b);
            break;
        }
    }

    (a, b)
}

/// `P(positive | f) = 1 / (1 + exp(A f + B))`
fn sigmoid_predict(decision: f64, a: f64, b: f64) -> f64 {
    let fapb = decision * a + b;
    if fapb >= 0.0 {
        let e = (-fapb).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + fapb.exp())
    }
}

/// Couple pairwise estimates `r[i][j] ~ P(i | i or j)` into class
/// probabilities (Wu, Lin and Weng, method 2)
fn couple_pairwise(r: &[Vec<f64>]) -> Vec<f64> {
    let k = r.len();
    let max_iterations = k.max(100);
    let eps = 0.005 / k as f64;

    let mut q = vec![vec![0.0; k]; k];
    for t in 0..k {
        for j in 0..k {
            if j == t {
                continue;
            }
            q[t][t] += r[j][t] * r[j][t];
            q[t][j] = -r[j][t] * r[t][j];
        }
    }

    let mut p = vec![1.0 / k as f64; k];
    let mut qp = vec![0.0; k];
    for _ in 0..max_iterations {
        let mut pqp = 0.0;
        for t in 0..k {
            qp[t] = (0..k).map(|j| q[t][j] * p[j]).sum();
            pqp += p[t] * qp[t];
        }

        let max_error = qp
            .iter()
            .map(|v| (v - pqp).abs())
            .fold(0.0_f64, f64::max);
        if max_error < eps {
            break;
        }

        for t in 0..k {
            let diff = (-qp[t] + pqp) / q[t][t];
            p[t] += diff;
            pqp = (pqp + diff * (diff * q[t][t] + 2.0 * qp[t])) / (1.0 + diff) / (1.0 + diff);
            for j in 0..k {
                qp[j] = (qp[j] + diff * q[t][j]) / (1.0 + diff);
                p[j] /= 1.0 + diff;
            }
        }
    }
    p
}
