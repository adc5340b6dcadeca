//! # 有界 Levenberg-Marquardt 最小二乘
//!
//! 最小化 `½ Σ (f(xᵢ; p) − yᵢ)²`，参数受盒约束 `lower ≤ p ≤ upper`。
//!
//! ## 算法要点
//! - 前向差分 Jacobian（参数贴近上界时改用后向差分）
//! - Marquardt 对角缩放：阻尼项使用历史最大的 JᵀJ 对角元
//! - 活动约束：位于边界且梯度指向界外的参数本次迭代固定
//! - 试探步投影回盒内
//! - 收敛判据：代价相对下降 ≤ tol，或步长相对参数范数 ≤ tol
//!
//! 求解器不直接打印任何内容，诊断信息写入 `FitReport::diagnostics`，
//! 由调用方决定转发或记录。
//!
//! ## 依赖关系
//! - 被 `deconv/single.rs`、`deconv/multi.rs` 调用
//! - 使用 `deconv/linalg.rs`

use crate::deconv::linalg;

/// 参数盒约束
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// 下界不大于上界且维数一致
    pub fn is_feasible(&self) -> bool {
        self.lower.len() == self.upper.len()
            && self
                .lower
                .iter()
                .zip(&self.upper)
                .all(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo <= hi)
    }

    /// 投影回盒内
    pub fn clamp(&self, p: &mut [f64]) {
        for ((v, lo), hi) in p.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(*lo, *hi);
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }
}

/// 求解器参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// 代价与步长的相对收敛容差
    pub tolerance: f64,
    /// 最大迭代次数
    pub max_iterations: usize,
    /// 初始阻尼系数
    pub initial_damping: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 10_000,
            initial_damping: 1e-3,
        }
    }
}

/// 拟合报告
#[derive(Debug, Clone)]
pub struct FitReport {
    pub params: Vec<f64>,
    /// ½ Σ r²
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
    pub diagnostics: Vec<String>,
}

const JACOBIAN_STEP: f64 = 1.490_116_119_384_765_6e-8;
const MAX_DAMPING: f64 = 1e16;
const MIN_DAMPING: f64 = 1e-12;

/// 有界非线性最小二乘
///
/// `model(x, p)` 为模型在 x 处的值。初值会先投影到盒内。
pub fn least_squares<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    initial: &[f64],
    bounds: &Bounds,
    options: &SolverOptions,
) -> FitReport
where
    F: Fn(f64, &[f64]) -> f64,
{
    let n = initial.len();
    let mut diagnostics = Vec::new();
    let mut p = initial.to_vec();
    bounds.clamp(&mut p);

    let mut residuals = compute_residuals(&model, x, y, &p);
    let mut cost = half_sum_squares(&residuals);
    if !cost.is_finite() {
        diagnostics.push("model is not finite at the initial guess".to_string());
        return FitReport {
            params: p,
            cost,
            iterations: 0,
            converged: false,
            diagnostics,
        };
    }

    let mut damping = options.initial_damping;
    let mut scale = vec![0.0_f64; n];

    for iteration in 1..=options.max_iterations {
        if cost <= f64::MIN_POSITIVE {
            diagnostics.push(format!("exact fit after {} iterations", iteration - 1));
            return report(p, cost, iteration - 1, true, diagnostics);
        }

        let jacobian = compute_jacobian(&model, x, &p, &residuals, y, bounds);
        let (jtj, gradient) = normal_equations(&jacobian, &residuals, n);

        for j in 0..n {
            scale[j] = scale[j].max(jtj[j][j]).max(f64::MIN_POSITIVE);
        }

        let free: Vec<usize> = (0..n)
            .filter(|&j| {
                let at_lower = p[j] <= bounds.lower[j] && gradient[j] > 0.0;
                let at_upper = p[j] >= bounds.upper[j] && gradient[j] < 0.0;
                !(at_lower || at_upper)
            })
            .collect();

        if free.is_empty() || free.iter().all(|&j| gradient[j] == 0.0) {
            diagnostics.push(format!(
                "projected gradient vanished after {} iterations",
                iteration
            ));
            return report(p, cost, iteration, true, diagnostics);
        }

        // 内层：增大阻尼直到代价下降
        loop {
            let system: Vec<Vec<f64>> = free
                .iter()
                .map(|&a| {
                    free.iter()
                        .map(|&b| {
                            let mut v = jtj[a][b];
                            if a == b {
                                v += damping * scale[a];
                            }
                            v
                        })
                        .collect()
                })
                .collect();
            let rhs: Vec<f64> = free.iter().map(|&j| -gradient[j]).collect();

            let step = match linalg::solve(system, rhs) {
                Some(step) => step,
                None => {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        diagnostics.push("normal equations stayed singular".to_string());
                        return report(p, cost, iteration, false, diagnostics);
                    }
                    continue;
                }
            };

            let mut trial = p.clone();
            for (k, &j) in free.iter().enumerate() {
                trial[j] += step[k];
            }
            bounds.clamp(&mut trial);

            if trial == p {
                diagnostics.push(format!(
                    "step collapsed onto the bounds after {} iterations",
                    iteration
                ));
                return report(p, cost, iteration, true, diagnostics);
            }

            let trial_residuals = compute_residuals(&model, x, y, &trial);
            let trial_cost = half_sum_squares(&trial_residuals);

            if trial_cost.is_finite() && trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                let step_norm = norm(trial.iter().zip(&p).map(|(a, b)| a - b));
                let param_norm = norm(p.iter().copied());

                p = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                damping = (damping / 10.0).max(MIN_DAMPING);

                if reduction <= options.tolerance {
                    diagnostics.push(format!(
                        "relative cost reduction {:.3e} below tolerance after {} iterations",
                        reduction, iteration
                    ));
                    return report(p, cost, iteration, true, diagnostics);
                }
                if step_norm <= options.tolerance * (param_norm + options.tolerance) {
                    diagnostics.push(format!(
                        "relative step {:.3e} below tolerance after {} iterations",
                        step_norm / (param_norm + options.tolerance),
                        iteration
                    ));
                    return report(p, cost, iteration, true, diagnostics);
                }
                break;
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                // 任何方向都无法下降：已处于（约束）驻点
                diagnostics.push(format!(
                    "damping limit reached after {} iterations, cost {:.6e}",
                    iteration, cost
                ));
                return report(p, cost, iteration, true, diagnostics);
            }
        }
    }

    diagnostics.push(format!(
        "iteration limit {} reached, cost {:.6e}",
        options.max_iterations, cost
    ));
    report(p, cost, options.max_iterations, false, diagnostics)
}

fn report(
    params: Vec<f64>,
    cost: f64,
    iterations: usize,
    converged: bool,
    diagnostics: Vec<String>,
) -> FitReport {
    FitReport {
        params,
        cost,
        iterations,
        converged,
        diagnostics,
    }
}

fn compute_residuals<F>(model: &F, x: &[f64], y: &[f64], p: &[f64]) -> Vec<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    x.iter().zip(y).map(|(&xi, &yi)| model(xi, p) - yi).collect()
}

fn half_sum_squares(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

/// 列存储的 Jacobian：`jac[j][i] = ∂rᵢ/∂pⱼ`
fn compute_jacobian<F>(
    model: &F,
    x: &[f64],
    p: &[f64],
    residuals: &[f64],
    y: &[f64],
    bounds: &Bounds,
) -> Vec<Vec<f64>>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let mut shifted = p.to_vec();
    (0..p.len())
        .map(|j| {
            let mut h = JACOBIAN_STEP * p[j].abs().max(1.0);
            if p[j] + h > bounds.upper[j] {
                h = -h;
            }
            shifted[j] = p[j] + h;
            let column = x
                .iter()
                .zip(y)
                .zip(residuals)
                .map(|((&xi, &yi), &ri)| (model(xi, &shifted) - yi - ri) / h)
                .collect();
            shifted[j] = p[j];
            column
        })
        .collect()
}

fn normal_equations(jacobian: &[Vec<f64>], residuals: &[f64], n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut jtj = vec![vec![0.0; n]; n];
    for a in 0..n {
        for b in a..n {
            let v: f64 = jacobian[a].iter().zip(&jacobian[b]).map(|(u, w)| u * w).sum();
            jtj[a][b] = v;
            jtj[b][a] = v;
        }
    }
    let gradient = jacobian
        .iter()
        .map(|col| col.iter().zip(residuals).map(|(u, r)| u * r).sum())
        .collect();
    (jtj, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(x: f64, p: &[f64]) -> f64 {
        p[0] * (-p[1] * x).exp()
    }

    fn open_bounds(n: usize) -> Bounds {
        Bounds {
            lower: vec![-1e6; n],
            upper: vec![1e6; n],
        }
    }

    #[test]
    fn test_recovers_exponential_decay() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&v| exponential(v, &[3.0, 1.3])).collect();
        let fit = least_squares(
            exponential,
            &x,
            &y,
            &[1.0, 0.5],
            &open_bounds(2),
            &SolverOptions::default(),
        );
        assert!(fit.converged, "{:?}", fit.diagnostics);
        assert!((fit.params[0] - 3.0).abs() < 1e-5);
        assert!((fit.params[1] - 1.3).abs() < 1e-5);
        assert!(!fit.diagnostics.is_empty());
    }

    #[test]
    fn test_respects_bounds() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 * v + 1.0).collect();
        let line = |x: f64, p: &[f64]| p[0] * x + p[1];
        let bounds = Bounds {
            lower: vec![0.0, 0.0],
            upper: vec![1.5, 10.0],
        };
        let fit = least_squares(line, &x, &y, &[1.0, 1.0], &bounds, &SolverOptions::default());
        assert!(fit.converged, "{:?}", fit.diagnostics);
        assert!(fit.params[0] <= 1.5);
        assert!((fit.params[0] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_iteration_cap_is_not_convergence() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&v| exponential(v, &[3.0, 1.3])).collect();
        let options = SolverOptions {
            max_iterations: 1,
            ..SolverOptions::default()
        };
        let fit = least_squares(exponential, &x, &y, &[0.1, 5.0], &open_bounds(2), &options);
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
    }

    #[test]
    fn test_bounds_feasibility() {
        assert!(open_bounds(3).is_feasible());
        let bad = Bounds {
            lower: vec![1.0],
            upper: vec![0.0],
        };
        assert!(!bad.is_feasible());
    }
}
