use super::SymbolicFn;
use crate::bspline::solve_least_squares;
use crate::error::KanError;
use nalgebra::DMatrix;

/// `y ≈ c f(a x + b) + d` のフィット結果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    /// 決定係数
    pub r2: f64,
}

/// 関数 `fun` のアフィンパラメータをサンプル `(xs, ys)` にフィットします。
///
/// `(a, b)` は格子探索で `y` と `f(a x + b)` の相関の二乗が最大になる点を選び、
/// 最良点のまわりに範囲を絞って2回探索し直します。`(c, d)` はその後の
/// 線形回帰で決めます。
pub fn fit_affine(
    xs: &[f64],
    ys: &[f64],
    fun: SymbolicFn,
    a_range: (f64, f64),
    b_range: (f64, f64),
    grid_number: usize,
) -> Result<AffineFit, KanError> {
    if xs.is_empty() {
        return Err(KanError::EmptySamples);
    }
    let (a, b) = if fun.is_affine_invariant() {
        (1.0, 0.0)
    } else {
        search(xs, ys, fun, a_range, b_range, grid_number.max(3))
    };
    let post: Vec<f64> = xs.iter().map(|&x| fun.eval(a * x + b)).collect();
    let (c, d) = linear_regression(&post, ys)?;
    Ok(AffineFit {
        a,
        b,
        c,
        d,
        r2: r_squared(&post, ys),
    })
}

fn search(
    xs: &[f64],
    ys: &[f64],
    fun: SymbolicFn,
    mut a_range: (f64, f64),
    mut b_range: (f64, f64),
    grid_number: usize,
) -> (f64, f64) {
    let mut best = (1.0, 0.0);
    for _ in 0..=2 {
        let a_grid = linspace(a_range, grid_number);
        let b_grid = linspace(b_range, grid_number);
        let mut best_r2 = f64::NEG_INFINITY;
        let mut best_ids = (0, 0);
        for (ia, &a) in a_grid.iter().enumerate() {
            for (ib, &b) in b_grid.iter().enumerate() {
                let post: Vec<f64> = xs.iter().map(|&x| fun.eval(a * x + b)).collect();
                let r2 = r_squared(&post, ys);
                if r2 > best_r2 {
                    best_r2 = r2;
                    best_ids = (ia, ib);
                }
            }
        }
        let (ia, ib) = best_ids;
        best = (a_grid[ia], b_grid[ib]);
        a_range = (a_grid[ia.saturating_sub(1)], a_grid[(ia + 1).min(grid_number - 1)]);
        b_range = (b_grid[ib.saturating_sub(1)], b_grid[(ib + 1).min(grid_number - 1)]);
    }
    best
}

fn linspace(range: (f64, f64), n: usize) -> Vec<f64> {
    let h = (range.1 - range.0) / (n - 1) as f64;
    (0..n).map(|i| range.0 + h * i as f64).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

/// `u` と `v` の相関係数の二乗。分散が0なら0。
fn r_squared(u: &[f64], v: &[f64]) -> f64 {
    let (mu, mv) = (mean(u), mean(v));
    let mut cov = 0.0;
    let mut var_u = 0.0;
    let mut var_v = 0.0;
    for (&a, &b) in u.iter().zip(v) {
        cov += (a - mu) * (b - mv);
        var_u += (a - mu) * (a - mu);
        var_v += (b - mv) * (b - mv);
    }
    let r2 = cov * cov / (var_u * var_v + 1e-12);
    if r2.is_finite() { r2 } else { 0.0 }
}

/// `v ≈ c u + d` の最小二乗解。`u` が定数なら `c = 0` として平均を返します。
fn linear_regression(u: &[f64], v: &[f64]) -> Result<(f64, f64), KanError> {
    let mu = mean(u);
    let var_u: f64 = u.iter().map(|&a| (a - mu) * (a - mu)).sum();
    if var_u < 1e-12 {
        return Ok((0.0, mean(v)));
    }
    let design = DMatrix::from_fn(u.len(), 2, |r, col| if col == 0 { u[r] } else { 1.0 });
    let rhs = DMatrix::from_column_slice(v.len(), 1, v);
    let solution = solve_least_squares(design, &rhs)?;
    Ok((solution[(0, 0)], solution[(1, 0)]))
}
