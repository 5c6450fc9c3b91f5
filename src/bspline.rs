//! ホスト側 (f64) のBスプライン計算。
//!
//! グリッド更新や細分化で係数を再フィットするときに使います。
//! 学習中の順伝播はテンソル版の [`crate::spline`] を使います。

use crate::error::KanError;
use nalgebra::DMatrix;

/// `[lo, hi]` を `intervals` 等分した `intervals + 1` 個のノット。
pub fn uniform_knots(lo: f64, hi: f64, intervals: usize) -> Vec<f64> {
    let h = (hi - lo) / intervals as f64;
    (0..=intervals).map(|i| lo + h * i as f64).collect()
}

/// 両端に同じ間隔のノットを `k` 個ずつ追加します。
pub fn extend_knots(knots: &[f64], k: usize) -> Vec<f64> {
    let first = knots[0];
    let last = knots[knots.len() - 1];
    let h = (last - first) / (knots.len() - 1) as f64;
    let mut extended = Vec::with_capacity(knots.len() + 2 * k);
    for i in (1..=k).rev() {
        extended.push(first - h * i as f64);
    }
    extended.extend_from_slice(knots);
    for i in 1..=k {
        extended.push(last + h * i as f64);
    }
    extended
}

/// Cox–de Boor の漸化式で `k` 次の基底関数値を計算します。
///
/// 戻り値の長さは `knots.len() - 1 - k`。台は半開区間 `[t_i, t_{i+1})`。
pub fn basis(x: f64, knots: &[f64], k: usize) -> Vec<f64> {
    let mut level: Vec<f64> = knots
        .windows(2)
        .map(|t| if x >= t[0] && x < t[1] { 1.0 } else { 0.0 })
        .collect();
    for j in 1..=k {
        let n = knots.len() - 1 - j;
        level = (0..n)
            .map(|m| {
                let up = (x - knots[m]) / (knots[m + j] - knots[m]) * level[m];
                let down = (knots[m + j + 1] - x) / (knots[m + j + 1] - knots[m + 1]) * level[m + 1];
                up + down
            })
            .collect();
    }
    level
}

/// 係数 `coef` を持つスプラインを `x` で評価します。
pub fn evaluate(x: f64, knots: &[f64], coef: &[f64], k: usize) -> f64 {
    basis(x, knots, k)
        .iter()
        .zip(coef)
        .map(|(b, c)| b * c)
        .sum()
}

/// サンプル `(xs, ys)` に最もよく合うスプライン係数を最小二乗法で求めます。
///
/// `ys` は `[xs.len(), outputs]` の行列で、出力ごとの係数を列に持つ
/// `[n_basis, outputs]` の行列を返します。
pub fn fit_coefficients(
    xs: &[f64],
    ys: &DMatrix<f64>,
    knots: &[f64],
    k: usize,
) -> Result<DMatrix<f64>, KanError> {
    if xs.is_empty() {
        return Err(KanError::EmptySamples);
    }
    if knots.len() < k + 2 || !knots.windows(2).all(|t| t[0] < t[1]) {
        return Err(KanError::LeastSquares("ノットが狭義単調増加ではありません"));
    }
    let n_basis = knots.len() - 1 - k;
    let rows: Vec<Vec<f64>> = xs.iter().map(|&x| basis(x, knots, k)).collect();
    let design = DMatrix::from_fn(xs.len(), n_basis, |r, c| rows[r][c]);
    solve_least_squares(design, ys)
}

/// SVD の反復回数の上限
const SVD_MAX_ITERATIONS: usize = 1000;

/// `design * x ≈ rhs` の最小二乗解。
///
/// 行列に非有限値が含まれるときや SVD が収束しないときはエラーを返します。
pub fn solve_least_squares(
    design: DMatrix<f64>,
    rhs: &DMatrix<f64>,
) -> Result<DMatrix<f64>, KanError> {
    if design.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return Err(KanError::LeastSquares("行列に有限でない値が含まれています"));
    }
    design
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or(KanError::LeastSquares("SVD が収束しませんでした"))?
        .solve(rhs, 1e-12)
        .map_err(KanError::LeastSquares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f64> {
        extend_knots(&uniform_knots(-1.0, 1.0, 5), 3)
    }

    #[test]
    fn extended_knots_keep_spacing() {
        let knots = grid();
        assert_eq!(knots.len(), 5 + 1 + 2 * 3);
        for w in knots.windows(2) {
            assert!((w[1] - w[0] - 0.4).abs() < 1e-12);
        }
        assert!((knots[3] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn basis_is_a_partition_of_unity_inside_the_grid() {
        let knots = grid();
        for i in 0..50 {
            let x = -0.99 + 1.98 * i as f64 / 49.0;
            let values = basis(x, &knots, 3);
            assert_eq!(values.len(), 8);
            let total: f64 = values.iter().sum();
            assert!((total - 1.0).abs() < 1e-12, "x = {x}, sum = {total}");
            assert!(values.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn least_squares_reproduces_a_spline() {
        let knots = grid();
        let coef = [0.3, -0.2, 0.5, 1.0, -0.7, 0.1, 0.0, 0.4];
        let xs: Vec<f64> = (0..40).map(|i| -0.95 + 1.9 * i as f64 / 39.0).collect();
        let ys = DMatrix::from_fn(xs.len(), 1, |r, _| evaluate(xs[r], &knots, &coef, 3));
        let fitted = fit_coefficients(&xs, &ys, &knots, 3).unwrap();
        for &x in &xs {
            let fitted_coef: Vec<f64> = fitted.column(0).iter().copied().collect();
            let expected = evaluate(x, &knots, &coef, 3);
            let actual = evaluate(x, &knots, &fitted_coef, 3);
            assert!((expected - actual).abs() < 1e-8);
        }
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        let xs = [0.0, 0.5];
        let ys = DMatrix::from_element(2, 1, 1.0);
        // 区間数0のグリッドからはノットが作れない
        let collapsed = extend_knots(&uniform_knots(-1.0, 1.0, 0), 3);
        assert!(matches!(
            fit_coefficients(&xs, &ys, &collapsed, 3),
            Err(KanError::LeastSquares(_))
        ));
        let design = DMatrix::from_row_slice(2, 1, &[f64::NAN, 1.0]);
        assert!(matches!(
            solve_least_squares(design, &ys),
            Err(KanError::LeastSquares(_))
        ));
    }

    #[test]
    fn fitting_without_samples_fails() {
        let ys = DMatrix::<f64>::zeros(0, 1);
        assert!(matches!(
            fit_coefficients(&[], &ys, &grid(), 3),
            Err(KanError::EmptySamples)
        ));
    }
}
