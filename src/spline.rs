//! テンソル版のBスプライン基底。
//!
//! 入力 `x` は `[batch, in]`、グリッドは `[in, knots]`。基底は
//! `[batch, in, knots - 1 - k]` の形で返ります。

use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 基底関数の値と、`x` に関する1階・2階微分。
#[derive(Debug, Clone)]
pub struct BasisJet<B: Backend> {
    pub value: Tensor<B, 3>,
    pub d1: Tensor<B, 3>,
    pub d2: Tensor<B, 3>,
}

/// `k` 次のBスプライン基底を計算します。
pub fn basis<B: Backend>(x: Tensor<B, 2>, grid: Tensor<B, 2>, k: usize) -> Tensor<B, 3> {
    let mut levels = levels(x, grid.unsqueeze_dim::<3>(0), k);
    levels.swap_remove(k)
}

/// 基底関数とその1階・2階微分を計算します。
///
/// 微分は `B'_{m,j} = j (B_{m,j-1} / (t_{m+j} - t_m) - B_{m+1,j-1} / (t_{m+j+1} - t_{m+1}))`
/// を使って低次の基底から求めます。
pub fn basis_with_derivatives<B: Backend>(
    x: Tensor<B, 2>,
    grid: Tensor<B, 2>,
    k: usize,
) -> BasisJet<B> {
    let grid = grid.unsqueeze_dim::<3>(0);
    let levels = levels(x, grid.clone(), k);
    let value = levels[k].clone();
    let d1 = if k >= 1 {
        differentiate(levels[k - 1].clone(), grid.clone(), k)
    } else {
        value.zeros_like()
    };
    let d2 = if k >= 2 {
        let lower = differentiate(levels[k - 2].clone(), grid.clone(), k - 1);
        differentiate(lower, grid, k)
    } else {
        value.zeros_like()
    };
    BasisJet { value, d1, d2 }
}

/// 0次から `k` 次までの基底をすべて返します。
fn levels<B: Backend>(x: Tensor<B, 2>, grid: Tensor<B, 3>, k: usize) -> Vec<Tensor<B, 3>> {
    let x = x.unsqueeze_dim::<3>(2);
    let knots = grid.dims()[2];

    let left = x.clone() - grid.clone().narrow(2, 0, knots - 1);
    let right = x.clone() - grid.clone().narrow(2, 1, knots - 1);
    let level0 = left.greater_equal_elem(0.0).float() * right.lower_elem(0.0).float();

    let mut levels = Vec::with_capacity(k + 1);
    levels.push(level0);
    for j in 1..=k {
        let n = knots - 1 - j;
        let lower = levels[j - 1].clone();
        let t0 = grid.clone().narrow(2, 0, n);
        let t1 = grid.clone().narrow(2, 1, n);
        let tj = grid.clone().narrow(2, j, n);
        let tj1 = grid.clone().narrow(2, j + 1, n);
        let up = (x.clone() - t0.clone()) / (tj - t0) * lower.clone().narrow(2, 0, n);
        let down = (tj1.clone() - x.clone()) / (tj1 - t1) * lower.narrow(2, 1, n);
        levels.push(up + down);
    }
    levels
}

/// `j - 1` 次の量 `lower` から `j` 次の量の微分を作ります。
fn differentiate<B: Backend>(lower: Tensor<B, 3>, grid: Tensor<B, 3>, j: usize) -> Tensor<B, 3> {
    let n = lower.dims()[2] - 1;
    let left = grid.clone().narrow(2, j, n) - grid.clone().narrow(2, 0, n);
    let right = grid.clone().narrow(2, j + 1, n) - grid.narrow(2, 1, n);
    (lower.clone().narrow(2, 0, n) / left - lower.narrow(2, 1, n) / right).mul_scalar(j as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bspline;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn setup(xs: &[f32]) -> (Tensor<TestBackend, 2>, Tensor<TestBackend, 2>, Vec<f64>) {
        let device = Default::default();
        let knots = bspline::extend_knots(&bspline::uniform_knots(-1.0, 1.0, 5), 3);
        let grid_data: Vec<f32> = knots.iter().map(|&t| t as f32).collect();
        let grid = Tensor::<TestBackend, 1>::from_floats(grid_data.as_slice(), &device)
            .reshape([1, knots.len()]);
        let x = Tensor::<TestBackend, 1>::from_floats(xs, &device).reshape([xs.len(), 1]);
        (x, grid, knots)
    }

    #[test]
    fn tensor_basis_matches_host_basis() {
        let xs = [-0.93f32, -0.41, 0.0, 0.27, 0.88];
        let (x, grid, knots) = setup(&xs);
        let values = basis(x, grid, 3)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let n_basis = knots.len() - 4;
        for (row, &xv) in xs.iter().enumerate() {
            let expected = bspline::basis(xv as f64, &knots, 3);
            for m in 0..n_basis {
                let actual = values[row * n_basis + m] as f64;
                assert!((actual - expected[m]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let xs = [-0.71f32, -0.05, 0.33, 0.62];
        let (x, grid, knots) = setup(&xs);
        let jet = basis_with_derivatives(x, grid, 3);
        let d1 = jet.d1.into_data().to_vec::<f32>().unwrap();
        let d2 = jet.d2.into_data().to_vec::<f32>().unwrap();
        let n_basis = knots.len() - 4;
        let h = 1e-4;
        for (row, &xv) in xs.iter().enumerate() {
            let xv = xv as f64;
            let plus = bspline::basis(xv + h, &knots, 3);
            let mid = bspline::basis(xv, &knots, 3);
            let minus = bspline::basis(xv - h, &knots, 3);
            for m in 0..n_basis {
                let fd1 = (plus[m] - minus[m]) / (2.0 * h);
                let fd2 = (plus[m] - 2.0 * mid[m] + minus[m]) / (h * h);
                assert!((d1[row * n_basis + m] as f64 - fd1).abs() < 1e-3);
                assert!((d2[row * n_basis + m] as f64 - fd2).abs() < 1e-2);
            }
        }
    }
}
