//! 正方形領域 `[-1, 1]²` のコロケーション点。

use burn::prelude::Backend;
use burn::tensor::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 内部点の取り方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Sampling {
    /// 一様乱数で `n²` 点
    Random,
    /// `n × n` の格子点
    Mesh,
}

/// `[lo, hi]` を `n` 点で等分します。
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// `ij` 順の格子点 `[n², 2]`。
pub fn mesh(n: usize, lo: f64, hi: f64) -> Vec<[f64; 2]> {
    let axis = linspace(lo, hi, n);
    axis.iter()
        .flat_map(|&x| axis.iter().map(move |&y| [x, y]))
        .collect()
}

/// 内部のコロケーション点。
pub fn interior_points<R: Rng>(n: usize, sampling: Sampling, rng: &mut R) -> Vec<[f64; 2]> {
    match sampling {
        Sampling::Mesh => mesh(n, -1.0, 1.0),
        Sampling::Random => (0..n * n)
            .map(|_| [rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)])
            .collect(),
    }
}

/// 境界上の点 `[4n, 2]`。`x = -1`、`x = 1`、`y = -1`、`y = 1` の順。
pub fn boundary_points(n: usize) -> Vec<[f64; 2]> {
    let axis = linspace(-1.0, 1.0, n);
    let mut points = Vec::with_capacity(4 * n);
    points.extend(axis.iter().map(|&y| [-1.0, y]));
    points.extend(axis.iter().map(|&y| [1.0, y]));
    points.extend(axis.iter().map(|&x| [x, -1.0]));
    points.extend(axis.iter().map(|&x| [x, 1.0]));
    points
}

/// 点列を `[n, 2]` のテンソルにします。
pub fn to_tensor<B: Backend>(points: &[[f64; 2]], device: &B::Device) -> Tensor<B, 2> {
    let flat: Vec<f32> = points
        .iter()
        .flat_map(|p| [p[0] as f32, p[1] as f32])
        .collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([points.len(), 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn boundary_points_lie_on_the_edges() {
        let points = boundary_points(21);
        assert_eq!(points.len(), 84);
        for p in &points {
            assert!(p[0].abs() == 1.0 || p[1].abs() == 1.0);
            assert!(p[0].abs() <= 1.0 && p[1].abs() <= 1.0);
        }
        assert_eq!(points[0], [-1.0, -1.0]);
        assert_eq!(points[83], [1.0, 1.0]);
    }

    #[test]
    fn mesh_uses_ij_indexing() {
        let points = mesh(3, -1.0, 1.0);
        assert_eq!(points.len(), 9);
        assert_eq!(points[1], [-1.0, 0.0]);
        assert_eq!(points[3], [0.0, -1.0]);
    }

    #[test]
    fn random_interior_points_are_seeded_and_inside() {
        let a = interior_points(5, Sampling::Random, &mut StdRng::seed_from_u64(9));
        let b = interior_points(5, Sampling::Random, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.len(), 25);
        assert_eq!(a, b);
        assert!(a.iter().all(|p| p.iter().all(|v| (-1.0..1.0).contains(v))));
    }
}
