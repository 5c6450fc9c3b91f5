use crate::model::Kan;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::f64::consts::PI;

/// 厳密解 `u = sin(πx) sin(πy)`。
pub fn exact(x: f64, y: f64) -> f64 {
    (PI * x).sin() * (PI * y).sin()
}

/// 厳密解をテンソル上で評価します。`[n, 2] -> [n, 1]`
pub fn solution<B: Backend>(coords: Tensor<B, 2>) -> Tensor<B, 2> {
    let x = coords.clone().narrow(1, 0, 1);
    let y = coords.narrow(1, 1, 1);
    x.mul_scalar(PI).sin() * y.mul_scalar(PI).sin()
}

/// ソース項 `f = -2π² sin(πx) sin(πy)`。
pub fn source<B: Backend>(coords: Tensor<B, 2>) -> Tensor<B, 2> {
    solution(coords).mul_scalar(-2.0 * PI * PI)
}

/// PDE損失を計算します。
///
/// ポアソン方程式 `∇²u = f` の残差の二乗平均を返します。ラプラシアンは
/// [`Kan::forward_jet`] で順方向に伝播させたものなので、パラメータに関する
/// 勾配はそのまま逆伝播できます。
pub fn pde_loss<B: Backend>(model: &Kan<B>, interior: Tensor<B, 2>) -> Tensor<B, 1> {
    let lap = model.laplacian(interior.clone());
    MseLoss::new().forward(lap, source(interior), Reduction::Mean)
}

/// 境界条件の損失。
pub fn boundary_loss<B: Backend>(model: &Kan<B>, boundary: Tensor<B, 2>) -> Tensor<B, 1> {
    let pred = model.forward(boundary.clone());
    MseLoss::new().forward(pred, solution(boundary), Reduction::Mean)
}

/// 内部点での厳密解との二乗平均誤差 (学習には使わない指標)。
pub fn l2_error<B: Backend>(model: &Kan<B>, interior: Tensor<B, 2>) -> Tensor<B, 1> {
    let pred = model.forward(interior.clone());
    MseLoss::new().forward(pred, solution(interior), Reduction::Mean)
}
