use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 値と、ネットワーク入力に関する勾配・ラプラシアンの組。
///
/// PDE残差に必要な2階微分を、逆伝播を二重に使わずに順方向で伝播させます。
/// パラメータに関する勾配は通常どおり burn の自動微分が扱います。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    /// `[batch, width]`
    pub value: Tensor<B, 2>,
    /// 入力座標ごとの `∂value/∂z_k`、各 `[batch, width]`
    pub gradient: Vec<Tensor<B, 2>>,
    /// `Σ_k ∂²value/∂z_k²`、`[batch, width]`
    pub laplacian: Tensor<B, 2>,
}

impl<B: Backend> Jet<B> {
    /// ネットワーク入力そのものを表すジェットを作ります。
    pub fn seed(x: Tensor<B, 2>) -> Self {
        let [batch, dims] = x.dims();
        let device = x.device();
        let gradient = (0..dims)
            .map(|k| {
                Tensor::zeros([batch, dims], &device)
                    .slice_assign([0..batch, k..k + 1], Tensor::ones([batch, 1], &device))
            })
            .collect();
        Self {
            laplacian: x.zeros_like(),
            value: x,
            gradient,
        }
    }

    /// `Σ_k (∂value/∂z_k)²`
    pub fn gradient_norm_sq(&self) -> Tensor<B, 2> {
        self.gradient
            .iter()
            .fold(self.value.zeros_like(), |acc, g| acc + g.clone() * g.clone())
    }
}
