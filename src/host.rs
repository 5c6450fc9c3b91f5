//! テンソルとホスト側 `Vec` の相互変換。

use crate::error::KanError;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// テンソルを行優先の `f32` 列として取り出します。
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, KanError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| KanError::Data(format!("{e:?}")))
}

pub fn to_vec_f64<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f64>, KanError> {
    Ok(to_vec(tensor)?.into_iter().map(f64::from).collect())
}

/// 行優先の値列から形状 `shape` のテンソルを作ります。
pub fn from_f64<B: Backend, const D: usize>(
    values: &[f64],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape(shape)
}
