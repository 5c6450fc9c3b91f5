//! シンボリック関数ライブラリ。
//!
//! 活性化関数を固定するときに選べる閉形式の関数と、そのアフィンパラメータの
//! フィット、および数式表現を提供します。

pub mod fit;
pub mod formula;

use crate::error::KanError;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::fmt;
use std::str::FromStr;

pub use fit::{AffineFit, fit_affine};
pub use formula::Expr;

/// エッジを固定できる閉形式の関数。
///
/// レイヤーのパラメータには [`SymbolicFn::index`] の位置が1のワンホットで
/// 保存されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicFn {
    Zero,
    Identity,
    Square,
    Cube,
    Quartic,
    Sin,
    Cos,
    Tanh,
    Gaussian,
}

impl SymbolicFn {
    pub const ALL: [SymbolicFn; 9] = [
        SymbolicFn::Zero,
        SymbolicFn::Identity,
        SymbolicFn::Square,
        SymbolicFn::Cube,
        SymbolicFn::Quartic,
        SymbolicFn::Sin,
        SymbolicFn::Cos,
        SymbolicFn::Tanh,
        SymbolicFn::Gaussian,
    ];

    /// ライブラリ内の関数の数
    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|&f| f == self)
            .unwrap_or_default()
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SymbolicFn::Zero => "0",
            SymbolicFn::Identity => "x",
            SymbolicFn::Square => "x^2",
            SymbolicFn::Cube => "x^3",
            SymbolicFn::Quartic => "x^4",
            SymbolicFn::Sin => "sin",
            SymbolicFn::Cos => "cos",
            SymbolicFn::Tanh => "tanh",
            SymbolicFn::Gaussian => "gaussian",
        }
    }

    /// 内側のアフィン変換 `a x + b` が意味を持たない関数。
    pub fn is_affine_invariant(self) -> bool {
        matches!(self, SymbolicFn::Zero | SymbolicFn::Identity)
    }

    pub fn eval(self, x: f64) -> f64 {
        match self {
            SymbolicFn::Zero => 0.0,
            SymbolicFn::Identity => x,
            SymbolicFn::Square => x * x,
            SymbolicFn::Cube => x * x * x,
            SymbolicFn::Quartic => x * x * x * x,
            SymbolicFn::Sin => x.sin(),
            SymbolicFn::Cos => x.cos(),
            SymbolicFn::Tanh => x.tanh(),
            SymbolicFn::Gaussian => (-x * x).exp(),
        }
    }

    /// テンソル上で関数値を計算します。
    pub fn forward<B: Backend, const D: usize>(self, z: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            SymbolicFn::Zero => z.zeros_like(),
            SymbolicFn::Identity => z,
            SymbolicFn::Square => z.clone() * z,
            SymbolicFn::Cube => z.clone() * z.clone() * z,
            SymbolicFn::Quartic => {
                let sq = z.clone() * z;
                sq.clone() * sq
            }
            SymbolicFn::Sin => z.sin(),
            SymbolicFn::Cos => z.cos(),
            SymbolicFn::Tanh => z.tanh(),
            SymbolicFn::Gaussian => (z.clone() * z).neg().exp(),
        }
    }

    /// 関数値と1階・2階微分を返します。
    pub fn forward_with_derivatives<B: Backend, const D: usize>(
        self,
        z: Tensor<B, D>,
    ) -> [Tensor<B, D>; 3] {
        match self {
            SymbolicFn::Zero => [z.zeros_like(), z.zeros_like(), z.zeros_like()],
            SymbolicFn::Identity => [z.clone(), z.ones_like(), z.zeros_like()],
            SymbolicFn::Square => [z.clone() * z.clone(), z.clone().mul_scalar(2.0), z.ones_like().mul_scalar(2.0)],
            SymbolicFn::Cube => {
                let sq = z.clone() * z.clone();
                [sq.clone() * z.clone(), sq.mul_scalar(3.0), z.mul_scalar(6.0)]
            }
            SymbolicFn::Quartic => {
                let sq = z.clone() * z.clone();
                let cube = sq.clone() * z;
                [sq.clone() * sq.clone(), cube.mul_scalar(4.0), sq.mul_scalar(12.0)]
            }
            SymbolicFn::Sin => {
                let (s, c) = (z.clone().sin(), z.cos());
                [s.clone(), c, s.neg()]
            }
            SymbolicFn::Cos => {
                let (s, c) = (z.clone().sin(), z.cos());
                [c.clone(), s.neg(), c.neg()]
            }
            SymbolicFn::Tanh => {
                let t = z.tanh();
                let sech2 = (t.clone() * t.clone()).neg().add_scalar(1.0);
                [t.clone(), sech2.clone(), (t * sech2).mul_scalar(-2.0)]
            }
            SymbolicFn::Gaussian => {
                let sq = z.clone() * z.clone();
                let g = sq.clone().neg().exp();
                [
                    g.clone(),
                    (z * g.clone()).mul_scalar(-2.0),
                    sq.mul_scalar(4.0).sub_scalar(2.0) * g,
                ]
            }
        }
    }

    /// 引数の文字列 `arg` にこの関数を適用した式を描画します。
    pub fn render(self, arg: &str) -> String {
        match self {
            SymbolicFn::Zero => "0".to_string(),
            SymbolicFn::Identity => arg.to_string(),
            SymbolicFn::Square => format!("({arg})^2"),
            SymbolicFn::Cube => format!("({arg})^3"),
            SymbolicFn::Quartic => format!("({arg})^4"),
            SymbolicFn::Sin => format!("sin({arg})"),
            SymbolicFn::Cos => format!("cos({arg})"),
            SymbolicFn::Tanh => format!("tanh({arg})"),
            SymbolicFn::Gaussian => format!("exp(-({arg})^2)"),
        }
    }
}

impl fmt::Display for SymbolicFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymbolicFn {
    type Err = KanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let alias = match name {
            "id" | "identity" => Some(SymbolicFn::Identity),
            "zero" => Some(SymbolicFn::Zero),
            "exp(-x^2)" | "gauss" => Some(SymbolicFn::Gaussian),
            _ => None,
        };
        alias
            .or_else(|| Self::ALL.iter().copied().find(|f| f.name() == name))
            .ok_or_else(|| KanError::UnknownFunction(name.to_string()))
    }
}
