//! # Kolmogorov-Arnold Network (KAN) によるポアソン方程式ソルバー
//!
//! `burn` フレームワークを使用して、学習可能なBスプライン活性化関数を持つ KAN を構築し、
//! 2次元のポアソン方程式 `∇²u = f` を物理情報付きの損失で解きます。学習後は各エッジを
//! 閉形式の関数に固定し、解を数式として取り出します。

pub mod artifact;
pub mod bspline;
pub mod cli;
pub mod error;
pub mod host;
pub mod inference;
pub mod jet;
pub mod layer;
pub mod model;
pub mod pinn;
pub mod plot;
pub mod sampling;
pub mod spline;
pub mod symbolic;
pub mod symbolize;
pub mod training;

/// 学習済みモデルを保存するファイル名 (拡張子なし)
pub const MODEL_FILENAME: &str = "kan_model";
/// シンボリック関数に固定したモデルのファイル名
pub const SYMBOLIC_MODEL_FILENAME: &str = "kan_symbolic";
pub const KAN_CONFIG_FILENAME: &str = "kan_config.json";
pub const TRAINING_CONFIG_FILENAME: &str = "training_config.json";
pub const FORMULA_FILENAME: &str = "formula.txt";
pub const LOSS_IMAGE: &str = "loss_graph.png";
pub const SYMBOLIC_LOSS_IMAGE: &str = "symbolic_loss_graph.png";
pub const ACTIVATIONS_IMAGE: &str = "activations.png";
pub const SYMBOLIC_ACTIVATIONS_IMAGE: &str = "symbolic_activations.png";
pub const SOLUTION_IMAGE: &str = "solution.png";
pub const ERROR_IMAGE: &str = "error.png";
