use crate::error::KanError;
use crate::host;
use crate::jet::Jet;
use crate::layer::{AffineSearch, KanLayer};
use crate::symbolic::{AffineFit, Expr, SymbolicFn};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fmt;

/// KANの構成。
#[derive(Config, Debug)]
pub struct KanConfig {
    /// 各層のノード数。例: `[2, 2, 1]`
    pub width: Vec<usize>,
    /// グリッドの区間数
    #[config(default = 5)]
    pub grid_size: usize,
    /// スプラインの次数
    #[config(default = 3)]
    pub spline_order: usize,
    #[config(default = "[-1.0, 1.0]")]
    pub grid_range: [f64; 2],
    /// グリッド更新時の一様グリッドの混合率 (1 で一様、0 で分位点のみ)
    #[config(default = 0.02)]
    pub grid_eps: f64,
    #[config(default = 0.3)]
    pub noise_scale: f64,
    #[config(default = 0.0)]
    pub scale_base_mu: f64,
    #[config(default = 1.0)]
    pub scale_base_sigma: f64,
    #[config(default = 1)]
    pub seed: u64,
}

impl KanConfig {
    /// 新しいモデルを初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Kan<B> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let layers = self
            .width
            .windows(2)
            .map(|w| KanLayer::new(self, w[0], w[1], &mut rng, device))
            .collect();
        Kan { layers }
    }
}

/// 層 `layer` の入力 `input` から出力 `output` へのエッジ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub layer: usize,
    pub input: usize,
    pub output: usize,
}

impl Edge {
    pub fn new(layer: usize, input: usize, output: usize) -> Self {
        Self {
            layer,
            input,
            output,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.layer, self.input, self.output)
    }
}

/// 描画用にサンプルしたエッジの活性化関数。
#[derive(Debug, Clone)]
pub struct EdgeCurve {
    pub edge: Edge,
    pub symbolic: Option<SymbolicFn>,
    /// 入力値で昇順に並んだ `(x, φ(x))`
    pub points: Vec<(f32, f32)>,
}

/// Kolmogorov-Arnold Network 本体。
///
/// 入力座標 `(x, y)` から解 `u` を予測します。
#[derive(Module, Debug)]
pub struct Kan<B: Backend> {
    layers: Vec<KanLayer<B>>,
}

impl<B: Backend> Kan<B> {
    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(input, |x, layer| layer.forward(x))
    }

    /// 出力の値・入力勾配・ラプラシアンをまとめて計算します。
    pub fn forward_jet(&self, input: Tensor<B, 2>) -> Jet<B> {
        self.layers
            .iter()
            .fold(Jet::seed(input), |jet, layer| layer.forward_jet(jet))
    }

    /// 出力の入力に関するラプラシアン `[batch, out]`。
    pub fn laplacian(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward_jet(input).laplacian
    }

    pub fn width(&self) -> Vec<usize> {
        let mut width: Vec<usize> = self.layers.iter().map(|l| l.in_dim()).collect();
        if let Some(last) = self.layers.last() {
            width.push(last.out_dim());
        }
        width
    }

    pub fn grid_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.grid_size())
    }

    /// 各層への入力を返します。勾配は追跡しません。
    pub fn layer_inputs(&self, input: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut x = input.detach();
        for layer in &self.layers {
            inputs.push(x.clone());
            x = layer.forward(x).detach();
        }
        inputs
    }

    /// サンプル点の分布に合わせて全層のグリッドを更新します。
    pub fn update_grid_from_samples(self, input: Tensor<B, 2>) -> Result<Self, KanError> {
        let inputs = self.layer_inputs(input);
        let layers = self
            .layers
            .into_iter()
            .zip(inputs)
            .map(|(layer, x)| layer.update_grid_from_samples(x))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layers })
    }

    /// 全層のグリッド区間数を `grid_size` に変更します (グリッド拡張)。
    pub fn refine(self, grid_size: usize) -> Result<Self, KanError> {
        let layers = self
            .layers
            .into_iter()
            .map(|layer| layer.refine(grid_size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layers })
    }

    fn check_edge(&self, edge: Edge) -> Result<(), KanError> {
        let valid = self
            .layers
            .get(edge.layer)
            .is_some_and(|l| edge.input < l.in_dim() && edge.output < l.out_dim());
        if valid {
            Ok(())
        } else {
            Err(KanError::EdgeOutOfRange {
                layer: edge.layer,
                input: edge.input,
                output: edge.output,
            })
        }
    }

    /// エッジを名前付きの閉形式関数に固定します。
    ///
    /// `samples` (ネットワークへの入力) を渡すと、そのエッジの現在の形に
    /// アフィンパラメータをフィットし、フィット結果を返します。
    pub fn fix_symbolic(
        mut self,
        edge: Edge,
        fun: SymbolicFn,
        samples: Option<Tensor<B, 2>>,
        search: &AffineSearch,
    ) -> Result<(Self, Option<AffineFit>), KanError> {
        self.check_edge(edge)?;
        let layer_input = samples.map(|x| self.layer_inputs(x).swap_remove(edge.layer));
        let layer = self.layers.remove(edge.layer);
        let (layer, fit) = layer.fix_symbolic(edge.input, edge.output, fun, layer_input, search)?;
        self.layers.insert(edge.layer, layer);
        Ok((self, fit))
    }

    /// 固定したエッジをスプラインに戻します。
    pub fn unfix_symbolic(mut self, edge: Edge) -> Result<Self, KanError> {
        self.check_edge(edge)?;
        let layer = self.layers.remove(edge.layer);
        self.layers
            .insert(edge.layer, layer.unfix_symbolic(edge.input, edge.output)?);
        Ok(self)
    }

    /// 全エッジがシンボリック関数に固定されたネットワークの出力を数式として返します。
    pub fn symbolic_formula(&self, variables: &[String]) -> Result<Vec<Expr>, KanError> {
        let expected = self.layers.first().map_or(0, |l| l.in_dim());
        if variables.len() != expected {
            return Err(KanError::VariableCount {
                given: variables.len(),
                expected,
            });
        }
        let mut exprs: Vec<Expr> = variables.iter().map(|v| Expr::var(v.as_str())).collect();
        for (l, layer) in self.layers.iter().enumerate() {
            let states = layer.edge_states()?;
            let out_dim = layer.out_dim();
            let mut next = Vec::with_capacity(out_dim);
            for j in 0..out_dim {
                let mut terms = Vec::new();
                for (i, input) in exprs.iter().enumerate() {
                    let state = states[i * out_dim + j];
                    if state.numeric {
                        return Err(KanError::NotSymbolic {
                            layer: l,
                            input: i,
                            output: j,
                        });
                    }
                    if let Some(fun) = state.symbolic {
                        let [a, b, c, d] = state.affine;
                        terms.push(input.clone().affine(a, b).apply(fun).affine(c, d));
                    }
                }
                next.push(Expr::sum(terms));
            }
            exprs = next;
        }
        Ok(exprs)
    }

    /// `input` で各エッジの活性化関数をサンプルします。
    pub fn edge_curves(&self, input: Tensor<B, 2>) -> Result<Vec<EdgeCurve>, KanError> {
        let mut curves = Vec::new();
        for (l, (layer, x)) in self.layers.iter().zip(self.layer_inputs(input)).enumerate() {
            let [batch, in_dim] = x.dims();
            let out_dim = layer.out_dim();
            let states = layer.edge_states()?;
            let values = host::to_vec(layer.activations(x.clone()))?;
            let xs = host::to_vec(x)?;
            for i in 0..in_dim {
                for j in 0..out_dim {
                    let mut points: Vec<(f32, f32)> = (0..batch)
                        .map(|r| (xs[r * in_dim + i], values[(r * in_dim + i) * out_dim + j]))
                        .collect();
                    points.sort_by(|a, b| a.0.total_cmp(&b.0));
                    curves.push(EdgeCurve {
                        edge: Edge::new(l, i, j),
                        symbolic: states[i * out_dim + j].symbolic,
                        points,
                    });
                }
            }
        }
        Ok(curves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::f32::consts::PI;

    type TestBackend = NdArray<f32>;

    fn points(values: &[f32]) -> Tensor<TestBackend, 2> {
        Tensor::<TestBackend, 1>::from_floats(values, &Default::default())
            .reshape([values.len() / 2, 2])
    }

    /// `u = 0.5 cos(π(x - y)) - 0.5 cos(π(x + y)) = sin(πx) sin(πy)` を表すように固定したモデル
    fn exact_model() -> Kan<TestBackend> {
        let mut model = KanConfig::new(vec![2, 2, 1]).init::<TestBackend>(&Default::default());
        let pi = std::f64::consts::PI;
        let id = Some(SymbolicFn::Identity);
        let cos = Some(SymbolicFn::Cos);
        // 第1層: h0 = x - y, h1 = x + y
        let first = model.layers.remove(0);
        let first = first.set_edge(0, 0, false, id, [1.0, 0.0, 1.0, 0.0]).unwrap();
        let first = first.set_edge(1, 0, false, id, [1.0, 0.0, -1.0, 0.0]).unwrap();
        let first = first.set_edge(0, 1, false, id, [1.0, 0.0, 1.0, 0.0]).unwrap();
        let first = first.set_edge(1, 1, false, id, [1.0, 0.0, 1.0, 0.0]).unwrap();
        let second = model.layers.remove(0);
        let second = second.set_edge(0, 0, false, cos, [pi, 0.0, 0.5, 0.0]).unwrap();
        let second = second.set_edge(1, 0, false, cos, [pi, 0.0, -0.5, 0.0]).unwrap();
        model.layers = vec![first, second];
        model
    }

    #[test]
    fn width_and_grid_follow_the_config() {
        let model = KanConfig::new(vec![2, 3, 1])
            .with_grid_size(7)
            .init::<TestBackend>(&Default::default());
        assert_eq!(model.width(), vec![2, 3, 1]);
        assert_eq!(model.grid_size(), 7);
        let out = model.forward(points(&[0.1, 0.2, 0.3, 0.4, -0.5, 0.6]));
        assert_eq!(out.dims(), [3, 1]);
    }

    #[test]
    fn exact_symbolic_model_solves_the_poisson_problem() {
        let model = exact_model();
        let x = points(&[0.3, -0.2, -0.7, 0.45, 0.5, 0.5]);
        let jet = model.forward_jet(x.clone());
        let u = jet.value.into_data().to_vec::<f32>().unwrap();
        let lap = jet.laplacian.into_data().to_vec::<f32>().unwrap();
        let xs = x.into_data().to_vec::<f32>().unwrap();
        for r in 0..3 {
            let (px, py) = (xs[2 * r], xs[2 * r + 1]);
            let exact = (PI * px).sin() * (PI * py).sin();
            assert!((u[r] - exact).abs() < 1e-5);
            assert!((lap[r] + 2.0 * PI * PI * exact).abs() < 1e-3);
        }
    }

    #[test]
    fn formula_of_the_exact_model() {
        let model = exact_model();
        let names = vec!["x_1".to_string(), "x_2".to_string()];
        let formula = model.symbolic_formula(&names).unwrap();
        assert_eq!(
            formula[0].render(4),
            "0.5*cos(3.1416*x_1 - 3.1416*x_2) - 0.5*cos(3.1416*x_1 + 3.1416*x_2)"
        );
    }

    #[test]
    fn formula_requires_every_edge_to_be_fixed() {
        let model = KanConfig::new(vec![2, 1]).init::<TestBackend>(&Default::default());
        let names = vec!["x".to_string(), "y".to_string()];
        assert!(matches!(
            model.symbolic_formula(&names),
            Err(KanError::NotSymbolic { layer: 0, input: 0, output: 0 })
        ));
        assert!(matches!(
            model.symbolic_formula(&names[..1]),
            Err(KanError::VariableCount { given: 1, expected: 2 })
        ));
    }

    #[test]
    fn out_of_range_edges_are_rejected() {
        let model = KanConfig::new(vec![2, 2, 1]).init::<TestBackend>(&Default::default());
        let result = model.fix_symbolic(Edge::new(1, 0, 1), SymbolicFn::Sin, None, &AffineSearch::default());
        assert!(matches!(
            result,
            Err(KanError::EdgeOutOfRange { layer: 1, input: 0, output: 1 })
        ));
    }

    #[test]
    fn edge_curves_cover_every_edge_in_order() {
        let model = KanConfig::new(vec![2, 2, 1]).init::<TestBackend>(&Default::default());
        let curves = model
            .edge_curves(points(&[0.9, -0.1, -0.4, 0.2, 0.0, 0.7]))
            .unwrap();
        assert_eq!(curves.len(), 6);
        assert_eq!(curves[5].edge, Edge::new(1, 1, 0));
        for curve in &curves {
            assert_eq!(curve.points.len(), 3);
            assert!(curve.points.windows(2).all(|w| w[0].0 <= w[1].0));
        }
    }
}
