use crate::bspline;
use crate::error::KanError;
use crate::host;
use crate::jet::Jet;
use crate::model::KanConfig;
use crate::spline;
use crate::symbolic::{AffineFit, SymbolicFn, fit_affine};
use burn::module::{Module, Param, ParamId};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::{sigmoid, silu};
use nalgebra::DMatrix;
use rand::Rng;

/// KANの1層。入力 `in_dim` と出力 `out_dim` の全組 (エッジ) に1変数の活性化関数を持ちます。
///
/// エッジ `(i, j)` の活性化関数は
///
/// `φ_ij(x) = mask_ij (scale_base_ij silu(x) + scale_sp_ij spline_ij(x)) + sym_ij (c f(a x + b) + d)`
///
/// で、出力ノード `j` は入力側のエッジの和です。`sym_ij` は固定された
/// シンボリック関数のワンホットから決まります。
#[derive(Module, Debug)]
pub struct KanLayer<B: Backend> {
    /// `[in, G + 2k + 1]` のノット。学習対象外
    grid: Param<Tensor<B, 2>>,
    /// `[in, out, G + k]`
    coef: Param<Tensor<B, 3>>,
    scale_base: Param<Tensor<B, 2>>,
    scale_sp: Param<Tensor<B, 2>>,
    /// スプライン側のマスク。学習対象外
    mask: Param<Tensor<B, 2>>,
    /// `[in, out, F]` のワンホット。学習対象外
    symbolic: Param<Tensor<B, 3>>,
    /// `[in, out, 4]` の `(a, b, c, d)`
    affine: Param<Tensor<B, 3>>,
    in_dim: usize,
    out_dim: usize,
    grid_size: usize,
    spline_order: usize,
    grid_eps: f64,
}

/// エッジごとの活性化関数値と、その入力に関する1階・2階微分。各 `[batch, in, out]`。
#[derive(Debug, Clone)]
pub struct EdgeJet<B: Backend> {
    pub value: Tensor<B, 3>,
    pub d1: Tensor<B, 3>,
    pub d2: Tensor<B, 3>,
}

/// ホスト側から見た1本のエッジの状態。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeState {
    /// スプライン側が有効か
    pub numeric: bool,
    pub symbolic: Option<SymbolicFn>,
    /// `(a, b, c, d)`
    pub affine: [f64; 4],
}

/// シンボリック関数のアフィンパラメータ探索範囲。
#[derive(Debug, Clone, Copy)]
pub struct AffineSearch {
    pub a_range: (f64, f64),
    pub b_range: (f64, f64),
    pub grid_number: usize,
}

impl Default for AffineSearch {
    fn default() -> Self {
        Self {
            a_range: (-10.0, 10.0),
            b_range: (-10.0, 10.0),
            grid_number: 101,
        }
    }
}

fn frozen<B: Backend, const D: usize>(id: ParamId, value: Tensor<B, D>) -> Param<Tensor<B, D>> {
    Param::initialized(id, value.detach().set_require_grad(false))
}

fn trainable<B: Backend, const D: usize>(id: ParamId, value: Tensor<B, D>) -> Param<Tensor<B, D>> {
    Param::initialized(id, value.detach().require_grad())
}

impl<B: Backend> KanLayer<B> {
    /// 新しい層を初期化します。
    ///
    /// スプライン係数は `noise_scale / G` 程度の小さな乱数、`scale_base` は
    /// `(mu + sigma U(-1, 1)) / sqrt(in)` で初期化します。
    pub fn new<R: Rng>(
        config: &KanConfig,
        in_dim: usize,
        out_dim: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let k = config.spline_order;
        let g = config.grid_size;
        let knots = bspline::extend_knots(
            &bspline::uniform_knots(config.grid_range[0], config.grid_range[1], g),
            k,
        );
        let n_knots = knots.len();
        let n_basis = g + k;
        let edges = in_dim * out_dim;
        let norm = (in_dim as f64).sqrt();

        let grid: Vec<f64> = (0..in_dim).flat_map(|_| knots.iter().copied()).collect();
        let coef: Vec<f64> = (0..edges * n_basis)
            .map(|_| (rng.random::<f64>() - 0.5) * config.noise_scale / g as f64)
            .collect();
        let scale_base: Vec<f64> = (0..edges)
            .map(|_| {
                config.scale_base_mu / norm
                    + config.scale_base_sigma * (rng.random::<f64>() * 2.0 - 1.0) / norm
            })
            .collect();

        Self {
            grid: frozen(ParamId::new(), host::from_f64(&grid, [in_dim, n_knots], device)),
            coef: trainable(
                ParamId::new(),
                host::from_f64(&coef, [in_dim, out_dim, n_basis], device),
            ),
            scale_base: trainable(
                ParamId::new(),
                host::from_f64(&scale_base, [in_dim, out_dim], device),
            ),
            scale_sp: trainable(
                ParamId::new(),
                Tensor::ones([in_dim, out_dim], device).div_scalar(norm),
            ),
            mask: frozen(ParamId::new(), Tensor::ones([in_dim, out_dim], device)),
            symbolic: frozen(
                ParamId::new(),
                Tensor::zeros([in_dim, out_dim, SymbolicFn::COUNT], device),
            ),
            affine: trainable(ParamId::new(), Tensor::zeros([in_dim, out_dim, 4], device)),
            in_dim,
            out_dim,
            grid_size: g,
            spline_order: k,
            grid_eps: config.grid_eps,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// 順伝播。`[batch, in] -> [batch, out]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.activations(x).sum_dim(1).squeeze::<2>(1)
    }

    /// ジェットを1層ぶん伝播させます。
    ///
    /// `∇y_j = Σ_i φ'_ij ∇x_i`、`Δy_j = Σ_i (φ''_ij |∇x_i|² + φ'_ij Δx_i)`
    pub fn forward_jet(&self, jet: Jet<B>) -> Jet<B> {
        let grad_sq = jet.gradient_norm_sq().unsqueeze_dim::<3>(2);
        let edges = self.activations_with_derivatives(jet.value);
        let gradient = jet
            .gradient
            .into_iter()
            .map(|g| (edges.d1.clone() * g.unsqueeze_dim::<3>(2)).sum_dim(1).squeeze::<2>(1))
            .collect();
        let laplacian = (edges.d2 * grad_sq
            + edges.d1 * jet.laplacian.unsqueeze_dim::<3>(2))
        .sum_dim(1)
        .squeeze::<2>(1);
        Jet {
            value: edges.value.sum_dim(1).squeeze::<2>(1),
            gradient,
            laplacian,
        }
    }

    /// エッジごとの活性化関数値 `[batch, in, out]`。
    pub fn activations(&self, x: Tensor<B, 2>) -> Tensor<B, 3> {
        self.numeric_activations(x.clone()) + self.symbolic_activations(x)
    }

    /// スプライン側だけの活性化関数値。
    pub fn numeric_activations(&self, x: Tensor<B, 2>) -> Tensor<B, 3> {
        let basis = spline::basis(x.clone(), self.grid.val(), self.spline_order);
        let base = silu(x).unsqueeze_dim::<3>(2) * self.edge_param(&self.scale_base);
        (base + self.contract(basis) * self.edge_param(&self.scale_sp)) * self.edge_param(&self.mask)
    }

    fn symbolic_activations(&self, x: Tensor<B, 2>) -> Tensor<B, 3> {
        let [a, b, c, d] = self.affine_params();
        let z = x.unsqueeze_dim::<3>(2) * a + b;
        let f = SymbolicFn::ALL
            .iter()
            .fold(z.zeros_like(), |acc, &fun| acc + fun.forward(z.clone()) * self.selector(fun));
        (f * c + d) * self.symbolic_mask()
    }

    pub fn activations_with_derivatives(&self, x: Tensor<B, 2>) -> EdgeJet<B> {
        let numeric = self.numeric_with_derivatives(x.clone());
        let symbolic = self.symbolic_with_derivatives(x);
        EdgeJet {
            value: numeric.value + symbolic.value,
            d1: numeric.d1 + symbolic.d1,
            d2: numeric.d2 + symbolic.d2,
        }
    }

    fn numeric_with_derivatives(&self, x: Tensor<B, 2>) -> EdgeJet<B> {
        let basis = spline::basis_with_derivatives(x.clone(), self.grid.val(), self.spline_order);
        let scale_base = self.edge_param(&self.scale_base);
        let scale_sp = self.edge_param(&self.scale_sp);
        let mask = self.edge_param(&self.mask);

        // silu(x) = x s, silu' = s + x s(1-s), silu'' = s(1-s)(2 + x(1-2s))
        let s = sigmoid(x.clone());
        let ds = s.clone() * s.clone().neg().add_scalar(1.0);
        let base = x.clone() * s.clone();
        let base_d1 = s.clone() + x.clone() * ds.clone();
        let base_d2 = ds * (x * s.mul_scalar(-2.0).add_scalar(1.0)).add_scalar(2.0);

        let edge = |base: Tensor<B, 2>, spline: Tensor<B, 3>| {
            (base.unsqueeze_dim::<3>(2) * scale_base.clone()
                + self.contract(spline) * scale_sp.clone())
                * mask.clone()
        };
        EdgeJet {
            value: edge(base, basis.value),
            d1: edge(base_d1, basis.d1),
            d2: edge(base_d2, basis.d2),
        }
    }

    fn symbolic_with_derivatives(&self, x: Tensor<B, 2>) -> EdgeJet<B> {
        let [a, b, c, d] = self.affine_params();
        let symbolic_mask = self.symbolic_mask();
        let z = x.unsqueeze_dim::<3>(2) * a.clone() + b;
        let zero = z.zeros_like();
        let [f, f1, f2] = SymbolicFn::ALL.iter().fold(
            [zero.clone(), zero.clone(), zero],
            |[f, f1, f2], &fun| {
                let sel = self.selector(fun);
                let [g, g1, g2] = fun.forward_with_derivatives(z.clone());
                [f + g * sel.clone(), f1 + g1 * sel.clone(), f2 + g2 * sel]
            },
        );
        let ca = c.clone() * a.clone();
        EdgeJet {
            value: (f * c + d) * symbolic_mask.clone(),
            d1: f1 * ca.clone() * symbolic_mask.clone(),
            d2: f2 * ca * a * symbolic_mask,
        }
    }

    /// `[batch, in, n_basis]` の基底とスプライン係数の縮約 `[batch, in, out]`。
    fn contract(&self, basis: Tensor<B, 3>) -> Tensor<B, 3> {
        basis
            .swap_dims(0, 1)
            .matmul(self.coef.val().swap_dims(1, 2))
            .swap_dims(0, 1)
    }

    fn edge_param(&self, param: &Param<Tensor<B, 2>>) -> Tensor<B, 3> {
        param.val().unsqueeze_dim::<3>(0)
    }

    fn affine_params(&self) -> [Tensor<B, 3>; 4] {
        let shape = [1, self.in_dim, self.out_dim];
        let affine = self.affine.val();
        [0, 1, 2, 3].map(|idx| affine.clone().narrow(2, idx, 1).reshape(shape))
    }

    fn selector(&self, fun: SymbolicFn) -> Tensor<B, 3> {
        self.symbolic
            .val()
            .narrow(2, fun.index(), 1)
            .reshape([1, self.in_dim, self.out_dim])
    }

    fn symbolic_mask(&self) -> Tensor<B, 3> {
        self.symbolic
            .val()
            .sum_dim(2)
            .reshape([1, self.in_dim, self.out_dim])
    }

    /// サンプル点の分布に合わせてグリッドを置き直します。
    ///
    /// 入力ごとにサンプルを整列し、分位点に置いた適応グリッドと一様グリッドを
    /// `grid_eps` で混ぜます。スプライン係数はサンプル点での値が変わらない
    /// ように最小二乗法でフィットし直します。
    pub fn update_grid_from_samples(self, x: Tensor<B, 2>) -> Result<Self, KanError> {
        let [batch, _] = x.dims();
        if batch == 0 {
            return Err(KanError::EmptySamples);
        }
        let xs = host::to_vec_f64(x)?;
        let columns: Vec<Vec<f64>> = (0..self.in_dim)
            .map(|i| {
                let mut column: Vec<f64> = (0..batch).map(|r| xs[r * self.in_dim + i]).collect();
                column.sort_by(|a, b| a.total_cmp(b));
                column
            })
            .collect();
        let intervals = self.grid_size;
        let (k, eps) = (self.spline_order, self.grid_eps);
        self.refit(intervals, move |i, _| {
            let knots = bspline::extend_knots(&adaptive_knots(&columns[i], intervals, eps), k);
            (columns[i].clone(), knots)
        })
    }

    /// グリッドの区間数を `grid_size` に変更します。
    ///
    /// 現在のグリッドの内側の範囲に一様なグリッドを作り、元のスプラインを
    /// その範囲でサンプルしてフィットし直します。
    pub fn refine(self, grid_size: usize) -> Result<Self, KanError> {
        let k = self.spline_order;
        let old_size = self.grid_size;
        let samples = 4 * (grid_size + k) + 1;
        self.refit(grid_size, move |_, old_knots| {
            let (lo, hi) = (old_knots[k], old_knots[k + old_size]);
            let xs: Vec<f64> = (0..samples)
                .map(|s| lo + (hi - lo) * s as f64 / (samples - 1) as f64)
                .collect();
            let knots = bspline::extend_knots(&bspline::uniform_knots(lo, hi, grid_size), k);
            (xs, knots)
        })
    }

    /// 入力ごとに `plan` が返すサンプル点と新しいノットで係数をフィットし直します。
    fn refit<P>(mut self, grid_size: usize, plan: P) -> Result<Self, KanError>
    where
        P: Fn(usize, &[f64]) -> (Vec<f64>, Vec<f64>),
    {
        if grid_size == 0 {
            return Err(KanError::InvalidConfig(
                "グリッドの区間数は1以上でなければなりません".to_string(),
            ));
        }
        let device = self.grid.val().device();
        let k = self.spline_order;
        let (in_dim, out_dim) = (self.in_dim, self.out_dim);
        let old_knots_len = self.grid_size + 2 * k + 1;
        let old_basis = self.grid_size + k;
        let new_knots_len = grid_size + 2 * k + 1;
        let new_basis = grid_size + k;

        let grid = host::to_vec_f64(self.grid.val())?;
        let coef = host::to_vec_f64(self.coef.val())?;

        let mut new_grid = Vec::with_capacity(in_dim * new_knots_len);
        let mut new_coef = vec![0.0; in_dim * out_dim * new_basis];
        for i in 0..in_dim {
            let old_knots = &grid[i * old_knots_len..(i + 1) * old_knots_len];
            let (xs, knots) = plan(i, old_knots);
            let ys = DMatrix::from_fn(xs.len(), out_dim, |r, o| {
                let offset = (i * out_dim + o) * old_basis;
                bspline::evaluate(xs[r], old_knots, &coef[offset..offset + old_basis], k)
            });
            let fitted = bspline::fit_coefficients(&xs, &ys, &knots, k)?;
            for o in 0..out_dim {
                for m in 0..new_basis {
                    new_coef[(i * out_dim + o) * new_basis + m] = fitted[(m, o)];
                }
            }
            new_grid.extend(knots);
        }

        self.grid = frozen(
            self.grid.id,
            host::from_f64(&new_grid, [in_dim, new_knots_len], &device),
        );
        self.coef = trainable(
            self.coef.id,
            host::from_f64(&new_coef, [in_dim, out_dim, new_basis], &device),
        );
        self.grid_size = grid_size;
        Ok(self)
    }

    /// エッジ `(input, output)` をシンボリック関数 `fun` に固定します。
    ///
    /// `samples` にこの層への入力を渡すと、現在のスプラインの形に合うように
    /// アフィンパラメータをフィットします。渡さなければ `(1, 0, 1, 0)` です。
    pub fn fix_symbolic(
        self,
        input: usize,
        output: usize,
        fun: SymbolicFn,
        samples: Option<Tensor<B, 2>>,
        search: &AffineSearch,
    ) -> Result<(Self, Option<AffineFit>), KanError> {
        let fit = match samples {
            Some(x) => {
                let [batch, _] = x.dims();
                if batch == 0 {
                    return Err(KanError::EmptySamples);
                }
                let values = host::to_vec_f64(self.numeric_activations(x.clone()))?;
                let xs = host::to_vec_f64(x)?;
                let inputs: Vec<f64> = (0..batch).map(|r| xs[r * self.in_dim + input]).collect();
                let targets: Vec<f64> = (0..batch)
                    .map(|r| values[(r * self.in_dim + input) * self.out_dim + output])
                    .collect();
                Some(fit_affine(
                    &inputs,
                    &targets,
                    fun,
                    search.a_range,
                    search.b_range,
                    search.grid_number,
                )?)
            }
            None => None,
        };
        let [a, b, c, d] = fit.map_or([1.0, 0.0, 1.0, 0.0], |f| [f.a, f.b, f.c, f.d]);
        let layer = self.set_edge(input, output, false, Some(fun), [a, b, c, d])?;
        Ok((layer, fit))
    }

    /// エッジをスプラインに戻します。
    pub fn unfix_symbolic(self, input: usize, output: usize) -> Result<Self, KanError> {
        self.set_edge(input, output, true, None, [0.0; 4])
    }

    pub(crate) fn set_edge(
        mut self,
        input: usize,
        output: usize,
        numeric: bool,
        symbolic: Option<SymbolicFn>,
        affine: [f64; 4],
    ) -> Result<Self, KanError> {
        let device = self.grid.val().device();
        let (in_dim, out_dim) = (self.in_dim, self.out_dim);
        let edge = input * out_dim + output;

        let mut mask = host::to_vec_f64(self.mask.val())?;
        mask[edge] = if numeric { 1.0 } else { 0.0 };

        let mut onehot = host::to_vec_f64(self.symbolic.val())?;
        let row = &mut onehot[edge * SymbolicFn::COUNT..(edge + 1) * SymbolicFn::COUNT];
        row.fill(0.0);
        if let Some(fun) = symbolic {
            row[fun.index()] = 1.0;
        }

        let mut params = host::to_vec_f64(self.affine.val())?;
        params[edge * 4..(edge + 1) * 4].copy_from_slice(&affine);

        self.mask = frozen(self.mask.id, host::from_f64(&mask, [in_dim, out_dim], &device));
        self.symbolic = frozen(
            self.symbolic.id,
            host::from_f64(&onehot, [in_dim, out_dim, SymbolicFn::COUNT], &device),
        );
        self.affine = trainable(
            self.affine.id,
            host::from_f64(&params, [in_dim, out_dim, 4], &device),
        );
        Ok(self)
    }

    /// 全エッジの状態を `input * out_dim + output` の順で返します。
    pub fn edge_states(&self) -> Result<Vec<EdgeState>, KanError> {
        let mask = host::to_vec_f64(self.mask.val())?;
        let onehot = host::to_vec_f64(self.symbolic.val())?;
        let affine = host::to_vec_f64(self.affine.val())?;
        Ok((0..self.in_dim * self.out_dim)
            .map(|edge| {
                let row = &onehot[edge * SymbolicFn::COUNT..(edge + 1) * SymbolicFn::COUNT];
                EdgeState {
                    numeric: mask[edge] != 0.0,
                    symbolic: row
                        .iter()
                        .position(|&v| v > 0.5)
                        .and_then(SymbolicFn::from_index),
                    affine: [
                        affine[edge * 4],
                        affine[edge * 4 + 1],
                        affine[edge * 4 + 2],
                        affine[edge * 4 + 3],
                    ],
                }
            })
            .collect())
    }
}

/// 整列済みのサンプルから、分位点の適応グリッドと一様グリッドを `eps` で混ぜたノットを作ります。
fn adaptive_knots(sorted: &[f64], intervals: usize, eps: f64) -> Vec<f64> {
    let batch = sorted.len();
    let mut adaptive: Vec<f64> = (0..intervals)
        .map(|g| sorted[batch * g / intervals])
        .collect();
    adaptive.push(sorted[batch - 1]);

    let (mut lo, mut hi) = (adaptive[0], adaptive[intervals]);
    if hi - lo < 1e-6 {
        // 全サンプルがほぼ同じ値のときは一様グリッドだけを使う
        lo -= 0.5;
        hi += 0.5;
        return bspline::uniform_knots(lo, hi, intervals);
    }
    let uniform = bspline::uniform_knots(lo, hi, intervals);
    uniform
        .iter()
        .zip(&adaptive)
        .map(|(u, a)| eps * u + (1.0 - eps) * a)
        .collect()
}
