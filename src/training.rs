use crate::artifact;
use crate::cli::TrainArgs;
use crate::error::KanError;
use crate::model::{Kan, KanConfig};
use crate::pinn::{boundary_loss, l2_error, pde_loss};
use crate::plot::{plot_activations, plot_loss_history};
use crate::sampling::{self, Sampling};
use crate::{ACTIVATIONS_IMAGE, LOSS_IMAGE, MODEL_FILENAME, TRAINING_CONFIG_FILENAME};
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

type MyBackend = Autodiff<NdArray<f32>>;

/// 学習の設定。
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: KanConfig,
    /// PDE損失の重み。損失は `alpha * pde + bc`
    #[config(default = 0.1)]
    pub alpha: f64,
    #[config(default = 2000)]
    pub steps: usize,
    #[config(default = 5e-3)]
    pub learning_rate: f64,
    /// このステップ間隔でグリッドをサンプル点に合わせて更新する
    #[config(default = 5)]
    pub grid_update_every: usize,
    /// このステップ以降はグリッドを更新しない
    #[config(default = 50)]
    pub stop_grid_update_step: usize,
    #[config(default = 100)]
    pub log_every: usize,
    /// 内部点の1辺あたりの数
    #[config(default = 21)]
    pub interior_points: usize,
    /// 境界の1辺あたりの点数
    #[config(default = 21)]
    pub boundary_points: usize,
    #[config(default = "Sampling::Random")]
    pub sampling: Sampling,
    /// 最初の学習の後に順に拡張するグリッド区間数
    #[config(default = "Vec::new()")]
    pub grid_schedule: Vec<usize>,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// コマンドライン引数から設定を作り、値を検査します。
    pub fn from_args(args: &TrainArgs) -> Result<Self, KanError> {
        let model = KanConfig::new(args.width.clone())
            .with_grid_size(args.grid)
            .with_spline_order(args.spline_order)
            .with_seed(args.seed);
        let config = TrainingConfig::new(model)
            .with_alpha(args.alpha)
            .with_steps(args.steps)
            .with_learning_rate(args.lr)
            .with_log_every(args.log_every)
            .with_interior_points(args.interior_points)
            .with_boundary_points(args.boundary_points)
            .with_sampling(args.sampling)
            .with_grid_schedule(args.grid_schedule.clone())
            .with_seed(args.seed);
        config.validate()?;
        Ok(config)
    }

    /// 2次元入力・スカラー出力のネットワークとして学習できる設定かを調べます。
    pub fn validate(&self) -> Result<(), KanError> {
        let width = &self.model.width;
        if width.len() < 2 || width[0] != 2 || width[width.len() - 1] != 1 {
            return Err(KanError::InvalidConfig(format!(
                "幅 {width:?} は入力2・出力1でなければなりません"
            )));
        }
        if width.contains(&0) {
            return Err(KanError::InvalidConfig(format!(
                "幅 {width:?} に0のノードを含む層があります"
            )));
        }
        if self.model.grid_size == 0 {
            return Err(KanError::InvalidConfig(
                "グリッドの区間数は1以上でなければなりません".to_string(),
            ));
        }
        if self.grid_schedule.contains(&0) {
            return Err(KanError::InvalidConfig(format!(
                "グリッド拡張の区間数 {:?} に0が含まれています",
                self.grid_schedule
            )));
        }
        if self.interior_points == 0 || self.boundary_points == 0 {
            return Err(KanError::InvalidConfig(
                "コロケーション点の数は1以上でなければなりません".to_string(),
            ));
        }
        Ok(())
    }
}

/// 学習に使うコロケーション点。
#[derive(Debug, Clone)]
pub struct Collocation<B: Backend> {
    pub interior: Tensor<B, 2>,
    pub boundary: Tensor<B, 2>,
}

impl<B: Backend> Collocation<B> {
    pub fn sample(config: &TrainingConfig, device: &B::Device) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let interior = sampling::interior_points(config.interior_points, config.sampling, &mut rng);
        let boundary = sampling::boundary_points(config.boundary_points);
        Self {
            interior: sampling::to_tensor(&interior, device),
            boundary: sampling::to_tensor(&boundary, device),
        }
    }
}

/// 1回の学習ループの設定。
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub steps: usize,
    pub learning_rate: f64,
    pub alpha: f64,
    pub grid_update_every: usize,
    pub stop_grid_update_step: usize,
    pub log_every: usize,
    pub update_grid: bool,
}

impl FitOptions {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            steps: config.steps,
            learning_rate: config.learning_rate,
            alpha: config.alpha,
            grid_update_every: config.grid_update_every,
            stop_grid_update_step: config.stop_grid_update_step,
            log_every: config.log_every.max(1),
            update_grid: true,
        }
    }

    fn grid_update_due(&self, step: usize) -> bool {
        self.update_grid
            && self.grid_update_every > 0
            && step % self.grid_update_every == 0
            && step < self.stop_grid_update_step
    }
}

/// 記録した損失。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossRecord {
    pub step: usize,
    pub pde: f32,
    pub bc: f32,
    pub l2: f32,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

/// PDE損失と境界損失の和を Adam で最小化します。
///
/// 記録した損失は `history` に追記し、ステップ番号は前回の続きから数えます。
pub fn fit<B: AutodiffBackend>(
    mut model: Kan<B>,
    data: &Collocation<B>,
    options: &FitOptions,
    history: &mut Vec<LossRecord>,
) -> Result<Kan<B>, KanError> {
    let mut optim = AdamConfig::new().init();
    let offset = history.last().map_or(0, |r| r.step);

    for step in 0..options.steps {
        if options.grid_update_due(step) {
            debug!("ステップ {} でグリッドを更新します", offset + step);
            model = model.update_grid_from_samples(data.interior.clone())?;
        }

        let loss_pde = pde_loss(&model, data.interior.clone());
        let loss_bc = boundary_loss(&model, data.boundary.clone());
        let total_loss = loss_pde.clone().mul_scalar(options.alpha) + loss_bc.clone();

        let last = step + 1 == options.steps;
        if step == 0 || (step + 1) % options.log_every == 0 || last {
            let record = LossRecord {
                step: offset + step + 1,
                pde: scalar(loss_pde),
                bc: scalar(loss_bc),
                l2: scalar(l2_error(&model, data.interior.clone())),
            };
            info!(
                "[Step {}] PDE Loss: {:.2e}, BC Loss: {:.2e}, L2: {:.2e}",
                record.step, record.pde, record.bc, record.l2
            );
            history.push(record);
        }

        let grads = total_loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(options.learning_rate, model, grads);
    }
    Ok(model)
}

/// `train`サブコマンドを実行します。
pub fn run(artifact_dir: &Path, args: &TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let config = TrainingConfig::from_args(args)?;
    std::fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join(TRAINING_CONFIG_FILENAME))?;

    let data = Collocation::<MyBackend>::sample(&config, &device);
    let mut model = config.model.init::<MyBackend>(&device);
    let options = FitOptions::from_config(&config);
    let mut history = Vec::new();

    info!(
        "学習を開始します (ポアソン方程式) - 幅: {:?}, グリッド: {}, 内部点: {}, 境界点: {}",
        model.width(),
        model.grid_size(),
        data.interior.dims()[0],
        data.boundary.dims()[0]
    );
    let training_start = Instant::now();
    model = fit(model, &data, &options, &mut history)?;
    for &grid_size in &config.grid_schedule {
        info!("グリッドを {} 区間に拡張します", grid_size);
        model = model.refine(grid_size)?;
        model = fit(model, &data, &options, &mut history)?;
    }
    info!("学習が完了しました。学習時間: {:.2?}", training_start.elapsed());

    artifact::save_model(&model, &config.model, artifact_dir, MODEL_FILENAME)?;
    info!(
        "モデルを '{}' に保存しました。",
        artifact::model_path(artifact_dir, MODEL_FILENAME).display()
    );

    let loss_path = artifact_dir.join(LOSS_IMAGE);
    match plot_loss_history(&loss_path, &history) {
        Ok(()) => info!("損失グラフを '{}' に保存しました。", loss_path.display()),
        Err(e) => warn!("損失グラフの描画に失敗しました: {}", e),
    }
    let curves = model.edge_curves(data.interior.clone())?;
    let activations_path = artifact_dir.join(ACTIVATIONS_IMAGE);
    match plot_activations(&activations_path, &curves) {
        Ok(()) => info!("活性化関数を '{}' に保存しました。", activations_path.display()),
        Err(e) => warn!("活性化関数の描画に失敗しました: {}", e),
    }
    Ok(())
}
