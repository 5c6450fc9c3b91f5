use crate::artifact;
use crate::cli::InferArgs;
use crate::host;
use crate::pinn::exact;
use crate::plot::plot_solution;
use crate::sampling;
use crate::{ERROR_IMAGE, MODEL_FILENAME, SOLUTION_IMAGE, SYMBOLIC_MODEL_FILENAME};
use burn::backend::NdArray;
use std::path::Path;
use std::time::Instant;
use tracing::info;

type MyBackend = NdArray<f32>;

/// 格子上での誤差の集計。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorSummary {
    pub rmse: f64,
    pub max: f64,
}

/// 予測値と厳密解の差を集計します。
pub fn summarize_errors(points: &[[f64; 2]], predictions: &[f32]) -> ErrorSummary {
    let (sum_sq, max) = points
        .iter()
        .zip(predictions)
        .map(|(p, &u)| (u as f64 - exact(p[0], p[1])).abs())
        .fold((0.0, 0.0_f64), |(s, m), e| (s + e * e, m.max(e)));
    let rmse = if points.is_empty() {
        0.0
    } else {
        (sum_sq / points.len() as f64).sqrt()
    };
    ErrorSummary { rmse, max }
}

/// `infer`サブコマンドを実行します。
pub fn run(artifact_dir: &Path, args: &InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let name = if args.symbolic {
        SYMBOLIC_MODEL_FILENAME
    } else {
        MODEL_FILENAME
    };
    let model_path = artifact::model_path(artifact_dir, name);
    if !model_path.exists() {
        let command = if args.symbolic { "symbolic" } else { "train" };
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に '{}' コマンドでモデルを学習・保存してください。",
            model_path.display(),
            command
        )
        .into());
    }

    info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();
    info!("保存済みモデルを '{}' からロード中...", model_path.display());
    let (model, _) = artifact::load_model::<MyBackend>(artifact_dir, name, &device)?;

    let n = args.resolution;
    let points = sampling::mesh(n, -1.0, 1.0);
    let coords = sampling::to_tensor::<MyBackend>(&points, &device);
    let predictions = host::to_vec(model.forward(coords))?;
    let summary = summarize_errors(&points, &predictions);
    info!(
        "推論が完了しました。格子: {}x{}={}, 推論時間: {:.2?}",
        n,
        n,
        n * n,
        inference_start.elapsed()
    );
    info!("RMSE: {:.3e}, 最大誤差: {:.3e}", summary.rmse, summary.max);

    let solution_path = artifact_dir.join(SOLUTION_IMAGE);
    plot_solution(&solution_path, n, &predictions, "KAN solution u(x, y)")?;
    let errors: Vec<f32> = points
        .iter()
        .zip(&predictions)
        .map(|(p, &u)| (u as f64 - exact(p[0], p[1])).abs() as f32)
        .collect();
    plot_solution(&artifact_dir.join(ERROR_IMAGE), n, &errors, "|u - u_exact|")?;
    info!("解のヒートマップを '{}' に保存しました。", solution_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_predictions_have_no_error() {
        let points = sampling::mesh(9, -1.0, 1.0);
        let predictions: Vec<f32> = points.iter().map(|p| exact(p[0], p[1]) as f32).collect();
        let summary = summarize_errors(&points, &predictions);
        assert!(summary.rmse < 1e-6);
        assert!(summary.max < 1e-6);
    }

    #[test]
    fn constant_offset_shows_up_in_both_measures() {
        let points = sampling::mesh(5, -1.0, 1.0);
        let predictions: Vec<f32> = points
            .iter()
            .map(|p| exact(p[0], p[1]) as f32 + 0.25)
            .collect();
        let summary = summarize_errors(&points, &predictions);
        assert!((summary.rmse - 0.25).abs() < 1e-5);
        assert!((summary.max - 0.25).abs() < 1e-5);
    }
}
