use crate::artifact;
use crate::cli::SymbolicArgs;
use crate::error::KanError;
use crate::layer::AffineSearch;
use crate::model::Edge;
use crate::plot::{plot_activations, plot_loss_history};
use crate::symbolic::SymbolicFn;
use crate::training::{Collocation, FitOptions, TrainingConfig, fit};
use crate::{
    FORMULA_FILENAME, MODEL_FILENAME, SYMBOLIC_ACTIVATIONS_IMAGE, SYMBOLIC_LOSS_IMAGE,
    SYMBOLIC_MODEL_FILENAME, TRAINING_CONFIG_FILENAME,
};
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

type MyBackend = Autodiff<NdArray<f32>>;

/// 固定するエッジと関数。コマンドラインでは `層,入力,出力,関数名` と書きます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeFix {
    pub edge: Edge,
    pub fun: SymbolicFn,
}

impl FromStr for EdgeFix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let &[layer, input, output, fun] = parts.as_slice() else {
            return Err(format!("'{s}' は '層,入力,出力,関数名' の形式ではありません"));
        };
        let index = |v: &str| {
            v.parse::<usize>()
                .map_err(|e| format!("'{v}' はエッジの添字として不正です: {e}"))
        };
        Ok(Self {
            edge: Edge::new(index(layer)?, index(input)?, index(output)?),
            fun: fun.parse().map_err(|e| format!("{e}"))?,
        })
    }
}

/// 既定の固定先。最初の層は恒等関数、それ以降は sin。
pub fn default_fixes(width: &[usize]) -> Vec<EdgeFix> {
    let mut fixes = Vec::new();
    for (l, w) in width.windows(2).enumerate() {
        let fun = if l == 0 {
            SymbolicFn::Identity
        } else {
            SymbolicFn::Sin
        };
        for i in 0..w[0] {
            for j in 0..w[1] {
                fixes.push(EdgeFix {
                    edge: Edge::new(l, i, j),
                    fun,
                });
            }
        }
    }
    fixes
}

/// `symbolic`サブコマンドを実行します。
///
/// 学習済みモデルのエッジを閉形式関数に固定し、アフィンパラメータを再学習してから
/// 数式を出力します。
pub fn run(artifact_dir: &Path, args: &SymbolicArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let model_path = artifact::model_path(artifact_dir, MODEL_FILENAME);
    if !model_path.exists() {
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に 'train' コマンドでモデルを学習・保存してください。",
            model_path.display()
        )
        .into());
    }
    let config = TrainingConfig::load(artifact_dir.join(TRAINING_CONFIG_FILENAME))
        .map_err(|e| KanError::Config(format!("{e:?}")))?;
    config.validate()?;
    let (mut model, kan_config) =
        artifact::load_model::<MyBackend>(artifact_dir, MODEL_FILENAME, &device)?;
    let data = Collocation::<MyBackend>::sample(&config, &device);

    let fixes = if args.fix.is_empty() {
        default_fixes(&model.width())
    } else {
        args.fix.clone()
    };
    let search = AffineSearch {
        grid_number: args.grid_number,
        ..AffineSearch::default()
    };
    for fix in &fixes {
        let samples = (!args.no_fit).then(|| data.interior.clone());
        let (next, fitted) = model.fix_symbolic(fix.edge, fix.fun, samples, &search)?;
        model = next;
        match fitted {
            Some(f) => {
                info!(
                    "エッジ {} を {} に固定しました (r2 = {:.6}, a = {:.4}, b = {:.4}, c = {:.4}, d = {:.4})",
                    fix.edge, fix.fun, f.r2, f.a, f.b, f.c, f.d
                );
                if f.r2 < 0.9 {
                    warn!("エッジ {} の当てはまりが悪いです (r2 = {:.4})", fix.edge, f.r2);
                }
            }
            None => info!("エッジ {} を {} に固定しました", fix.edge, fix.fun),
        }
    }

    let options = FitOptions {
        steps: args.steps,
        learning_rate: args.lr,
        update_grid: false,
        ..FitOptions::from_config(&config)
    };
    let mut history = Vec::new();
    info!("固定後のモデルを {} ステップ再学習します", options.steps);
    model = fit(model, &data, &options, &mut history)?;

    artifact::save_model(&model, &kan_config, artifact_dir, SYMBOLIC_MODEL_FILENAME)?;
    if !history.is_empty() {
        if let Err(e) = plot_loss_history(&artifact_dir.join(SYMBOLIC_LOSS_IMAGE), &history) {
            warn!("損失グラフの描画に失敗しました: {}", e);
        }
    }
    let curves = model.edge_curves(data.interior.clone())?;
    if let Err(e) = plot_activations(&artifact_dir.join(SYMBOLIC_ACTIVATIONS_IMAGE), &curves) {
        warn!("活性化関数の描画に失敗しました: {}", e);
    }

    let variables: Vec<String> = (1..=model.width()[0]).map(|i| format!("x_{i}")).collect();
    let formulas = model.symbolic_formula(&variables)?;
    let mut text = String::new();
    for (j, formula) in formulas.iter().enumerate() {
        let line = if formulas.len() == 1 {
            format!("u = {}", formula.render(args.digits))
        } else {
            format!("u_{} = {}", j + 1, formula.render(args.digits))
        };
        println!("{line}");
        text.push_str(&line);
        text.push('\n');
    }
    let formula_path = artifact_dir.join(FORMULA_FILENAME);
    std::fs::write(&formula_path, text)?;
    info!("数式を '{}' に保存しました。", formula_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_edge_fixes() {
        let fix: EdgeFix = "1, 0, 0, sin".parse().unwrap();
        assert_eq!(fix.edge, Edge::new(1, 0, 0));
        assert_eq!(fix.fun, SymbolicFn::Sin);
        assert_eq!("0,1,0,x".parse::<EdgeFix>().unwrap().fun, SymbolicFn::Identity);

        assert!("1,0,sin".parse::<EdgeFix>().is_err());
        assert!("a,0,0,sin".parse::<EdgeFix>().is_err());
        assert!("0,0,0,sqrt".parse::<EdgeFix>().is_err());
    }

    #[test]
    fn default_fixes_cover_every_edge() {
        let fixes = default_fixes(&[2, 2, 1]);
        assert_eq!(fixes.len(), 6);
        assert!(fixes[..4].iter().all(|f| f.fun == SymbolicFn::Identity && f.edge.layer == 0));
        assert_eq!(
            fixes[4..],
            [
                EdgeFix { edge: Edge::new(1, 0, 0), fun: SymbolicFn::Sin },
                EdgeFix { edge: Edge::new(1, 1, 0), fun: SymbolicFn::Sin },
            ]
        );
    }
}
