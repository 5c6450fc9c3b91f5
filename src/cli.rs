use crate::sampling::Sampling;
use crate::symbolize::EdgeFix;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Solve the 2D Poisson equation with a Kolmogorov-Arnold Network and extract its formula", long_about = None)]
pub struct Cli {
    /// 学習結果を保存するディレクトリ
    #[arg(long, global = true, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train、symbolic、infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// KANモデルを学習し、結果をファイルに保存します
    Train(TrainArgs),
    /// 学習済みモデルのエッジを閉形式関数に固定し、数式を出力します
    Symbolic(SymbolicArgs),
    /// 保存されたモデルを使い、推論を実行します
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 各層のノード数 (カンマ区切り)
    #[arg(long, value_delimiter = ',', default_value = "2,2,1")]
    pub width: Vec<usize>,
    /// グリッドの区間数
    #[arg(long, default_value_t = 5)]
    pub grid: usize,
    /// スプラインの次数
    #[arg(long, default_value_t = 3)]
    pub spline_order: usize,
    #[arg(long, default_value_t = 2000)]
    pub steps: usize,
    #[arg(long, default_value_t = 5e-3)]
    pub lr: f64,
    /// PDE損失の重み
    #[arg(long, default_value_t = 0.1)]
    pub alpha: f64,
    #[arg(long, default_value_t = 100)]
    pub log_every: usize,
    #[arg(long, value_enum, default_value_t = Sampling::Random)]
    pub sampling: Sampling,
    /// 内部点の1辺あたりの数
    #[arg(long, default_value_t = 21)]
    pub interior_points: usize,
    /// 境界の1辺あたりの点数
    #[arg(long, default_value_t = 21)]
    pub boundary_points: usize,
    /// 学習後に順に拡張するグリッド区間数 (例: 10,20)
    #[arg(long, value_delimiter = ',')]
    pub grid_schedule: Vec<usize>,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct SymbolicArgs {
    /// 固定するエッジ `層,入力,出力,関数名`。省略時は最初の層を x、以降を sin に固定
    #[arg(long = "fix", value_name = "L,I,J,FUN")]
    pub fix: Vec<EdgeFix>,
    /// 固定後の再学習ステップ数
    #[arg(long, default_value_t = 500)]
    pub steps: usize,
    #[arg(long, default_value_t = 5e-3)]
    pub lr: f64,
    /// アフィンパラメータのグリッド探索の点数
    #[arg(long, default_value_t = 101)]
    pub grid_number: usize,
    /// 現在の形へのフィットを行わず `(1, 0, 1, 0)` から始める
    #[arg(long)]
    pub no_fit: bool,
    /// 数式の係数を丸める小数点以下の桁数
    #[arg(long, default_value_t = 5)]
    pub digits: usize,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// シンボリックモデルを使う
    #[arg(long)]
    pub symbolic: bool,
    /// 評価する格子の1辺あたりの点数
    #[arg(long, default_value_t = 50)]
    pub resolution: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_defaults() {
        let cli = Cli::try_parse_from(["kan-pinn", "train"]).unwrap();
        assert_eq!(cli.artifact_dir, PathBuf::from("artifacts"));
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.width, vec![2, 2, 1]);
        assert_eq!(args.sampling, Sampling::Random);
        assert!(args.grid_schedule.is_empty());
    }

    #[test]
    fn parses_repeated_fixes() {
        let cli = Cli::try_parse_from([
            "kan-pinn",
            "symbolic",
            "--fix",
            "0,0,0,x",
            "--fix",
            "1,0,0,cos",
            "--artifact-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.artifact_dir, PathBuf::from("out"));
        let Commands::Symbolic(args) = cli.command else {
            panic!("expected symbolic");
        };
        assert_eq!(args.fix.len(), 2);
        assert!(Cli::try_parse_from(["kan-pinn", "symbolic", "--fix", "0,0,sin"]).is_err());
    }
}
