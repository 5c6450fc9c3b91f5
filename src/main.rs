//! # KAN ポアソン方程式ソルバー
//!
//! Kolmogorov-Arnold Network で2次元ポアソン方程式を解き、学習した活性化関数を
//! 閉形式の関数に置き換えて解の数式を取り出します。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train
//! ```
//!
//! ### シンボリック化
//! ```bash
//! cargo run --release -- symbolic
//! cargo run --release -- symbolic --fix 0,0,0,x --fix 1,0,0,cos
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --symbolic
//! ```
//!
//! ログの詳細度は `RUST_LOG` で変更できます (既定は `info`)。

use clap::Parser;
use kan_pinn::cli::{Cli, Commands};
use kan_pinn::{inference, symbolize, training};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Train(args) => training::run(&cli.artifact_dir, args),
        Commands::Symbolic(args) => symbolize::run(&cli.artifact_dir, args),
        Commands::Infer(args) => inference::run(&cli.artifact_dir, args),
    };

    if let Err(e) = result {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}
