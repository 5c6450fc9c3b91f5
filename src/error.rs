use burn::record::RecorderError;
use thiserror::Error;

/// ライブラリ全体で使うエラー型。
#[derive(Debug, Error)]
pub enum KanError {
    /// テンソルからホスト側データへの変換に失敗した
    #[error("テンソルデータの読み出しに失敗しました: {0}")]
    Data(String),

    /// 最小二乗法による係数フィットに失敗した
    #[error("スプライン係数の最小二乗フィットに失敗しました: {0}")]
    LeastSquares(&'static str),

    #[error("サンプル点が空です")]
    EmptySamples,

    #[error("エッジ ({layer}, {input}, {output}) はネットワークの範囲外です")]
    EdgeOutOfRange {
        layer: usize,
        input: usize,
        output: usize,
    },

    #[error("未知のシンボリック関数です: '{0}'")]
    UnknownFunction(String),

    /// 数式を取り出す時点で、まだスプラインのままのエッジが残っている
    #[error("エッジ ({layer}, {input}, {output}) がシンボリック関数に固定されていません")]
    NotSymbolic {
        layer: usize,
        input: usize,
        output: usize,
    },

    #[error("変数名の数 ({given}) が入力次元 ({expected}) と一致しません")]
    VariableCount { given: usize, expected: usize },

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    /// 学習設定の値が問題の形に合わない
    #[error("設定が不正です: {0}")]
    InvalidConfig(String),

    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
