//! 学習済みモデルと構成ファイルの保存・読み込み。

use crate::KAN_CONFIG_FILENAME;
use crate::error::KanError;
use crate::model::{Kan, KanConfig};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::path::{Path, PathBuf};

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// 保存先のファイルパス (拡張子 `.mpk` 付き)。
pub fn model_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name).with_extension("mpk")
}

/// モデルの重みと、現在のグリッドサイズを反映した構成を保存します。
pub fn save_model<B: Backend>(
    model: &Kan<B>,
    config: &KanConfig,
    dir: &Path,
    name: &str,
) -> Result<(), KanError> {
    config
        .clone()
        .with_grid_size(model.grid_size())
        .save(dir.join(KAN_CONFIG_FILENAME))?;
    model.clone().save_file(dir.join(name), &Recorder::new())?;
    Ok(())
}

/// 保存済みの構成からモデルを組み立て、重みを読み込みます。
pub fn load_model<B: Backend>(
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<(Kan<B>, KanConfig), KanError> {
    let config = KanConfig::load(dir.join(KAN_CONFIG_FILENAME))
        .map_err(|e| KanError::Config(format!("{e:?}")))?;
    let model = config
        .init::<B>(device)
        .load_file(dir.join(name), &Recorder::new(), device)?;
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Edge;
    use crate::sampling;
    use crate::symbolic::SymbolicFn;
    use crate::layer::AffineSearch;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn saved_model_reloads_with_the_same_outputs() {
        let device = Default::default();
        let dir = std::env::temp_dir().join(format!("kan-pinn-artifact-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let config = KanConfig::new(vec![2, 2, 1]);
        let model = config
            .init::<TestBackend>(&device)
            .refine(7)
            .unwrap()
            .fix_symbolic(Edge::new(1, 0, 0), SymbolicFn::Sin, None, &AffineSearch::default())
            .unwrap()
            .0;
        save_model(&model, &config, &dir, "model").unwrap();
        assert!(model_path(&dir, "model").exists());

        let (loaded, loaded_config) = load_model::<TestBackend>(&dir, "model", &device).unwrap();
        assert_eq!(loaded_config.grid_size, 7);
        let x = sampling::to_tensor::<TestBackend>(&sampling::mesh(4, -1.0, 1.0), &device);
        let a = model.forward(x.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.forward(x).into_data().to_vec::<f32>().unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert!((a - b).abs() < 1e-6);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_config_is_reported() {
        let device = Default::default();
        let dir = std::env::temp_dir().join("kan-pinn-artifact-missing");
        let err = load_model::<TestBackend>(&dir, "model", &device).unwrap_err();
        assert!(matches!(err, KanError::Config(_)));
    }
}
