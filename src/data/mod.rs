use std::collections::HashSet;

use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::prelude::*;
use rand_distr::Normal;

use crate::error::{GsdnError, Result as GsdnResult};
use crate::sparse::{Coord, SparseTensor};

/// Parameters of a random sparse scene.
#[derive(Config, Debug)]
pub struct SceneConfig {
    /// Voxels in the input tensor (capped by the grid size).
    #[config(default = 512)]
    pub num_voxels: usize,
    /// Grid cells per axis at the scene's tensor stride.
    #[config(default = 16)]
    pub extent: usize,
    #[config(default = 4)]
    pub tensor_stride: usize,
    #[config(default = 1)]
    pub batch_size: usize,
    /// Size of the skip tensor relative to the input, 0 for no skip.
    #[config(default = 0.5)]
    pub skip_fraction: f64,
    #[config(default = 42)]
    pub seed: u64,
}

/// Input of one GSDN block.
#[derive(Clone, Debug)]
pub struct Scene<B: Backend> {
    pub input: SparseTensor<B>,
    pub skip: Option<SparseTensor<B>>,
}

/// Reproducible random scene with Gaussian features.
pub fn random_scene<B: Backend>(
    config: &SceneConfig,
    channels: usize,
    device: &B::Device,
) -> GsdnResult<Scene<B>> {
    if config.extent == 0 || config.batch_size == 0 || config.tensor_stride == 0 {
        return Err(GsdnError::InvalidConfig {
            message: "scene extent, batch size and tensor stride must be at least 1".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.skip_fraction) {
        return Err(GsdnError::InvalidConfig {
            message: format!("skip_fraction must lie in [0, 1], got {}", config.skip_fraction),
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0f32, 1.0).map_err(|e| GsdnError::InvalidConfig {
        message: e.to_string(),
    })?;

    let input = sample_tensor(config, config.num_voxels, channels, &normal, &mut rng, device)?;
    let skip_voxels = (config.num_voxels as f64 * config.skip_fraction) as usize;
    let skip = if skip_voxels == 0 {
        None
    } else {
        Some(sample_tensor(config, skip_voxels, channels, &normal, &mut rng, device)?)
    };

    log::debug!(
        "scene: {} input voxels, {} skip voxels, stride {}",
        input.len(),
        skip.as_ref().map_or(0, SparseTensor::len),
        config.tensor_stride
    );
    Ok(Scene { input, skip })
}

fn sample_tensor<B: Backend>(
    config: &SceneConfig,
    num_voxels: usize,
    channels: usize,
    normal: &Normal<f32>,
    rng: &mut StdRng,
    device: &B::Device,
) -> GsdnResult<SparseTensor<B>> {
    let capacity = config.batch_size * config.extent.pow(3);
    let num_voxels = num_voxels.min(capacity);
    let stride = config.tensor_stride as i32;
    let extent = config.extent as i32;

    let mut seen = HashSet::with_capacity(num_voxels);
    let mut coords: Vec<Coord> = Vec::with_capacity(num_voxels);
    while coords.len() < num_voxels {
        let coord = [
            rng.random_range(0..config.batch_size as i32),
            rng.random_range(0..extent) * stride,
            rng.random_range(0..extent) * stride,
            rng.random_range(0..extent) * stride,
        ];
        if seen.insert(coord) {
            coords.push(coord);
        }
    }

    let feats: Vec<f32> = (0..num_voxels * channels)
        .map(|_| normal.sample(&mut *rng))
        .collect();
    let feats = Tensor::from_data(TensorData::new(feats, [num_voxels, channels]), device);
    SparseTensor::new(coords, feats, config.tensor_stride)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_scene_is_reproducible() {
        let device = Default::default();
        let config = SceneConfig::new().with_num_voxels(64).with_seed(7);
        let a = random_scene::<TestBackend>(&config, 4, &device).unwrap();
        let b = random_scene::<TestBackend>(&config, 4, &device).unwrap();

        assert_eq!(a.input.coords(), b.input.coords());
        assert_eq!(a.input.len(), 64);
        assert_eq!(a.input.channels(), 4);
        assert_eq!(a.skip.as_ref().map(SparseTensor::len), Some(32));
    }

    #[test]
    fn test_scene_respects_stride_and_capacity() {
        let device = Default::default();
        let config = SceneConfig::new()
            .with_num_voxels(1000)
            .with_extent(2)
            .with_batch_size(2)
            .with_tensor_stride(8)
            .with_skip_fraction(0.0);
        let scene = random_scene::<TestBackend>(&config, 1, &device).unwrap();

        assert_eq!(scene.input.len(), 16);
        assert!(scene.skip.is_none());
        assert!(
            scene
                .input
                .coords()
                .iter()
                .all(|c| c[1..].iter().all(|v| v % 8 == 0))
        );
    }

    #[test]
    fn test_scene_rejects_bad_fraction() {
        let device = Default::default();
        let config = SceneConfig::new().with_skip_fraction(1.5);
        assert!(random_scene::<TestBackend>(&config, 1, &device).is_err());
    }
}
