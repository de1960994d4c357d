//! Stacked GSDN blocks, the way a decoder uses them.

use burn::backend::NdArray;
use burn::backend::ndarray::NdArrayDevice;
use burn::tensor::{Distribution, Tensor};

use gsdn_up::data::{SceneConfig, random_scene};
use gsdn_up::{AnchorSet, GsdnUpConfig, SparseTensor};

type TestBackend = NdArray;

fn random_tensor(coords: Vec<[i32; 4]>, channels: usize, stride: usize) -> SparseTensor<TestBackend> {
    let device = NdArrayDevice::Cpu;
    let feats = Tensor::random([coords.len(), channels], Distribution::Normal(0.0, 1.0), &device);
    SparseTensor::new(coords, feats, stride).unwrap()
}

#[test]
fn test_two_level_decoder() {
    let device = NdArrayDevice::Cpu;
    let coarse_block = GsdnUpConfig::new(vec![16, 8], 2)
        .with_tau(0.0)
        .init::<TestBackend>(&device)
        .unwrap();
    let fine_block = GsdnUpConfig::new(vec![8, 4], 2)
        .with_tau(0.0)
        .init::<TestBackend>(&device)
        .unwrap();

    let coarse = random_tensor(vec![[0, 0, 0, 0], [0, 8, 0, 0]], 16, 8);
    let (mid, coarse_prediction) = coarse_block.forward(coarse, None).unwrap();
    assert_eq!(coarse_prediction.len(), 2);
    assert_eq!(mid.tensor_stride(), 4);
    assert_eq!(mid.len(), 16);

    // encoder skip on the stride-4 grid, partly overlapping the generated voxels
    let skip = random_tensor(vec![[0, 0, 0, 0], [0, 32, 32, 32]], 8, 4);
    let (fine, fine_prediction) = fine_block.forward(mid, Some(skip)).unwrap();
    assert_eq!(fine_prediction.len(), 17);
    assert_eq!(fine_prediction.tensor_stride(), 4);
    assert_eq!(fine.tensor_stride(), 2);
    assert_eq!(fine.channels(), 4);
    assert_eq!(fine.len(), 17 * 8);

    let boxes = fine_prediction
        .decode(&AnchorSet::default_gsdn(), 0.0)
        .unwrap();
    assert_eq!(boxes.len(), 17 * 13);
    assert!(boxes.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(boxes.iter().all(|b| b.class < 2 && b.size.iter().all(|s| *s > 0.0)));
}

#[test]
fn test_topk_bound_on_random_scene() {
    let device = NdArrayDevice::Cpu;
    let block = GsdnUpConfig::new(vec![8, 8], 3)
        .with_tau(0.0)
        .with_max_kept(20)
        .with_n(0)
        .init::<TestBackend>(&device)
        .unwrap();

    let scene = random_scene::<TestBackend>(
        &SceneConfig::new().with_num_voxels(200).with_skip_fraction(0.0),
        8,
        &device,
    )
    .unwrap();
    let (out, prediction) = block.forward(scene.input, scene.skip).unwrap();

    assert_eq!(prediction.len(), 200);
    // 20 survivors, 8 children each, non-overlapping for kernel 2 / stride 2
    assert_eq!(out.len(), 20 * 8);
}

#[test]
fn test_stride_one_block_only_prunes() {
    let device = NdArrayDevice::Cpu;
    let block = GsdnUpConfig::new(vec![4], 1)
        .with_stride(1)
        .with_tau(0.0)
        .init::<TestBackend>(&device)
        .unwrap();

    let x = random_tensor(vec![[0, 0, 0, 0], [1, 0, 0, 0], [0, 1, 1, 1]], 4, 1);
    let (out, _) = block.forward(x.clone(), None).unwrap();
    assert_eq!(out.coords(), x.coords());
    assert_eq!(out.tensor_stride(), 1);
    assert_eq!(out.channels(), 4);
}
