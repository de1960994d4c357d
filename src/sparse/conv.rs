use std::collections::HashMap;

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::prelude::*;

use super::{Coord, KernelRegion, SparseTensor, coord_stride, row_indices, shift};
use crate::error::{GsdnError, Result as GsdnResult};

/// Input/output row pairs feeding one kernel weight slot.
#[derive(Clone, Debug, Default)]
struct KernelMap {
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl KernelMap {
    fn push(&mut self, input: usize, output: usize) {
        self.inputs.push(input);
        self.outputs.push(output);
    }

    fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// out[o] = sum over slots k and pairs (i, o) of feats[i] · W[k] (+ bias)
fn apply_kernel_maps<B: Backend>(
    feats: Tensor<B, 2>,
    weight: Tensor<B, 3>,
    bias: Option<Tensor<B, 1>>,
    maps: &[KernelMap],
    rows_out: usize,
) -> Tensor<B, 2> {
    let device = feats.device();
    let [_, channels_in, channels_out] = weight.dims();

    let mut out = Tensor::<B, 2>::zeros([rows_out, channels_out], &device);
    for (slot, map) in maps.iter().enumerate() {
        if map.is_empty() {
            continue;
        }
        let w = weight
            .clone()
            .slice([slot..slot + 1, 0..channels_in, 0..channels_out])
            .reshape([channels_in, channels_out]);
        let gathered = feats.clone().select(0, row_indices(&map.inputs, &device));
        out = out.select_assign(0, row_indices(&map.outputs, &device), gathered.matmul(w));
    }

    match bias {
        Some(bias) => out + bias.unsqueeze::<2>(),
        None => out,
    }
}

fn check_kernel_size(kernel_size: usize) -> GsdnResult<()> {
    if kernel_size == 0 {
        return Err(GsdnError::InvalidConfig {
            message: "kernel size must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn check_channels(expected: usize, got: usize) -> GsdnResult<()> {
    if expected != got {
        return Err(GsdnError::ChannelMismatch { expected, got });
    }
    Ok(())
}

/// Configuration for [`SparseConvTranspose3d`].
#[derive(Config, Debug)]
pub struct SparseConvTranspose3dConfig {
    /// `[in, out]` channels.
    pub channels: [usize; 2],
    #[config(default = 2)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = false)]
    pub bias: bool,
    #[config(
        default = "Initializer::KaimingUniform{gain:1.0/3.0f64.sqrt(), fan_out_only:false}"
    )]
    pub initializer: Initializer,
}

impl SparseConvTranspose3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GsdnResult<SparseConvTranspose3d<B>> {
        check_kernel_size(self.kernel_size)?;
        if self.stride == 0 {
            return Err(GsdnError::InvalidConfig {
                message: "transposed conv stride must be at least 1".to_string(),
            });
        }
        let (weight, bias) = init_params(
            &self.initializer,
            self.channels,
            self.kernel_size,
            self.bias,
            device,
        );
        Ok(SparseConvTranspose3d {
            weight,
            bias,
            kernel_size: self.kernel_size,
            stride: self.stride,
        })
    }
}

/// Generative transposed convolution on a sparse tensor.
///
/// Every input voxel emits one output per kernel offset, on a grid
/// `stride` times finer than the input. Contributions landing on the same
/// output voxel are summed.
#[derive(Module, Debug)]
pub struct SparseConvTranspose3d<B: Backend> {
    /// `[kernel_volume, in, out]`
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    kernel_size: usize,
    stride: usize,
}

impl<B: Backend> SparseConvTranspose3d<B> {
    pub fn channels_out(&self) -> usize {
        self.weight.val().dims()[2]
    }

    pub fn forward(&self, input: SparseTensor<B>) -> GsdnResult<SparseTensor<B>> {
        let [_, channels_in, channels_out] = self.weight.val().dims();
        check_channels(channels_in, input.channels())?;

        let stride_in = input.tensor_stride();
        if stride_in % self.stride != 0 {
            return Err(GsdnError::InvalidConfig {
                message: format!(
                    "tensor stride {stride_in} is not divisible by transposed conv stride {}",
                    self.stride
                ),
            });
        }
        let stride_out = stride_in / self.stride;
        if input.is_empty() {
            return Ok(SparseTensor::empty_unchecked(channels_out, stride_out, &input.device()));
        }

        let step = coord_stride(stride_out)?;
        let offsets = KernelRegion::new(self.kernel_size).offsets();
        let mut maps = vec![KernelMap::default(); offsets.len()];
        let mut coords: Vec<Coord> = Vec::new();
        let mut index: HashMap<Coord, usize> = HashMap::new();
        for (row, c) in input.coords().iter().enumerate() {
            for (slot, o) in offsets.iter().enumerate() {
                let target = shift(c, o, step).ok_or_else(|| GsdnError::InvalidCoordinate {
                    coord: *c,
                    reason: format!("kernel offset {o:?} at stride {stride_out} leaves the i32 grid"),
                })?;
                let out_row = *index.entry(target).or_insert_with(|| {
                    coords.push(target);
                    coords.len() - 1
                });
                maps[slot].push(row, out_row);
            }
        }

        log::debug!(
            "conv transpose: {} voxels (stride {stride_in}) -> {} voxels (stride {stride_out})",
            input.len(),
            coords.len()
        );

        let feats = apply_kernel_maps(
            input.feats().clone(),
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            &maps,
            coords.len(),
        );
        Ok(SparseTensor::from_parts(coords, feats, stride_out))
    }
}

/// Configuration for [`SparseConv3d`].
#[derive(Config, Debug)]
pub struct SparseConv3dConfig {
    /// `[in, out]` channels.
    pub channels: [usize; 2],
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = false)]
    pub bias: bool,
    #[config(
        default = "Initializer::KaimingUniform{gain:1.0/3.0f64.sqrt(), fan_out_only:false}"
    )]
    pub initializer: Initializer,
}

impl SparseConv3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GsdnResult<SparseConv3d<B>> {
        check_kernel_size(self.kernel_size)?;
        let (weight, bias) = init_params(
            &self.initializer,
            self.channels,
            self.kernel_size,
            self.bias,
            device,
        );
        Ok(SparseConv3d {
            weight,
            bias,
            kernel_size: self.kernel_size,
        })
    }
}

/// Submanifold convolution: outputs live on exactly the input voxels.
#[derive(Module, Debug)]
pub struct SparseConv3d<B: Backend> {
    /// `[kernel_volume, in, out]`
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    kernel_size: usize,
}

impl<B: Backend> SparseConv3d<B> {
    pub fn forward(&self, input: SparseTensor<B>) -> GsdnResult<SparseTensor<B>> {
        let [_, channels_in, channels_out] = self.weight.val().dims();
        check_channels(channels_in, input.channels())?;

        let stride = input.tensor_stride();
        if input.is_empty() {
            return Ok(SparseTensor::empty_unchecked(channels_out, stride, &input.device()));
        }

        let step = coord_stride(stride)?;
        let offsets = KernelRegion::new(self.kernel_size).offsets();
        let mut maps = vec![KernelMap::default(); offsets.len()];
        for (slot, o) in offsets.iter().enumerate() {
            for (row, c) in input.coords().iter().enumerate() {
                // a neighbour outside the i32 grid cannot be an input voxel
                let Some(neighbour) = shift(c, o, step) else {
                    continue;
                };
                if let Some(source) = input.index_of(&neighbour) {
                    maps[slot].push(source, row);
                }
            }
        }

        let feats = apply_kernel_maps(
            input.feats().clone(),
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            &maps,
            input.len(),
        );
        let (coords, _, stride) = input.into_parts();
        Ok(SparseTensor::from_parts(coords, feats, stride))
    }
}

type ConvParams<B> = (Param<Tensor<B, 3>>, Option<Param<Tensor<B, 1>>>);

fn init_params<B: Backend>(
    initializer: &Initializer,
    [channels_in, channels_out]: [usize; 2],
    kernel_size: usize,
    bias: bool,
    device: &B::Device,
) -> ConvParams<B> {
    let volume = KernelRegion::new(kernel_size).volume();
    let fan_in = Some(channels_in * volume);
    let fan_out = Some(channels_out * volume);

    let weight = initializer.init_with([volume, channels_in, channels_out], fan_in, fan_out, device);
    let bias = bias.then(|| initializer.init_with([channels_out], fan_in, fan_out, device));
    (weight, bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::to_host;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn single_channel(coords: Vec<Coord>, values: Vec<f32>, stride: usize) -> SparseTensor<TestBackend> {
        let device = Default::default();
        let feats = Tensor::from_data(TensorData::new(values, [coords.len(), 1]), &device);
        SparseTensor::new(coords, feats, stride).unwrap()
    }

    #[test]
    fn test_transpose_generates_finer_voxels() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([1, 1])
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = single_channel(vec![[0, 4, 0, 0]], vec![3.0], 4);
        let out = conv.forward(input).unwrap();

        assert_eq!(out.tensor_stride(), 2);
        assert_eq!(out.len(), 8);
        assert_eq!(out.coords()[0], [0, 4, 0, 0]);
        assert!(out.index_of(&[0, 6, 2, 2]).is_some());
        assert!(to_host(out.feats().clone()).unwrap().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_transpose_sums_overlapping_outputs() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([1, 1])
            .with_kernel_size(3)
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = single_channel(vec![[0, 0, 0, 0], [0, 2, 0, 0]], vec![1.0, 10.0], 2);
        let out = conv.forward(input).unwrap();

        // x in {-1, 0, 1} and {1, 2, 3}, y and z in {-1, 0, 1}
        assert_eq!(out.len(), 5 * 9);
        let feats = to_host(out.feats().clone()).unwrap();
        let shared = out.index_of(&[0, 1, 0, 0]).unwrap();
        assert_eq!(feats[shared], 11.0);
        let only_first = out.index_of(&[0, -1, 0, 0]).unwrap();
        assert_eq!(feats[only_first], 1.0);
    }

    #[test]
    fn test_transpose_keeps_batches_apart() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([1, 1])
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = single_channel(vec![[0, 0, 0, 0], [1, 0, 0, 0]], vec![1.0, 2.0], 2);
        let out = conv.forward(input).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(out.coords().iter().filter(|c| c[0] == 1).count(), 8);
    }

    #[test]
    fn test_transpose_rejects_indivisible_stride() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([1, 1]).init::<TestBackend>(&device).unwrap();
        let input = single_channel(vec![[0, 0, 0, 0]], vec![1.0], 1);
        assert!(matches!(conv.forward(input), Err(GsdnError::InvalidConfig { .. })));
    }

    #[test]
    fn test_transpose_empty_input() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([4, 2]).init::<TestBackend>(&device).unwrap();
        let out = conv
            .forward(SparseTensor::empty(4, 8, &device).unwrap())
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.channels(), 2);
        assert_eq!(out.tensor_stride(), 4);
    }

    #[test]
    fn test_submanifold_gathers_present_neighbours() {
        let device = Default::default();
        let conv = SparseConv3dConfig::new([1, 1])
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = single_channel(
            vec![[0, 0, 0, 0], [0, 2, 0, 0], [0, 8, 8, 8]],
            vec![1.0, 2.0, 5.0],
            2,
        );
        let out = conv.forward(input.clone()).unwrap();

        assert_eq!(out.coords(), input.coords());
        assert_eq!(to_host(out.feats().clone()).unwrap(), vec![3.0, 3.0, 5.0]);
    }

    #[test]
    fn test_bias_is_added_to_every_output() {
        let device = Default::default();
        let conv = SparseConv3dConfig::new([1, 1])
            .with_kernel_size(1)
            .with_bias(true)
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(conv.bias.is_some());

        let input = single_channel(vec![[0, 0, 0, 0], [0, 1, 0, 0]], vec![2.0, -3.0], 1);
        let out = conv.forward(input).unwrap();
        assert_eq!(to_host(out.feats().clone()).unwrap(), vec![3.0, -2.0]);

        let conv = SparseConvTranspose3dConfig::new([1, 1])
            .with_bias(true)
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();
        let out = conv.forward(single_channel(vec![[0, 0, 0, 0]], vec![2.0], 2)).unwrap();
        assert!(to_host(out.feats().clone()).unwrap().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_init_rejects_zero_stride_and_kernel() {
        let device = Default::default();
        let result = SparseConvTranspose3dConfig::new([1, 1])
            .with_stride(0)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(GsdnError::InvalidConfig { .. })));

        let result = SparseConvTranspose3dConfig::new([1, 1])
            .with_kernel_size(0)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(GsdnError::InvalidConfig { .. })));

        let result = SparseConv3dConfig::new([1, 1])
            .with_kernel_size(0)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(GsdnError::InvalidConfig { .. })));
    }

    #[test]
    fn test_transpose_rejects_outputs_past_grid_edge() {
        let device = Default::default();
        let conv = SparseConvTranspose3dConfig::new([1, 1])
            .with_kernel_size(3)
            .with_stride(1)
            .init::<TestBackend>(&device)
            .unwrap();
        let edge = (i32::MAX / 4) * 4;
        let input = single_channel(vec![[0, edge, 0, 0]], vec![1.0], 4);
        assert!(matches!(conv.forward(input), Err(GsdnError::InvalidCoordinate { .. })));
    }

    #[test]
    fn test_submanifold_at_grid_edge() {
        let device = Default::default();
        let conv = SparseConv3dConfig::new([1, 1])
            .with_initializer(Initializer::Ones)
            .init::<TestBackend>(&device)
            .unwrap();
        let edge = (i32::MAX / 4) * 4;
        let input = single_channel(
            vec![[0, edge, 0, 0], [0, edge - 4, 0, 0], [0, -edge, 0, 0]],
            vec![1.0, 2.0, 4.0],
            4,
        );
        let out = conv.forward(input.clone()).unwrap();
        assert_eq!(out.coords(), input.coords());
        assert_eq!(to_host(out.feats().clone()).unwrap(), vec![3.0, 3.0, 4.0]);
    }

    #[test]
    fn test_channel_mismatch() {
        let device = Default::default();
        let conv = SparseConv3dConfig::new([3, 3]).init::<TestBackend>(&device).unwrap();
        let input = single_channel(vec![[0, 0, 0, 0]], vec![1.0], 1);
        assert!(matches!(conv.forward(input), Err(GsdnError::ChannelMismatch { .. })));
    }
}
