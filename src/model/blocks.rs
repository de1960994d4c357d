use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Relu};
use burn::tensor::backend::Backend;

use crate::error::Result;
use crate::sparse::{
    SparseConv3d, SparseConv3dConfig, SparseConvTranspose3d, SparseConvTranspose3dConfig,
    SparseTensor,
};

/// Per-voxel `LayerNorm` over the feature channels of a sparse tensor.
#[derive(Module, Debug)]
pub struct SparseLayerNorm<B: Backend> {
    norm: LayerNorm<B>,
}

impl<B: Backend> SparseLayerNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: SparseTensor<B>) -> SparseTensor<B> {
        x.map_feats(|f| self.norm.forward(f))
    }
}

/// Residual block of two submanifold convolutions.
///
/// conv3 -> norm -> relu -> conv3 -> norm, plus identity, then relu.
#[derive(Module, Debug)]
pub struct SparseResBlock<B: Backend> {
    conv1: SparseConv3d<B>,
    norm1: SparseLayerNorm<B>,
    conv2: SparseConv3d<B>,
    norm2: SparseLayerNorm<B>,
    activation: Relu,
}

impl<B: Backend> SparseResBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Result<Self> {
        Ok(Self {
            conv1: SparseConv3dConfig::new([channels, channels]).init(device)?,
            norm1: SparseLayerNorm::new(channels, device),
            conv2: SparseConv3dConfig::new([channels, channels]).init(device)?,
            norm2: SparseLayerNorm::new(channels, device),
            activation: Relu::new(),
        })
    }

    pub fn forward(&self, x: SparseTensor<B>) -> Result<SparseTensor<B>> {
        if x.is_empty() {
            return Ok(x);
        }
        let identity = x.feats().clone();

        let h = self.norm1.forward(self.conv1.forward(x)?);
        let h = h.map_feats(|f| self.activation.forward(f));
        let h = self.norm2.forward(self.conv2.forward(h)?);
        Ok(h.map_feats(|f| self.activation.forward(f + identity)))
    }
}

/// Transposed convolution followed by norm, relu and `n` residual blocks.
#[derive(Module, Debug)]
pub struct UpConvStack<B: Backend> {
    conv: SparseConvTranspose3d<B>,
    norm: SparseLayerNorm<B>,
    activation: Relu,
    blocks: Vec<SparseResBlock<B>>,
}

impl<B: Backend> UpConvStack<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        n: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let conv = SparseConvTranspose3dConfig::new(channels)
            .with_kernel_size(kernel_size)
            .with_stride(stride)
            .init(device)?;
        let blocks = (0..n)
            .map(|_| SparseResBlock::new(channels[1], device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            conv,
            norm: SparseLayerNorm::new(channels[1], device),
            activation: Relu::new(),
            blocks,
        })
    }

    pub fn channels_out(&self) -> usize {
        self.conv.channels_out()
    }

    pub fn forward(&self, x: SparseTensor<B>) -> Result<SparseTensor<B>> {
        let out = self.conv.forward(x)?;
        if out.is_empty() {
            return Ok(out);
        }
        let mut out = self
            .norm
            .forward(out)
            .map_feats(|f| self.activation.forward(f));
        for block in &self.blocks {
            out = block.forward(out)?;
        }
        Ok(out)
    }
}
