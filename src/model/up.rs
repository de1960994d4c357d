use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use super::blocks::UpConvStack;
use super::prediction::{BOX_PARAMS, GsdnLayerPrediction};
use super::pruning::occupancy_mask;
use crate::error::{GsdnError, Result as GsdnResult};
use crate::sparse::SparseTensor;

/// Transposed convolution block of a GSDN decoder.
///
/// Predicts boxes and occupancy for every voxel of its input, prunes voxels
/// that are unlikely to be occupied and, for strided blocks, upsamples the
/// survivors with a generative transposed convolution.
#[derive(Module, Debug)]
pub struct GsdnUp<B: Backend> {
    detector: Linear<B>,
    sparsity: Linear<B>,
    up: Option<UpConvStack<B>>,
    nb_anchors: usize,
    num_classes: usize,
    tau: f64,
    max_kept: usize,
}

impl<B: Backend> GsdnUp<B> {
    pub fn channels_in(&self) -> usize {
        // In Burn, Linear weight is [in_features, out_features]
        self.sparsity.weight.dims()[0]
    }

    pub fn channels_out(&self) -> usize {
        self.up
            .as_ref()
            .map_or(self.channels_in(), UpConvStack::channels_out)
    }

    pub fn nb_anchors(&self) -> usize {
        self.nb_anchors
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// x: [N, C] on stride s, skip: [M, C] on stride s
    /// -> (pruned and upsampled tensor, predictions for the union of x and skip)
    ///
    /// The output lives on stride `s / stride` when the block is strided, on
    /// stride `s` otherwise.
    pub fn forward(
        &self,
        x: SparseTensor<B>,
        skip: Option<SparseTensor<B>>,
    ) -> GsdnResult<(SparseTensor<B>, GsdnLayerPrediction<B>)> {
        let input = match skip {
            Some(skip) => x.union(&skip)?,
            None => x,
        };
        if input.channels() != self.channels_in() {
            return Err(GsdnError::ChannelMismatch {
                expected: self.channels_in(),
                got: input.channels(),
            });
        }

        let device = input.device();
        if input.is_empty() {
            let prediction = GsdnLayerPrediction::empty(
                input.tensor_stride(),
                self.nb_anchors,
                self.num_classes,
                &device,
            );
            let out = match &self.up {
                Some(up) => up.forward(input)?,
                None => input,
            };
            return Ok((out, prediction));
        }

        let rows = input.len();
        let boxes = self.detector.forward(input.feats().clone());
        let sparsity_logits = self
            .sparsity
            .forward(input.feats().clone())
            .reshape([rows]);
        crate::debug_assert_finite!(sparsity_logits);

        let prediction =
            GsdnLayerPrediction::from_logits(&input, boxes, self.nb_anchors, sparsity_logits)?;
        let keep = occupancy_mask(
            prediction.sparsity_probabilities(),
            self.tau as f32,
            self.max_kept,
        )?;

        let pruned = input.prune(&keep)?;
        log::debug!(
            "pruned {} -> {} voxels at stride {}",
            rows,
            pruned.len(),
            pruned.tensor_stride()
        );

        let out = match &self.up {
            Some(up) => up.forward(pruned)?,
            None => pruned,
        };
        Ok((out, prediction))
    }
}

#[derive(Config, Debug)]
pub struct GsdnUpConfig {
    /// `[in, out]` channels of the transposed convolution. The heads read
    /// `up_conv_nn[0]` channels.
    pub up_conv_nn: Vec<usize>,
    pub num_classes: usize,
    #[config(default = 2)]
    pub kernel_size: usize,
    /// 1 disables the transposed convolution.
    #[config(default = 2)]
    pub stride: usize,
    /// Residual blocks after the transposed convolution.
    #[config(default = 1)]
    pub n: usize,
    #[config(default = 13)]
    pub nb_anchors: usize,
    /// Occupancy probability a voxel must exceed to survive pruning.
    #[config(default = 0.3)]
    pub tau: f64,
    /// Upper bound on voxels surviving pruning.
    #[config(default = 1000)]
    pub max_kept: usize,
}

impl GsdnUpConfig {
    pub fn validate(&self) -> GsdnResult<()> {
        let invalid = |message: String| Err(GsdnError::InvalidConfig { message });

        let needed = if self.stride > 1 { 2 } else { 1 };
        if self.up_conv_nn.len() < needed {
            return invalid(format!(
                "up_conv_nn needs at least {needed} channel sizes, got {:?}",
                self.up_conv_nn
            ));
        }
        if self.up_conv_nn.contains(&0) {
            return invalid(format!("channel sizes must be positive, got {:?}", self.up_conv_nn));
        }
        if self.num_classes == 0 {
            return invalid("num_classes must be at least 1".to_string());
        }
        if self.nb_anchors == 0 {
            return invalid("nb_anchors must be at least 1".to_string());
        }
        if self.kernel_size == 0 || self.stride == 0 {
            return invalid(format!(
                "kernel_size ({}) and stride ({}) must be at least 1",
                self.kernel_size, self.stride
            ));
        }
        if !(0.0..1.0).contains(&self.tau) {
            return invalid(format!("tau must lie in [0, 1), got {}", self.tau));
        }
        if self.max_kept == 0 {
            return invalid("max_kept must be at least 1".to_string());
        }
        Ok(())
    }

    /// Width of the detector output: `nb_anchors * (7 + num_classes)`.
    pub fn box_channels(&self) -> usize {
        self.nb_anchors * (self.num_classes + BOX_PARAMS)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GsdnResult<GsdnUp<B>> {
        self.validate()?;
        let channels_in = self.up_conv_nn[0];

        let up = (self.stride > 1)
            .then(|| {
                UpConvStack::new(
                    [channels_in, self.up_conv_nn[1]],
                    self.kernel_size,
                    self.stride,
                    self.n,
                    device,
                )
            })
            .transpose()?;

        Ok(GsdnUp {
            detector: LinearConfig::new(channels_in, self.box_channels()).init(device),
            sparsity: LinearConfig::new(channels_in, 1)
                .with_bias(false)
                .init(device),
            up,
            nb_anchors: self.nb_anchors,
            num_classes: self.num_classes,
            tau: self.tau,
            max_kept: self.max_kept,
        })
    }
}
