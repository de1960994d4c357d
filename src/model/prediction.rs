//! Per-layer box, class and sparsity predictions.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{GsdnError, Result};
use crate::sparse::{Coord, SparseTensor, to_host};

/// Box parameters predicted per anchor ahead of the class logits:
/// 3 centre offsets, 3 size offsets and 1 objectness logit.
pub const BOX_PARAMS: usize = 7;

/// Anchor extents relative to the voxel size of the predicting layer.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorSet {
    anchors: Vec<[f32; 3]>,
}

impl AnchorSet {
    pub fn new(anchors: Vec<[f32; 3]>) -> Result<Self> {
        if anchors.is_empty() {
            return Err(GsdnError::InvalidConfig {
                message: "anchor set is empty".to_string(),
            });
        }
        if let Some(bad) = anchors
            .iter()
            .find(|a| a.iter().any(|v| !v.is_finite() || *v <= 0.0))
        {
            return Err(GsdnError::InvalidConfig {
                message: format!("anchor extents must be positive, got {bad:?}"),
            });
        }
        Ok(Self { anchors })
    }

    /// 13 anchors: four cubes and the three axis permutations of three
    /// elongated shapes.
    pub fn default_gsdn() -> Self {
        let mut anchors = vec![
            [0.5, 0.5, 0.5],
            [1.0, 1.0, 1.0],
            [2.0, 2.0, 2.0],
            [4.0, 4.0, 4.0],
        ];
        for [a, b] in [[2.0, 1.0], [1.0, 2.0], [4.0, 2.0]] {
            anchors.push([a, b, b]);
            anchors.push([b, a, b]);
            anchors.push([b, b, a]);
        }
        Self { anchors }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, anchor: usize) -> Option<[f32; 3]> {
        self.anchors.get(anchor).copied()
    }
}

/// A decoded box in base-voxel units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedBox {
    pub batch: i32,
    pub centre: [f32; 3],
    pub size: [f32; 3],
    /// Objectness probability.
    pub score: f32,
    pub class: usize,
    pub class_probability: f32,
    pub anchor: usize,
    /// Voxel that produced the box.
    pub voxel: Coord,
}

/// Raw predictions of one GSDN layer, one row per voxel of the layer input.
#[derive(Clone, Debug)]
pub struct GsdnLayerPrediction<B: Backend> {
    coords: Vec<Coord>,
    tensor_stride: usize,
    nb_anchors: usize,
    num_classes: usize,
    /// [N, A, 3]
    pub centre_offsets: Tensor<B, 3>,
    /// [N, A, 3]
    pub size_offsets: Tensor<B, 3>,
    /// [N, A]
    pub objectness: Tensor<B, 2>,
    /// [N, A, K]
    pub class_logits: Tensor<B, 3>,
    /// [N]
    pub sparsity_logits: Tensor<B, 1>,
}

impl<B: Backend> GsdnLayerPrediction<B> {
    /// Split detector logits `[N, A * (7 + K)]` into their components.
    pub fn from_logits(
        input: &SparseTensor<B>,
        boxes: Tensor<B, 2>,
        nb_anchors: usize,
        sparsity_logits: Tensor<B, 1>,
    ) -> Result<Self> {
        let [rows, width] = boxes.dims();
        if nb_anchors == 0 || width % nb_anchors != 0 || width / nb_anchors <= BOX_PARAMS {
            return Err(GsdnError::InvalidConfig {
                message: format!(
                    "detector width {width} does not hold {nb_anchors} anchors of {BOX_PARAMS} box parameters plus classes"
                ),
            });
        }
        if rows != input.len() {
            return Err(GsdnError::ShapeMismatch {
                expected: vec![input.len(), width],
                got: vec![rows, width],
            });
        }
        if sparsity_logits.dims() != [rows] {
            return Err(GsdnError::ShapeMismatch {
                expected: vec![rows],
                got: sparsity_logits.dims().to_vec(),
            });
        }

        let per_anchor = width / nb_anchors;
        let num_classes = per_anchor - BOX_PARAMS;
        if rows == 0 {
            return Ok(Self::empty(
                input.tensor_stride(),
                nb_anchors,
                num_classes,
                &input.device(),
            ));
        }

        let boxes = boxes.reshape([rows, nb_anchors, per_anchor]);
        let anchors = 0..nb_anchors;
        Ok(Self {
            coords: input.coords().to_vec(),
            tensor_stride: input.tensor_stride(),
            nb_anchors,
            num_classes,
            centre_offsets: boxes.clone().slice([0..rows, anchors.clone(), 0..3]),
            size_offsets: boxes.clone().slice([0..rows, anchors.clone(), 3..6]),
            objectness: boxes
                .clone()
                .slice([0..rows, anchors.clone(), 6..7])
                .reshape([rows, nb_anchors]),
            class_logits: boxes.slice([0..rows, anchors, BOX_PARAMS..per_anchor]),
            sparsity_logits,
        })
    }

    /// Prediction for a layer input without voxels.
    pub fn empty(
        tensor_stride: usize,
        nb_anchors: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            coords: Vec::new(),
            tensor_stride,
            nb_anchors,
            num_classes,
            centre_offsets: Tensor::zeros([0, nb_anchors, 3], device),
            size_offsets: Tensor::zeros([0, nb_anchors, 3], device),
            objectness: Tensor::zeros([0, nb_anchors], device),
            class_logits: Tensor::zeros([0, nb_anchors, num_classes], device),
            sparsity_logits: Tensor::zeros([0], device),
        }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn tensor_stride(&self) -> usize {
        self.tensor_stride
    }

    pub fn nb_anchors(&self) -> usize {
        self.nb_anchors
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn sparsity_probabilities(&self) -> Tensor<B, 1> {
        sigmoid(self.sparsity_logits.clone())
    }

    pub fn objectness_probabilities(&self) -> Tensor<B, 2> {
        sigmoid(self.objectness.clone())
    }

    /// Decode anchor boxes whose objectness probability is above
    /// `score_threshold`, highest score first.
    pub fn decode(&self, anchors: &AnchorSet, score_threshold: f32) -> Result<Vec<DetectedBox>> {
        if anchors.len() != self.nb_anchors {
            return Err(GsdnError::InvalidConfig {
                message: format!(
                    "{} anchors given for a layer predicting {} anchors",
                    anchors.len(),
                    self.nb_anchors
                ),
            });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let scores = to_host(self.objectness_probabilities())?;
        let centres = to_host(self.centre_offsets.clone())?;
        let sizes = to_host(self.size_offsets.clone())?;
        let classes = to_host(self.class_logits.clone())?;

        let stride = self.tensor_stride as f32;
        let half_voxel = Vector3::repeat(stride / 2.0);
        let mut boxes = Vec::new();
        for (row, voxel) in self.coords.iter().enumerate() {
            let voxel_centre =
                Vector3::new(voxel[1] as f32, voxel[2] as f32, voxel[3] as f32) + half_voxel;
            for anchor in 0..self.nb_anchors {
                let slot = row * self.nb_anchors + anchor;
                let score = scores[slot];
                if score.is_nan() || score <= score_threshold {
                    continue;
                }

                let extent = Vector3::from(anchors.anchors[anchor]) * stride;
                let offset = Vector3::from_column_slice(&centres[slot * 3..slot * 3 + 3]);
                let centre = voxel_centre + offset.component_mul(&extent);
                let scale = Vector3::from_column_slice(&sizes[slot * 3..slot * 3 + 3]).map(f32::exp);
                let size = extent.component_mul(&scale);
                let logits = &classes[slot * self.num_classes..(slot + 1) * self.num_classes];
                let (class, class_probability) = softmax_argmax(logits);

                boxes.push(DetectedBox {
                    batch: voxel[0],
                    centre: centre.into(),
                    size: size.into(),
                    score,
                    class,
                    class_probability,
                    anchor,
                    voxel: *voxel,
                });
            }
        }

        boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(boxes)
    }
}

/// Index of the largest logit and its softmax probability.
fn softmax_argmax(logits: &[f32]) -> (usize, f32) {
    let (class, max) = logits
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    let denominator: f32 = logits.iter().map(|v| (v - max).exp()).sum();
    (class, 1.0 / denominator)
}
