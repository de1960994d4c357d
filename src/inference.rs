use std::fs;
use std::path::Path;

use burn::prelude::*;
use serde::Serialize;

use crate::data::{SceneConfig, random_scene};
use crate::error::{GsdnError, Result as GsdnResult};
use crate::export::{write_boxes_json, write_vtk_legacy};
use crate::model::{AnchorSet, GsdnUpConfig};

#[derive(Config, Debug)]
pub struct InferenceConfig {
    pub block: GsdnUpConfig,
    pub scene: SceneConfig,
    /// Objectness probability a decoded box must exceed.
    #[config(default = 0.5)]
    pub score_threshold: f32,
    /// Anchor extents, the 13 default GSDN anchors when unset.
    #[config(default = "None")]
    pub anchors: Option<Vec<[f32; 3]>>,
}

impl InferenceConfig {
    pub fn load_json(path: &Path) -> GsdnResult<Self> {
        Self::load(path).map_err(|e| GsdnError::Config {
            message: format!("{}: {e:?}", path.display()),
        })
    }

    pub fn anchor_set(&self) -> GsdnResult<AnchorSet> {
        match &self.anchors {
            Some(anchors) => AnchorSet::new(anchors.clone()),
            None => Ok(AnchorSet::default_gsdn()),
        }
    }
}

/// What a run produced, also written to `summary.json`.
#[derive(Clone, Debug, Serialize)]
pub struct InferenceSummary {
    pub input_voxels: usize,
    pub skip_voxels: usize,
    pub predicted_voxels: usize,
    pub output_voxels: usize,
    pub output_stride: usize,
    pub boxes: usize,
}

fn create_artifact_dir(artifact_dir: &Path) -> GsdnResult<()> {
    fs::create_dir_all(artifact_dir)?;
    Ok(())
}

/// Run one GSDN block on a random scene and write its outputs to
/// `artifact_dir`: the config, output voxels (VTK), decoded boxes and a
/// summary (JSON).
pub fn infer<B: Backend>(
    artifact_dir: &Path,
    config: &InferenceConfig,
    device: B::Device,
) -> GsdnResult<InferenceSummary> {
    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join("config.json"))?;

    let anchors = config.anchor_set()?;
    let block = config.block.init::<B>(&device)?;
    let scene = random_scene::<B>(&config.scene, block.channels_in(), &device)?;

    let input_voxels = scene.input.len();
    let skip_voxels = scene.skip.as_ref().map_or(0, |skip| skip.len());
    let (out, prediction) = block.forward(scene.input, scene.skip)?;
    let boxes = prediction.decode(&anchors, config.score_threshold)?;

    log::info!(
        "{} voxels predicted at stride {}, {} voxels out at stride {}, {} boxes",
        prediction.len(),
        prediction.tensor_stride(),
        out.len(),
        out.tensor_stride(),
        boxes.len()
    );

    write_vtk_legacy(out.coords(), out.tensor_stride(), &artifact_dir.join("voxels.vtk"))?;
    write_boxes_json(&boxes, &artifact_dir.join("boxes.json"))?;

    let summary = InferenceSummary {
        input_voxels,
        skip_voxels,
        predicted_voxels: prediction.len(),
        output_voxels: out.len(),
        output_stride: out.tensor_stride(),
        boxes: boxes.len(),
    };
    fs::write(
        artifact_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    Ok(summary)
}
