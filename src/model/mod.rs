mod blocks;
mod prediction;
mod pruning;
mod up;

pub use blocks::{SparseLayerNorm, SparseResBlock, UpConvStack};
pub use prediction::{AnchorSet, BOX_PARAMS, DetectedBox, GsdnLayerPrediction};
pub use pruning::occupancy_mask;
pub use up::{GsdnUp, GsdnUpConfig};

#[macro_export]
macro_rules! debug_assert_finite {
    ($tensor:expr) => {
        debug_assert!(
            $crate::sparse::to_host($tensor.clone())
                .map(|values| values.iter().all(|v| v.is_finite()))
                .unwrap_or(true),
            "Tensor contains NaN or inf"
        );
    };
}
