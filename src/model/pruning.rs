use burn::prelude::*;

use crate::error::Result;
use crate::sparse::{rows_to_host, to_host};

/// Voxels to keep after a GSDN layer.
///
/// A voxel survives when its occupancy probability is strictly above `tau`.
/// When more than `max_kept` voxels survive, only the `max_kept` most
/// probable ones are kept. Ties at the cut are resolved by the backend's
/// top-k.
pub fn occupancy_mask<B: Backend>(
    probabilities: Tensor<B, 1>,
    tau: f32,
    max_kept: usize,
) -> Result<Vec<bool>> {
    let host = to_host(probabilities.clone())?;
    let mut keep: Vec<bool> = host.iter().map(|&p| p > tau).collect();

    let kept = keep.iter().filter(|&&k| k).count();
    if kept > max_kept {
        log::debug!("{kept} voxels above tau={tau}, keeping the top {max_kept}");
        keep.fill(false);
        let (_, top) = probabilities.topk_with_indices(max_kept, 0);
        for row in rows_to_host(top)? {
            keep[row] = true;
        }
    }
    Ok(keep)
}
