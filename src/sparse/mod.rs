//! Sparse voxel tensors: a list of integer coordinates paired with a feature
//! matrix, plus the union/pruning primitives the GSDN block needs.

mod conv;
mod kernel;

use std::collections::HashMap;

use burn::prelude::*;

use crate::error::{GsdnError, Result};

pub use conv::{SparseConv3d, SparseConv3dConfig, SparseConvTranspose3d, SparseConvTranspose3dConfig};
pub use kernel::KernelRegion;

/// `(batch, x, y, z)`. Spatial components are in base-voxel units and are
/// multiples of the owning tensor's stride.
pub type Coord = [i32; 4];

/// Sparse tensor on a voxel grid.
///
/// Row `i` of `feats` belongs to `coords[i]`. Coordinates are unique.
#[derive(Clone, Debug)]
pub struct SparseTensor<B: Backend> {
    coords: Vec<Coord>,
    feats: Tensor<B, 2>,
    tensor_stride: usize,
    index: HashMap<Coord, usize>,
}

impl<B: Backend> SparseTensor<B> {
    /// Build a sparse tensor, checking that coordinates and features agree.
    pub fn new(coords: Vec<Coord>, feats: Tensor<B, 2>, tensor_stride: usize) -> Result<Self> {
        let stride = coord_stride(tensor_stride)?;
        let [rows, channels] = feats.dims();
        if rows != coords.len() {
            return Err(GsdnError::ShapeMismatch {
                expected: vec![coords.len(), channels],
                got: vec![rows, channels],
            });
        }

        let mut index = HashMap::with_capacity(coords.len());
        for (row, coord) in coords.iter().enumerate() {
            if coord[1..].iter().any(|c| c.rem_euclid(stride) != 0) {
                return Err(GsdnError::InvalidCoordinate {
                    coord: *coord,
                    reason: format!("not aligned on tensor stride {tensor_stride}"),
                });
            }
            if index.insert(*coord, row).is_some() {
                return Err(GsdnError::InvalidCoordinate {
                    coord: *coord,
                    reason: "duplicated coordinate".to_string(),
                });
            }
        }

        Ok(Self {
            coords,
            feats,
            tensor_stride,
            index,
        })
    }

    /// Tensor without any voxel.
    pub fn empty(channels: usize, tensor_stride: usize, device: &B::Device) -> Result<Self> {
        coord_stride(tensor_stride)?;
        Ok(Self::empty_unchecked(channels, tensor_stride, device))
    }

    /// [`SparseTensor::empty`] for a stride taken from a valid tensor.
    pub(crate) fn empty_unchecked(channels: usize, tensor_stride: usize, device: &B::Device) -> Self {
        Self {
            coords: Vec::new(),
            feats: Tensor::zeros([0, channels], device),
            tensor_stride,
            index: HashMap::new(),
        }
    }

    /// Unchecked constructor for coordinates produced by this crate.
    pub(crate) fn from_parts(coords: Vec<Coord>, feats: Tensor<B, 2>, tensor_stride: usize) -> Self {
        debug_assert_eq!(coords.len(), feats.dims()[0]);
        let index = coords
            .iter()
            .enumerate()
            .map(|(row, coord)| (*coord, row))
            .collect();
        Self {
            coords,
            feats,
            tensor_stride,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.feats.dims()[1]
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn feats(&self) -> &Tensor<B, 2> {
        &self.feats
    }

    pub fn tensor_stride(&self) -> usize {
        self.tensor_stride
    }

    pub fn device(&self) -> B::Device {
        self.feats.device()
    }

    /// Row holding `coord`, if the voxel is present.
    pub fn index_of(&self, coord: &Coord) -> Option<usize> {
        self.index.get(coord).copied()
    }

    pub fn into_parts(self) -> (Vec<Coord>, Tensor<B, 2>, usize) {
        (self.coords, self.feats, self.tensor_stride)
    }

    /// Apply a row-wise feature transform, keeping the coordinates.
    pub fn map_feats<F>(self, f: F) -> Self
    where
        F: FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    {
        let feats = f(self.feats);
        debug_assert_eq!(feats.dims()[0], self.coords.len());
        Self { feats, ..self }
    }

    /// Union of two sparse tensors on the same stride.
    ///
    /// Output rows are `self`'s voxels in order, then `other`'s voxels that are
    /// absent from `self`. Features of shared voxels are summed.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.tensor_stride != other.tensor_stride {
            return Err(GsdnError::StrideMismatch {
                expected: self.tensor_stride,
                got: other.tensor_stride,
            });
        }
        if self.channels() != other.channels() {
            return Err(GsdnError::ChannelMismatch {
                expected: self.channels(),
                got: other.channels(),
            });
        }

        let mut coords = self.coords.clone();
        let mut index = self.index.clone();
        let mut other_rows = Vec::with_capacity(other.len());
        for coord in &other.coords {
            let row = *index.entry(*coord).or_insert_with(|| {
                coords.push(*coord);
                coords.len() - 1
            });
            other_rows.push(row);
        }

        let device = self.device();
        let channels = self.channels();
        let added = coords.len() - self.len();
        let feats = match (self.is_empty(), added) {
            (_, 0) => self.feats.clone(),
            (true, _) => Tensor::zeros([added, channels], &device),
            (false, _) => Tensor::cat(
                vec![self.feats.clone(), Tensor::zeros([added, channels], &device)],
                0,
            ),
        };
        let feats = if other.is_empty() {
            feats
        } else {
            feats.select_assign(0, row_indices(&other_rows, &device), other.feats.clone())
        };

        log::trace!(
            "union: {} + {} voxels -> {} (stride {})",
            self.len(),
            other.len(),
            coords.len(),
            self.tensor_stride
        );

        Ok(Self {
            coords,
            feats,
            tensor_stride: self.tensor_stride,
            index,
        })
    }

    /// Keep the rows flagged in `keep`, preserving their order.
    pub fn prune(&self, keep: &[bool]) -> Result<Self> {
        if keep.len() != self.len() {
            return Err(GsdnError::ShapeMismatch {
                expected: vec![self.len()],
                got: vec![keep.len()],
            });
        }

        let rows: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(row, &kept)| kept.then_some(row))
            .collect();
        if rows.len() == self.len() {
            return Ok(self.clone());
        }
        let device = self.device();
        if rows.is_empty() {
            return Ok(Self::empty_unchecked(self.channels(), self.tensor_stride, &device));
        }

        let coords = rows.iter().map(|&row| self.coords[row]).collect();
        let feats = self.feats.clone().select(0, row_indices(&rows, &device));
        Ok(Self::from_parts(coords, feats, self.tensor_stride))
    }
}

/// Tensor stride as a coordinate step, rejecting 0 and strides past `i32::MAX`.
pub(crate) fn coord_stride(tensor_stride: usize) -> Result<i32> {
    match i32::try_from(tensor_stride) {
        Ok(stride) if stride >= 1 => Ok(stride),
        _ => Err(GsdnError::InvalidConfig {
            message: format!("tensor stride must lie in 1..={}, got {tensor_stride}", i32::MAX),
        }),
    }
}

/// `coord + offset * step` on the spatial axes, `None` on `i32` overflow.
pub(crate) fn shift(coord: &Coord, offset: &[i32; 3], step: i32) -> Option<Coord> {
    let mut out = *coord;
    for axis in 0..3 {
        out[axis + 1] = offset[axis]
            .checked_mul(step)
            .and_then(|delta| coord[axis + 1].checked_add(delta))?;
    }
    Some(out)
}

/// Row indices as an `Int` tensor usable with `select`/`select_assign`.
pub(crate) fn row_indices<B: Backend>(rows: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::<B, 1, Int>::from_data(
        rows.iter().map(|&i| i as i64).collect::<Vec<_>>().as_slice(),
        device,
    )
}

/// Copy a float tensor back to the host.
pub(crate) fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| GsdnError::Data {
            message: format!("{e:?}"),
        })
}

/// Copy an index tensor back to the host.
pub(crate) fn rows_to_host<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let rows = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| GsdnError::Data {
            message: format!("{e:?}"),
        })?;
    Ok(rows.into_iter().map(|r| r as usize).collect())
}
