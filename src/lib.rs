//! # gsdn-up
//!
//! The upsampling block of a Generative Sparse Detection Network (GSDN),
//! written with Burn.
//!
//! A GSDN decoder walks from coarse to fine sparse voxel grids. At each level
//! [`GsdnUp`] merges the decoder features with the encoder skip connection,
//! predicts anchor boxes and an occupancy score for every voxel, drops voxels
//! that are unlikely to be occupied and grows the survivors onto the next,
//! finer grid with a generative transposed sparse convolution.
//!
//! ```ignore
//! use burn::backend::NdArray;
//! use gsdn_up::{GsdnUpConfig, SparseTensor};
//!
//! let device = Default::default();
//! let block = GsdnUpConfig::new(vec![64, 32], 18).init::<NdArray>(&device)?;
//! let (finer, prediction) = block.forward(coarse, Some(skip))?;
//! ```

pub mod data;
pub mod error;
pub mod export;
pub mod inference;
pub mod model;
pub mod sparse;

pub use error::{GsdnError, Result};
pub use model::{AnchorSet, DetectedBox, GsdnLayerPrediction, GsdnUp, GsdnUpConfig};
pub use sparse::{Coord, SparseTensor};
