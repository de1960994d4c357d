use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::model::DetectedBox;
use crate::sparse::Coord;

/// Voxel centres as a legacy ASCII VTK point cloud. The batch index is
/// written as point data so batches can be told apart in a viewer.
pub fn write_vtk_legacy(coords: &[Coord], tensor_stride: usize, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    let half = tensor_stride as f32 / 2.0;

    // --- VTK header ---
    writeln!(w, "# vtk DataFile Version 3.0")?;
    writeln!(w, "GSDN voxels (tensor stride {tensor_stride})")?;
    writeln!(w, "ASCII")?;
    writeln!(w, "DATASET UNSTRUCTURED_GRID")?;

    // --- Points ---
    writeln!(w, "POINTS {} float", coords.len())?;
    for &[_, x, y, z] in coords {
        writeln!(w, "{} {} {}", x as f32 + half, y as f32 + half, z as f32 + half)?;
    }

    // --- Cells (one vertex per cell) ---
    writeln!(w, "CELLS {} {}", coords.len(), coords.len() * 2)?;
    for i in 0..coords.len() {
        writeln!(w, "1 {i}")?;
    }

    // --- Cell types (all are VTK_VERTEX = 1) ---
    writeln!(w, "CELL_TYPES {}", coords.len())?;
    for _ in 0..coords.len() {
        writeln!(w, "1")?;
    }

    // --- Batch index per point ---
    writeln!(w, "POINT_DATA {}", coords.len())?;
    writeln!(w, "SCALARS batch int 1")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for coord in coords {
        writeln!(w, "{}", coord[0])?;
    }

    w.flush()?;
    Ok(())
}

pub fn write_boxes_json(boxes: &[DetectedBox], path: &Path) -> Result<()> {
    let w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(w, boxes)?;
    Ok(())
}
