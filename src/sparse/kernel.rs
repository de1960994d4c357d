use std::ops::RangeInclusive;

/// Hypercube kernel footprint.
///
/// Odd sizes are centred on the voxel, even sizes start at the voxel and
/// extend in the positive direction (a size-2 kernel covers offsets `0..=1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelRegion {
    kernel_size: usize,
}

impl KernelRegion {
    pub fn new(kernel_size: usize) -> Self {
        Self { kernel_size }
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Number of offsets, `kernel_size³`.
    pub fn volume(&self) -> usize {
        self.kernel_size.pow(3)
    }

    fn axis(&self) -> RangeInclusive<i32> {
        let k = self.kernel_size as i32;
        if k % 2 == 1 {
            -(k - 1) / 2..=(k - 1) / 2
        } else {
            0..=k - 1
        }
    }

    /// Offsets in kernel units, `z` varying fastest. The position in this list
    /// is the kernel weight slot.
    pub fn offsets(&self) -> Vec<[i32; 3]> {
        let mut offsets = Vec::with_capacity(self.volume());
        for x in self.axis() {
            for y in self.axis() {
                for z in self.axis() {
                    offsets.push([x, y, z]);
                }
            }
        }
        offsets
    }
}
