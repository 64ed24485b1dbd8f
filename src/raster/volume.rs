//! Labeled raster volume: one integer label plane per frame.

use std::collections::BTreeSet;

use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis};

/// An ordered stack of 2-D integer label planes, one per time frame.
///
/// Label 0 is background. Any other value is unique within its plane but not
/// across planes; the same integer may denote different objects in different
/// frames. The shape is fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterVolume {
    data: Array3<u32>,
}

impl RasterVolume {
    pub fn new(data: Array3<u32>) -> Self {
        Self { data }
    }

    /// The underlying (frames, height, width) label array.
    pub fn as_array(&self) -> &Array3<u32> {
        &self.data
    }

    /// Number of frames (planes).
    pub fn frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Plane shape as (height, width).
    pub fn plane_shape(&self) -> (usize, usize) {
        (self.data.len_of(Axis(1)), self.data.len_of(Axis(2)))
    }

    pub fn plane(&self, frame: usize) -> ArrayView2<'_, u32> {
        self.data.index_axis(Axis(0), frame)
    }

    pub fn plane_mut(&mut self, frame: usize) -> ArrayViewMut2<'_, u32> {
        self.data.index_axis_mut(Axis(0), frame)
    }

    /// Nonzero labels present in one frame.
    pub fn labels(&self, frame: usize) -> BTreeSet<u32> {
        self.plane(frame).iter().copied().filter(|&v| v != 0).collect()
    }

    pub fn contains(&self, frame: usize, label: u32) -> bool {
        self.plane(frame).iter().any(|&v| v == label)
    }

    /// Largest label in one frame, 0 when the plane is empty.
    pub fn max_label(&self, frame: usize) -> u32 {
        self.plane(frame).iter().copied().max().unwrap_or(0)
    }

    /// Largest label anywhere in the volume.
    pub fn max_value(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Zero every pixel of `label` in one frame.
    pub fn erase(&mut self, frame: usize, label: u32) {
        for v in self.plane_mut(frame).iter_mut() {
            if *v == label {
                *v = 0;
            }
        }
    }

    /// Zero every pixel of one frame whose label is not in the keep set.
    pub fn retain(&mut self, frame: usize, keep: &BTreeSet<u32>) {
        for v in self.plane_mut(frame).iter_mut() {
            if *v != 0 && !keep.contains(v) {
                *v = 0;
            }
        }
    }

    /// Stamp the region of `label` in `from_frame` onto `to_frame` under
    /// `new_label`, overwriting whatever pixels were there.
    pub fn overlay(&mut self, from_frame: usize, label: u32, to_frame: usize, new_label: u32) {
        let source: Vec<(usize, usize)> = self
            .plane(from_frame)
            .indexed_iter()
            .filter(|&(_, &v)| v == label)
            .map(|(pos, _)| pos)
            .collect();
        let mut target = self.plane_mut(to_frame);
        for (y, x) in source {
            target[[y, x]] = new_label;
        }
    }
}
