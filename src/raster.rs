mod align;
mod regions;
mod volume;

pub use align::{AlignReport, ConsistencyError, align};
pub use regions::{Region, label_centroid, regions};
pub use volume::RasterVolume;
