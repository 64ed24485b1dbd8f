//! Persistence seam.
//!
//! The engine never parses or writes files itself; on save it hands the
//! caller a canonical row slice and a depth-sized raster buffer through this
//! trait. Implement it over whatever tabular/raster codecs the application
//! uses.

use ndarray::Array3;
use thiserror::Error;

use crate::lineage::Observation;
use crate::raster::{ConsistencyError, RasterVolume};

/// Raster buffer ready for serialization, with pixel depth chosen from the
/// maximum label: 8-bit when it fits, else the next wider unsigned type.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterExport {
    U8(Array3<u8>),
    U16(Array3<u16>),
    U32(Array3<u32>),
}

impl RasterExport {
    pub fn from_volume(volume: &RasterVolume) -> Self {
        let data = volume.as_array();
        match volume.max_value() {
            0..=0xFF => Self::U8(data.mapv(|v| v as u8)),
            0x100..=0xFFFF => Self::U16(data.mapv(|v| v as u16)),
            _ => Self::U32(data.clone()),
        }
    }
}

/// Writer for the persistent table/raster pair.
pub trait TrackStore {
    /// Error type for persistence failures.
    type Error;

    /// Persist the reconciled table rows, already in canonical
    /// (track, frame) order.
    fn write_table(&mut self, rows: &[Observation]) -> Result<(), Self::Error>;

    /// Persist the raster volume.
    fn write_raster(&mut self, raster: &RasterExport) -> Result<(), Self::Error>;
}

/// Failure of a save: either the pre-save reconciliation found corrupted
/// raster data, or the store itself failed.
#[derive(Debug, Error)]
pub enum SaveError<E> {
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error("persisting failed: {0}")]
    Store(E),
}
