//! Last-saved state for revert.

use crate::lineage::LineageTable;
use crate::raster::RasterVolume;

/// An owned copy of the table/raster pair as of the last save (or load).
///
/// The snapshot never aliases the live state: capturing clones, restoring
/// clones back, so edits to one side are invisible through the other.
#[derive(Debug, Clone)]
pub struct Snapshot {
    table: LineageTable,
    raster: RasterVolume,
}

impl Snapshot {
    pub fn capture(table: &LineageTable, raster: &RasterVolume) -> Self {
        Self {
            table: table.clone(),
            raster: raster.clone(),
        }
    }

    pub fn table(&self) -> &LineageTable {
        &self.table
    }

    pub fn raster(&self) -> &RasterVolume {
        &self.raster
    }
}
