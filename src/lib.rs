//! Lineage/table editing engine for curated cell tracking.
//!
//! An automated cell tracker produces a per-object table (one row per tracked
//! object per time frame) and a labeled raster volume (one integer-labeled
//! plane per frame). This crate holds both in memory and applies the manual
//! corrections a curator issues (relinking broken tracks, splitting merged
//! identities, declaring mitosis, reclassifying cell states, registering
//! hand-drawn objects) while keeping the lineage forest and the per-frame
//! label sets consistent.
//!
//! The entry point is [`TrackEditor`], which owns the live [`LineageTable`]
//! and [`RasterVolume`] together with a save/revert [`Snapshot`]. Persistence
//! and full re-tracking are seams the caller implements ([`TrackStore`],
//! [`CorrelationSource`]); the engine never parses files and never runs the
//! linking algorithm itself.

pub mod editor;
pub mod lineage;
pub mod raster;

pub use editor::{
    ClsMode, CorrelationSource, DatasetConfig, LinkParams, LinkPoint, RasterExport, RetrackError,
    SaveError, Snapshot, TrackEditor, TrackStore,
};
pub use lineage::{LineageTable, Observation, ValidationError};
pub use raster::{AlignReport, ConsistencyError, RasterVolume};
