//! The editing engine: command set, snapshot/session state, and the seams to
//! persistent storage and the external correlation (linking) service.

mod engine;
mod retrack;
mod snapshot;
mod store;

pub use engine::{ClsMode, DatasetConfig, TrackEditor};
pub use retrack::{CorrelationSource, LinkParams, LinkPoint, RetrackError};
pub use snapshot::Snapshot;
pub use store::{RasterExport, SaveError, TrackStore};
