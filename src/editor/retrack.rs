//! Seam to the external particle-linking (correlation) service.
//!
//! The engine does not implement the linking algorithm. A full re-track hands
//! the service one point per table row and receives a track assignment per
//! point; the engine only normalizes that assignment back into the lineage
//! model (see [`crate::TrackEditor::retrack`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::ConsistencyError;

/// One object position handed to the correlation service. The returned
/// assignment uses the same order as the input slice; `row` ties each point
/// back to the table row it was measured from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkPoint {
    pub frame: usize,
    pub x: f64,
    pub y: f64,
    /// Index of the source row in the table handed to the re-track.
    pub row: usize,
}

/// Linking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Maximum per-frame displacement to consider.
    pub search_radius: f64,
    /// How many frames an object may vanish and still be relinked.
    pub frame_memory: usize,
    /// Adaptive-stop threshold; fixed at 0.4 × the search radius.
    pub adaptive_stop: f64,
}

impl LinkParams {
    pub fn new(search_radius: f64, frame_memory: usize) -> Self {
        Self {
            search_radius,
            frame_memory,
            adaptive_stop: 0.4 * search_radius,
        }
    }
}

/// The external correlation service.
///
/// Implementations return one 0-based track index per input point; the engine
/// shifts these to 1-based track ids.
pub trait CorrelationSource {
    /// Error type for linking failures.
    type Error;

    fn link(&mut self, points: &[LinkPoint], params: &LinkParams)
    -> Result<Vec<usize>, Self::Error>;
}

/// Failure of a full re-track.
#[derive(Debug, Error)]
pub enum RetrackError<E> {
    /// The pre-link reconciliation found corrupted raster data.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    /// The correlation service itself failed.
    #[error("correlation service failed: {0}")]
    Linker(E),
    /// The service returned the wrong number of assignments.
    #[error("correlation service returned {got} assignments for {expected} rows")]
    AssignmentMismatch { expected: usize, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_stop_fraction() {
        let params = LinkParams::new(10.0, 3);
        assert_eq!(params.adaptive_stop, 4.0);
        assert_eq!(params.frame_memory, 3);
    }
}
