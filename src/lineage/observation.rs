//! A single tracked-object row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One row of the lineage table: a tracked (or not yet tracked) object in one
/// time frame.
///
/// Rows with `track_id == 0` are unassigned objects: they always carry
/// `parent_track_id == 0` and `lineage_id == 0` and are excluded from
/// trajectory output. For nonzero track ids, `(track_id, frame)` identifies
/// at most one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Time frame, 0-based.
    pub frame: usize,
    /// Track identity; 0 means unassigned.
    pub track_id: u32,
    /// Raster label of this object within its frame (`continuous_label` in
    /// the source schema). Labels are unique per plane, not across frames.
    pub label: u32,
    /// Root track id of the lineage tree this row belongs to.
    pub lineage_id: u32,
    /// Parent track id; 0 means root.
    pub parent_track_id: u32,
    /// Cell-state classification, when the dataset carries one.
    pub state: Option<String>,
    /// Object centroid, x (column) coordinate.
    pub centroid_x: f64,
    /// Object centroid, y (row) coordinate.
    pub centroid_y: f64,
    /// Derived display name; never set directly, see [`crate::lineage::derive_names`].
    pub name: String,
    /// Opaque source-file columns, carried verbatim across every edit.
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl Observation {
    /// Create a row with the given identity and position; lineage defaults to
    /// self-rooted, extras empty.
    pub fn new(frame: usize, track_id: u32, label: u32, centroid_x: f64, centroid_y: f64) -> Self {
        Self {
            frame,
            track_id,
            label,
            lineage_id: track_id,
            parent_track_id: 0,
            state: None,
            centroid_x,
            centroid_y,
            name: String::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Set the state label (builder style).
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set parent and lineage ids (builder style).
    pub fn with_lineage(mut self, lineage_id: u32, parent_track_id: u32) -> Self {
        self.lineage_id = lineage_id;
        self.parent_track_id = parent_track_id;
        self
    }

    /// Whether this row is an unassigned object.
    #[inline]
    pub fn is_unassigned(&self) -> bool {
        self.track_id == 0
    }
}
