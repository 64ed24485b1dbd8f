//! The track editor: the command set over the live table/raster pair.

use std::collections::BTreeSet;

use chrono::Local;
use tracing::{debug, warn};

use crate::editor::retrack::{CorrelationSource, LinkParams, LinkPoint, RetrackError};
use crate::editor::snapshot::Snapshot;
use crate::editor::store::{RasterExport, SaveError, TrackStore};
use crate::lineage::{LineageTable, Observation, ValidationError, derive_names};
use crate::raster::{RasterVolume, align, label_centroid};

/// Which frames a classification correction covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClsMode {
    /// Only the given frame.
    Single,
    /// The given frame through the last contiguous frame holding the same
    /// prior state.
    ToNext,
    /// The given frame through this end frame, inclusive.
    Range(usize),
}

/// Dataset-level configuration handed over by the loader.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Recognized state values; the first entry is the default.
    pub states: Vec<String>,
    /// Whether the source table carries a classification column.
    pub has_state: bool,
    /// Offset added to frame numbers in result messages (datasets sometimes
    /// number frames from 1).
    pub frame_base: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            states: vec!["0".to_string()],
            has_state: false,
            frame_base: 0,
        }
    }
}

impl DatasetConfig {
    /// Configuration for a dataset with a classification column.
    pub fn with_states(states: Vec<String>) -> Self {
        Self {
            states,
            has_state: true,
            frame_base: 0,
        }
    }

    /// Default state for newly registered objects, when classification is
    /// enabled.
    pub fn default_state(&self) -> Option<&str> {
        if self.has_state {
            self.states.first().map(String::as_str)
        } else {
            None
        }
    }

    fn recognizes(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    fn display_frame(&self, frame: usize) -> usize {
        frame + self.frame_base
    }
}

/// The lineage/table editing engine.
///
/// Owns the live [`LineageTable`] and [`RasterVolume`] plus the last-saved
/// [`Snapshot`]. Every edit operation validates its preconditions against the
/// committed state, applies its mutations to a staged copy and swaps it in
/// atomically, so a failed operation leaves the session untouched. Successful
/// operations return a human-readable message for the presentation layer,
/// which is expected to re-read the table projection and raster afterwards.
pub struct TrackEditor {
    table: LineageTable,
    raster: RasterVolume,
    snapshot: Snapshot,
    config: DatasetConfig,
    last_registered: u32,
}

impl TrackEditor {
    /// Start a session over an already-parsed table and raster.
    ///
    /// `lineage_present` reports whether the source carried lineage columns;
    /// when it did not, every row starts self-rooted. Annotations are derived
    /// immediately and the load state becomes the first snapshot.
    pub fn new(
        mut table: LineageTable,
        raster: RasterVolume,
        config: DatasetConfig,
        lineage_present: bool,
    ) -> Self {
        if !lineage_present {
            table.seed_lineage();
        }
        fill_missing_states(&mut table, &config);
        derive_names(&mut table, config.has_state);
        table.sort_canonical();
        let snapshot = Snapshot::capture(&table, &raster);
        Self {
            table,
            raster,
            snapshot,
            config,
            last_registered: 0,
        }
    }

    pub fn table(&self) -> &LineageTable {
        &self.table
    }

    pub fn raster(&self) -> &RasterVolume {
        &self.raster
    }

    /// Mutable raster access for the drawing surface. Painted labels enter
    /// the table through [`Self::register_object`] or the save-time
    /// reconciliation, not here.
    pub fn raster_mut(&mut self) -> &mut RasterVolume {
        &mut self.raster
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Track id of the most recently registered object, kept as a default
    /// for quick successive registrations.
    pub fn last_registered(&self) -> u32 {
        self.last_registered
    }

    /// Largest raster label in one frame, the caller's hint for the next
    /// free drawing label.
    pub fn max_frame_label(&self, frame: usize) -> Result<u32, ValidationError> {
        self.check_frame(frame)?;
        Ok(self.raster.max_label(frame))
    }

    /// Relabel track `old_id` from `frame` onward to a new identity.
    ///
    /// With `new_id` absent a fresh id is minted. With a `new_id` not yet in
    /// the table the tail is relabeled, inheriting the old track's parent
    /// (and a renamed lineage when the old track was its own root). With an
    /// existing `new_id` the tail merges into it, inheriting its lineage and
    /// parent; valid only when the two frame ranges never overlap after the
    /// cut. Daughters of `old_id` are relinked to the new identity in every
    /// case.
    pub fn create_or_replace(
        &mut self,
        old_id: u32,
        frame: usize,
        new_id: Option<u32>,
    ) -> Result<String, ValidationError> {
        let old_first = self
            .table
            .first_row(old_id)
            .cloned()
            .ok_or(ValidationError::TrackNotFound(old_id))?;
        let old_frames = self.table.track_frames(old_id);
        if !old_frames.contains(&frame) {
            return Err(ValidationError::FrameNotInTrack {
                track: old_id,
                frame,
            });
        }
        // merge path only when new_id already holds rows
        let merge_row = match new_id {
            Some(n) if self.table.contains_track(n) => {
                let existing = self.table.track_frames(n);
                if old_frames
                    .iter()
                    .any(|f| *f >= frame && existing.binary_search(f).is_ok())
                {
                    return Err(ValidationError::TrackOverlap {
                        cut: old_id,
                        merged: n,
                    });
                }
                self.table.first_row(n).cloned()
            }
            _ => None,
        };

        let mut staged = self.table.clone();
        let dir_daugs = staged.direct_daughters(old_id);
        for &dd in &dir_daugs {
            staged.unlink(dd)?;
        }
        let (new, new_lin, new_par) = match (new_id, &merge_row) {
            (None, _) => {
                let n = staged.next_track_id();
                (n, n, 0)
            }
            (Some(n), None) => {
                let lin = if old_first.lineage_id == old_id {
                    n
                } else {
                    old_first.lineage_id
                };
                (n, lin, old_first.parent_track_id)
            }
            (Some(n), Some(r)) => (n, r.lineage_id, r.parent_track_id),
        };
        staged.note_track_id(new);
        staged.relabel_from(old_id, frame, new);
        staged.set_lineage(new, new_lin);
        staged.set_parent(new, new_par);
        if merge_row.is_some() {
            for d in staged.descendants(new) {
                staged.set_lineage(d, new_lin);
            }
        }
        for &dd in &dir_daugs {
            if dd != new {
                staged.link(new, dd)?;
            }
        }

        self.table = staged;
        self.refresh();
        let msg = format!(
            "Track {} from frame {} <- Track {}.",
            old_id,
            self.config.display_frame(frame),
            new
        );
        debug!("{msg}");
        Ok(msg)
    }

    /// Swap the identities of two tracks from `frame` onward.
    ///
    /// A true swap, not a rename: A's tail becomes track B and B's tail
    /// becomes track A, each inheriting the other's prior lineage and parent.
    /// Daughters of each are relinked to the new holder of that identity.
    pub fn swap(&mut self, track_a: u32, track_b: u32, frame: usize) -> Result<String, ValidationError> {
        if track_a == track_b {
            return Err(ValidationError::SameTrack(track_a));
        }
        if !self.table.contains_track(track_a) {
            return Err(ValidationError::TrackNotFound(track_a));
        }
        if !self.table.contains_track(track_b) {
            return Err(ValidationError::TrackNotFound(track_b));
        }
        if !self.table.track_frames(track_a).contains(&frame) {
            return Err(ValidationError::FrameNotInTrack {
                track: track_a,
                frame,
            });
        }

        let mut staged = self.table.clone();
        let daugs_a = staged.direct_daughters(track_a);
        let daugs_b = staged.direct_daughters(track_b);
        for &dd in daugs_a.iter().chain(&daugs_b) {
            staged.unlink(dd)?;
        }
        // read lineage/parent after the unlinks: one of the pair may have
        // just been unlinked from the other
        let b_row = staged
            .first_row(track_b)
            .cloned()
            .ok_or(ValidationError::TrackNotFound(track_b))?;
        let a_row = staged
            .first_row(track_a)
            .cloned()
            .ok_or(ValidationError::TrackNotFound(track_a))?;

        let tail_a = staged.indices_where(|r| r.track_id == track_a && r.frame >= frame);
        let tail_b = staged.indices_where(|r| r.track_id == track_b && r.frame >= frame);
        for i in tail_a {
            let row = staged.row_mut(i);
            row.track_id = track_b;
            row.lineage_id = b_row.lineage_id;
            row.parent_track_id = b_row.parent_track_id;
        }
        for i in tail_b {
            let row = staged.row_mut(i);
            row.track_id = track_a;
            row.lineage_id = a_row.lineage_id;
            row.parent_track_id = a_row.parent_track_id;
        }
        for &dd in &daugs_a {
            if dd != track_b {
                staged.link(track_b, dd)?;
            }
        }
        for &dd in &daugs_b {
            if dd != track_a {
                staged.link(track_a, dd)?;
            }
        }

        self.table = staged;
        self.refresh();
        let msg = format!(
            "Track {} from frame {} <- swapped with Track {}.",
            track_a,
            self.config.display_frame(frame),
            track_b
        );
        debug!("{msg}");
        Ok(msg)
    }

    /// Declare a mitotic parent/daughter relationship.
    pub fn create_parent(&mut self, parent: u32, daughter: u32) -> Result<String, ValidationError> {
        let mut staged = self.table.clone();
        staged.link(parent, daughter)?;
        self.table = staged;
        self.refresh();
        let msg = format!("Track {parent} linked with {daughter}.");
        debug!("{msg}");
        Ok(msg)
    }

    /// Remove a daughter's parent link; the daughter becomes its own root.
    pub fn del_parent(&mut self, daughter: u32) -> Result<String, ValidationError> {
        let mut staged = self.table.clone();
        staged.unlink(daughter)?;
        self.table = staged;
        self.refresh();
        let msg = format!("Track {daughter} unlinked from its mother.");
        debug!("{msg}");
        Ok(msg)
    }

    /// Overwrite the state classification over a contiguous frame window of
    /// one track.
    pub fn correct_classification(
        &mut self,
        track: u32,
        frame: usize,
        state: &str,
        mode: ClsMode,
    ) -> Result<String, ValidationError> {
        if !self.table.contains_track(track) {
            return Err(ValidationError::TrackNotFound(track));
        }
        if !self.config.recognizes(state) {
            return Err(ValidationError::UnknownState(state.to_string()));
        }
        let rows = self.table.rows_for_track(track);
        let frames: Vec<usize> = rows.iter().map(|r| r.frame).collect();
        let start = frames
            .iter()
            .position(|&f| f == frame)
            .ok_or(ValidationError::FrameNotInTrack { track, frame })?;
        let end = match mode {
            ClsMode::Single => start,
            ClsMode::Range(end_frame) => {
                let end = frames.iter().position(|&f| f == end_frame).ok_or(
                    ValidationError::FrameNotInTrack {
                        track,
                        frame: end_frame,
                    },
                )?;
                if end < start {
                    return Err(ValidationError::InvertedRange {
                        start: frame,
                        end: end_frame,
                    });
                }
                end
            }
            ClsMode::ToNext => {
                let current = rows[start].state.clone();
                let mut j = start;
                while j + 1 < rows.len() && rows[j + 1].state == current {
                    j += 1;
                }
                j
            }
        };
        let window: BTreeSet<usize> = frames[start..=end].iter().copied().collect();

        let mut staged = self.table.clone();
        for idx in staged.indices_where(|r| r.track_id == track && window.contains(&r.frame)) {
            staged.row_mut(idx).state = Some(state.to_string());
        }
        self.table = staged;
        self.refresh();
        let msg = format!(
            "Track {track} state <- {state} from {} to {}.",
            self.config.display_frame(frames[start]),
            self.config.display_frame(frames[end])
        );
        debug!("{msg}");
        Ok(msg)
    }

    /// Erase a track from table and raster, either the whole track or only
    /// one frame of it. Track 0 targets the unassigned objects instead.
    pub fn delete_track(&mut self, track: u32, frame: Option<usize>) -> Result<String, ValidationError> {
        if track != 0 && !self.table.contains_track(track) {
            return Err(ValidationError::TrackNotFound(track));
        }
        if let Some(f) = frame {
            self.check_frame(f)?;
        }

        let mut staged_t = self.table.clone();
        let mut staged_r = self.raster.clone();
        let msg = match frame {
            None => {
                if track == 0 {
                    warn!("deleting all unassigned objects in all frames");
                } else {
                    for dd in staged_t.direct_daughters(track) {
                        staged_t.unlink(dd)?;
                    }
                }
                let doomed: Vec<(usize, u32)> = staged_t
                    .rows()
                    .iter()
                    .filter(|r| r.track_id == track)
                    .map(|r| (r.frame, r.label))
                    .collect();
                for &(f, label) in &doomed {
                    staged_r.erase(f, label);
                }
                staged_t.retain(|r| r.track_id != track);
                if track == 0 {
                    format!("Deleted {} unassigned objects.", doomed.len())
                } else {
                    format!("Deleted track {track}.")
                }
            }
            Some(f) if track != 0 => {
                let label = self
                    .table
                    .rows_for_track(track)
                    .into_iter()
                    .find(|r| r.frame == f)
                    .map(|r| r.label)
                    .ok_or(ValidationError::FrameNotInTrack { track, frame: f })?;
                staged_r.erase(f, label);
                staged_t.retain(|r| !(r.track_id == track && r.frame == f));
                format!(
                    "Deleted track {track} at frame {}.",
                    self.config.display_frame(f)
                )
            }
            Some(f) => {
                let doomed: Vec<u32> = staged_t
                    .rows()
                    .iter()
                    .filter(|r| r.track_id == 0 && r.frame == f)
                    .map(|r| r.label)
                    .collect();
                for &label in &doomed {
                    staged_r.erase(f, label);
                }
                staged_t.retain(|r| !(r.track_id == 0 && r.frame == f));
                format!(
                    "Deleted {} unassigned objects at frame {}.",
                    doomed.len(),
                    self.config.display_frame(f)
                )
            }
        };

        self.table = staged_t;
        self.raster = staged_r;
        self.refresh();
        debug!("{msg}");
        Ok(msg)
    }

    /// Keep only the listed tracks; every other row is dropped and every
    /// other raster label zeroed. Relationships crossing the keep boundary
    /// are unlinked first. Ids not present in the table are ignored.
    pub fn keep_tracks(&mut self, keep: &[u32]) -> Result<String, ValidationError> {
        let keep_set: BTreeSet<u32> = keep.iter().copied().collect();
        let mut staged_t = self.table.clone();
        let mut staged_r = self.raster.clone();

        for &id in &keep_set {
            if !staged_t.contains_track(id) {
                continue;
            }
            for dd in staged_t.direct_daughters(id) {
                if !keep_set.contains(&dd) {
                    staged_t.unlink(dd)?;
                }
            }
            let parent = staged_t
                .first_row(id)
                .map(|r| r.parent_track_id)
                .unwrap_or(0);
            if parent != 0 && !keep_set.contains(&parent) {
                staged_t.unlink(id)?;
            }
        }
        staged_t.retain(|r| keep_set.contains(&r.track_id));
        for frame in 0..staged_r.frames() {
            let labels = staged_t.labels_in_frame(frame);
            staged_r.retain(frame, &labels);
        }

        self.table = staged_t;
        self.raster = staged_r;
        self.refresh();
        let ids: Vec<String> = keep.iter().map(|i| i.to_string()).collect();
        let msg = format!("Tracks kept: {}.", ids.join(","));
        debug!("{msg}");
        Ok(msg)
    }

    /// Register an object drawn on the raster, as part of a track or as
    /// unassigned (`track == 0`).
    ///
    /// Re-registering a label that already exists as an unassigned row
    /// reassigns that row instead of inserting a second one, so repeating
    /// the call is idempotent.
    pub fn register_object(
        &mut self,
        label: u32,
        frame: usize,
        track: u32,
        state: &str,
    ) -> Result<String, ValidationError> {
        self.check_frame(frame)?;
        if !self.config.recognizes(state) {
            return Err(ValidationError::UnknownState(state.to_string()));
        }

        if let Some(idx) = self.table.find(frame, label) {
            if !self.table.rows()[idx].is_unassigned() {
                return Err(ValidationError::DuplicateLabel { frame, label });
            }
            if track != 0 && self.table.track_ids_in_frame(frame).contains(&track) {
                return Err(ValidationError::TrackInFrame { track, frame });
            }
            let (lineage, parent) = self.derive_lineage(track);
            let mut staged = self.table.clone();
            {
                let row = staged.row_mut(idx);
                row.track_id = track;
                row.lineage_id = lineage;
                row.parent_track_id = parent;
                if self.config.has_state {
                    row.state = Some(state.to_string());
                }
            }
            staged.note_track_id(track);
            staged.sort_canonical();
            self.table = staged;
            self.refresh();
            self.last_registered = track;
            let msg = format!(
                "Assign obj: track {track}; frame {}; state {state}.",
                self.config.display_frame(frame)
            );
            debug!("{msg}");
            return Ok(msg);
        }

        if track != 0 && self.table.track_ids_in_frame(frame).contains(&track) {
            return Err(ValidationError::TrackInFrame { track, frame });
        }
        let (cx, cy) = label_centroid(self.raster.plane(frame), label)
            .ok_or(ValidationError::LabelNotInRaster { frame, label })?;

        let (lineage, parent) = self.derive_lineage(track);
        let mut row = Observation::new(frame, track, label, cx, cy).with_lineage(lineage, parent);
        row.state = self.config.has_state.then(|| state.to_string());
        row.extras = self.table.null_extras();
        let mut staged = self.table.clone();
        staged.push(row);
        staged.sort_canonical();
        self.table = staged;
        self.refresh();
        self.last_registered = track;
        let msg = if track != 0 {
            format!(
                "New obj: track {track}; frame {}; state {state}.",
                self.config.display_frame(frame)
            )
        } else {
            format!(
                "New unassigned obj: frame {}; state {state}.",
                self.config.display_frame(frame)
            )
        };
        debug!("{msg}");
        Ok(msg)
    }

    /// Duplicate the object labeled `label` in `from_frame` into `to_frame`
    /// under a freshly allocated label, overwriting whatever pixels it lands
    /// on. An unregistered source label is first taken in as unassigned.
    pub fn copy_object(
        &mut self,
        label: u32,
        from_frame: usize,
        to_frame: usize,
    ) -> Result<String, ValidationError> {
        if from_frame == to_frame {
            return Err(ValidationError::SameFrame);
        }
        self.check_frame(from_frame)?;
        self.check_frame(to_frame)?;

        let mut staged = self.table.clone();
        if staged.find(from_frame, label).is_none() {
            let (cx, cy) = label_centroid(self.raster.plane(from_frame), label).ok_or(
                ValidationError::LabelNotInRaster {
                    frame: from_frame,
                    label,
                },
            )?;
            let mut row = Observation::new(from_frame, 0, label, cx, cy);
            row.state = self.config.default_state().map(str::to_string);
            row.extras = staged.null_extras();
            staged.push(row);
        }
        let src_idx = staged
            .find(from_frame, label)
            .ok_or(ValidationError::LabelNotInRaster {
                frame: from_frame,
                label,
            })?;
        let src = staged.rows()[src_idx].clone();
        if src.track_id != 0
            && staged
                .rows()
                .iter()
                .any(|r| r.track_id == src.track_id && r.frame == to_frame)
        {
            return Err(ValidationError::TrackInFrame {
                track: src.track_id,
                frame: to_frame,
            });
        }

        let new_label = self.raster.max_label(to_frame) + 1;
        let mut copy = src;
        copy.frame = to_frame;
        copy.label = new_label;
        staged.push(copy);
        staged.sort_canonical();
        let mut staged_r = self.raster.clone();
        staged_r.overlay(from_frame, label, to_frame, new_label);

        self.table = staged;
        self.raster = staged_r;
        self.refresh();
        let msg = format!(
            "Copied object {label} from frame {} to frame {} as label {new_label}.",
            self.config.display_frame(from_frame),
            self.config.display_frame(to_frame)
        );
        debug!("{msg}");
        Ok(msg)
    }

    /// Move the division time of a mitosis earlier or later by handing the
    /// boundary rows over between the parent and the daughter spanning them.
    pub fn edit_division(
        &mut self,
        parent: u32,
        daughters: &[u32],
        new_frame: usize,
    ) -> Result<String, ValidationError> {
        if !self.table.contains_track(parent) {
            return Err(ValidationError::TrackNotFound(parent));
        }
        if daughters.is_empty() {
            return Err(ValidationError::NotDaughterOf {
                daughter: 0,
                parent,
            });
        }
        for &d in daughters {
            let row = self
                .table
                .first_row(d)
                .ok_or(ValidationError::TrackNotFound(d))?;
            if row.parent_track_id != parent {
                return Err(ValidationError::NotDaughterOf {
                    daughter: d,
                    parent,
                });
            }
        }
        if new_frame == 0 {
            return Err(ValidationError::FrameNotInLineage(0));
        }
        let boundary = new_frame - 1;
        let par_frames = self.table.track_frames(parent);
        let daug_frames: BTreeSet<usize> = self
            .table
            .rows()
            .iter()
            .filter(|r| daughters.contains(&r.track_id))
            .map(|r| r.frame)
            .collect();
        if !par_frames.contains(&boundary) && !daug_frames.contains(&boundary) {
            return Err(ValidationError::FrameNotInLineage(boundary));
        }

        let mut staged = self.table.clone();
        if !par_frames.contains(&boundary) {
            // push the division later: early daughter rows join the parent
            let edit = staged.indices_where(|r| daughters.contains(&r.track_id) && r.frame <= boundary);
            let spanning: BTreeSet<u32> = edit.iter().map(|&i| staged.rows()[i].track_id).collect();
            if spanning.len() > 1 {
                return Err(ValidationError::MultipleDaughters(boundary));
            }
            let (lineage, par_par) = match self.table.first_row(parent) {
                Some(r) => (r.lineage_id, r.parent_track_id),
                None => (parent, 0),
            };
            for i in edit {
                let row = staged.row_mut(i);
                row.track_id = parent;
                row.lineage_id = lineage;
                row.parent_track_id = par_par;
            }
        } else {
            // draw the division earlier: late parent rows join the daughter
            // that appears first
            let first = *daug_frames
                .first()
                .ok_or(ValidationError::FrameNotInLineage(boundary))?;
            let at_first: BTreeSet<u32> = self
                .table
                .rows()
                .iter()
                .filter(|r| daughters.contains(&r.track_id) && r.frame == first)
                .map(|r| r.track_id)
                .collect();
            if at_first.len() > 1 {
                return Err(ValidationError::MultipleDaughters(first));
            }
            let heir = *at_first
                .first()
                .ok_or(ValidationError::FrameNotInLineage(first))?;
            let heir_row = self
                .table
                .first_row(heir)
                .cloned()
                .ok_or(ValidationError::TrackNotFound(heir))?;
            for i in staged.indices_where(|r| r.track_id == parent && r.frame >= new_frame) {
                let row = staged.row_mut(i);
                row.track_id = heir;
                row.lineage_id = heir_row.lineage_id;
                row.parent_track_id = heir_row.parent_track_id;
            }
        }
        staged.sort_canonical();

        self.table = staged;
        self.refresh();
        let msg = format!(
            "Division of track {parent} moved to frame {}.",
            self.config.display_frame(new_frame)
        );
        debug!("{msg}");
        Ok(msg)
    }

    /// Rebuild every track identity from scratch through the external
    /// correlation service.
    ///
    /// The table is first reconciled against the raster (non-morphology
    /// mode), then every row's position is linked with the given search
    /// radius and temporal memory. The 0-based assignment comes back shifted
    /// to 1-based track ids, and every track becomes its own lineage root:
    /// division relationships are not preserved across a full re-track.
    pub fn retrack<L: CorrelationSource>(
        &mut self,
        linker: &mut L,
        search_radius: f64,
        frame_memory: usize,
    ) -> Result<String, RetrackError<L::Error>> {
        let mut staged = self.table.clone();
        align(&mut staged, &self.raster, false, self.config.default_state())?;

        let points: Vec<LinkPoint> = staged
            .rows()
            .iter()
            .enumerate()
            .map(|(row, r)| LinkPoint {
                frame: r.frame,
                x: r.centroid_x,
                y: r.centroid_y,
                row,
            })
            .collect();
        let params = LinkParams::new(search_radius, frame_memory);
        let assigned = linker.link(&points, &params).map_err(RetrackError::Linker)?;
        if assigned.len() != points.len() {
            return Err(RetrackError::AssignmentMismatch {
                expected: points.len(),
                got: assigned.len(),
            });
        }
        for (point, &t) in points.iter().zip(&assigned) {
            let id = t as u32 + 1;
            let row = staged.row_mut(point.row);
            row.track_id = id;
            row.lineage_id = id;
            row.parent_track_id = 0;
        }
        if let Some(max) = staged.rows().iter().map(|r| r.track_id).max() {
            staged.note_track_id(max);
        }
        staged.sort_canonical();

        self.table = staged;
        self.refresh();
        let msg = "Re-tracked.".to_string();
        debug!("{msg}");
        Ok(msg)
    }

    /// Reconcile (morphology alignment on), re-derive annotations, persist
    /// table and raster, and make the result the new snapshot.
    ///
    /// A [`crate::ConsistencyError`] aborts the save with the session
    /// unchanged.
    pub fn save<S: TrackStore>(&mut self, store: &mut S) -> Result<String, SaveError<S::Error>> {
        let mut staged = self.table.clone();
        align(&mut staged, &self.raster, true, self.config.default_state())?;
        fill_missing_states(&mut staged, &self.config);
        derive_names(&mut staged, self.config.has_state);
        staged.sort_canonical();

        store
            .write_raster(&RasterExport::from_volume(&self.raster))
            .map_err(SaveError::Store)?;
        store.write_table(staged.rows()).map_err(SaveError::Store)?;

        self.table = staged;
        self.snapshot = Snapshot::capture(&self.table, &self.raster);
        Ok(format!("Saved: {}.", Local::now().format("%H:%M:%S")))
    }

    /// Throw away every uncommitted edit and restore the last snapshot.
    pub fn revert(&mut self) -> String {
        self.table = self.snapshot.table().clone();
        self.raster = self.snapshot.raster().clone();
        format!("Reverted: {}.", Local::now().format("%H:%M:%S"))
    }

    fn refresh(&mut self) {
        fill_missing_states(&mut self.table, &self.config);
        derive_names(&mut self.table, self.config.has_state);
    }

    fn check_frame(&self, frame: usize) -> Result<(), ValidationError> {
        if frame >= self.raster.frames() {
            return Err(ValidationError::FrameOutOfRange(frame));
        }
        Ok(())
    }

    /// Lineage/parent for a (re-)registered row: inherited when the track
    /// already exists, fresh root for a new id, sentinel zeros when
    /// unassigned.
    fn derive_lineage(&self, track: u32) -> (u32, u32) {
        if track == 0 {
            (0, 0)
        } else if let Some(r) = self.table.first_row(track) {
            (r.lineage_id, r.parent_track_id)
        } else {
            (track, 0)
        }
    }
}

fn fill_missing_states(table: &mut LineageTable, config: &DatasetConfig) {
    let Some(default) = config.default_state().map(str::to_string) else {
        return;
    };
    for idx in table.indices_where(|r| r.state.is_none()) {
        table.row_mut(idx).state = Some(default.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn square(data: &mut Array3<u32>, frame: usize, top: usize, left: usize, label: u32) {
        for y in top..top + 2 {
            for x in left..left + 2 {
                data[[frame, y, x]] = label;
            }
        }
    }

    /// Track 5 spans frames 0..=3 as a root; track 7 spans frames 2..=3.
    fn editor() -> TrackEditor {
        let mut data = Array3::zeros((4, 8, 8));
        let mut rows = Vec::new();
        for frame in 0..4 {
            square(&mut data, frame, 0, 0, 1);
            rows.push(
                Observation::new(frame, 5, 1, 0.5, 0.5).with_state("G1"),
            );
        }
        for frame in 2..4 {
            square(&mut data, frame, 4, 4, 2);
            rows.push(
                Observation::new(frame, 7, 2, 4.5, 4.5).with_state("S"),
            );
        }
        let table = LineageTable::from_rows(rows, Vec::new());
        let raster = RasterVolume::new(data);
        let config = DatasetConfig::with_states(vec![
            "G1".into(),
            "S".into(),
            "G2".into(),
            "M".into(),
        ]);
        TrackEditor::new(table, raster, config, true)
    }

    #[test]
    fn test_link_then_unlink() {
        let mut editor = editor();
        editor.create_parent(5, 7).unwrap();
        for row in editor.table().rows_for_track(7) {
            assert_eq!(row.parent_track_id, 5);
            assert_eq!(row.lineage_id, 5);
        }
        assert_eq!(editor.table().rows_for_track(7)[0].name, "7-5-S");

        editor.del_parent(7).unwrap();
        for row in editor.table().rows_for_track(7) {
            assert_eq!(row.parent_track_id, 0);
            assert_eq!(row.lineage_id, 7);
        }
    }

    #[test]
    fn test_create_parent_rejects_second_parent() {
        let mut editor = editor();
        editor.create_parent(5, 7).unwrap();
        let before = editor.table().clone();
        let err = editor.create_parent(5, 7).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AlreadyLinked {
                daughter: 7,
                parent: 5
            }
        );
        // failed validation leaves the table untouched
        assert_eq!(editor.table().rows(), before.rows());
    }

    #[test]
    fn test_create_or_replace_mints_fresh_id() {
        let mut editor = editor();
        let msg = editor.create_or_replace(5, 2, None).unwrap();
        assert!(msg.contains("Track 8"));
        assert_eq!(editor.table().track_frames(5), vec![0, 1]);
        assert_eq!(editor.table().track_frames(8), vec![2, 3]);
        let row = editor.table().first_row(8).unwrap();
        assert_eq!((row.lineage_id, row.parent_track_id), (8, 0));
    }

    #[test]
    fn test_create_or_replace_relinks_daughters() {
        let mut editor = editor();
        editor.create_parent(5, 7).unwrap();
        editor.create_or_replace(5, 2, None).unwrap();
        // daughter followed the renamed tail
        let row = editor.table().first_row(7).unwrap();
        assert_eq!(row.parent_track_id, 8);
        assert_eq!(row.lineage_id, 8);
    }

    #[test]
    fn test_create_or_replace_merge_checks_overlap() {
        let mut editor = editor();
        // track 7 holds frames 2..=3, overlapping 5's tail from frame 2
        let err = editor.create_or_replace(5, 2, Some(7)).unwrap_err();
        assert_eq!(err, ValidationError::TrackOverlap { cut: 5, merged: 7 });

        // cutting 5 at frame 2 and merging into a track that only exists
        // before the cut is fine
        editor.create_or_replace(7, 2, Some(9)).unwrap(); // relabel 7 -> 9
        editor.delete_track(9, Some(3)).unwrap();
        let msg = editor.create_or_replace(5, 3, Some(9)).unwrap();
        assert!(msg.contains("Track 9"));
        assert_eq!(editor.table().track_frames(9), vec![2, 3]);
    }

    #[test]
    fn test_swap_symmetry() {
        let mut editor = editor();
        let before: Vec<Observation> = editor.table().rows().to_vec();
        editor.swap(5, 7, 2).unwrap();
        // labels crossed over with identity
        assert_eq!(
            editor
                .table()
                .rows_for_track(5)
                .iter()
                .map(|r| r.label)
                .collect::<Vec<_>>(),
            vec![1, 1, 2, 2]
        );
        editor.swap(5, 7, 2).unwrap();
        let mut after: Vec<Observation> = editor.table().rows().to_vec();
        after.sort_by_key(|r| (r.track_id, r.frame));
        let mut before_sorted = before;
        before_sorted.sort_by_key(|r| (r.track_id, r.frame));
        assert_eq!(after, before_sorted);
    }

    #[test]
    fn test_correct_classification_to_next() {
        // states by frame: G1 G1 S S M M
        let mut data = Array3::zeros((6, 8, 8));
        let mut rows = Vec::new();
        let states = ["G1", "G1", "S", "S", "M", "M"];
        for (frame, state) in states.iter().enumerate() {
            square(&mut data, frame, 0, 0, 1);
            rows.push(Observation::new(frame, 3, 1, 0.5, 0.5).with_state(*state));
        }
        let config = DatasetConfig::with_states(vec!["G1".into(), "S".into(), "M".into()]);
        let mut editor = TrackEditor::new(
            LineageTable::from_rows(rows, Vec::new()),
            RasterVolume::new(data),
            config,
            true,
        );

        editor
            .correct_classification(3, 2, "M", ClsMode::ToNext)
            .unwrap();
        let got: Vec<String> = editor
            .table()
            .rows_for_track(3)
            .iter()
            .map(|r| r.state.clone().unwrap())
            .collect();
        assert_eq!(got, vec!["G1", "G1", "M", "M", "M", "M"]);
    }

    #[test]
    fn test_correct_classification_range_and_single() {
        let mut editor = editor();
        editor
            .correct_classification(5, 1, "G2", ClsMode::Range(2))
            .unwrap();
        let got: Vec<String> = editor
            .table()
            .rows_for_track(5)
            .iter()
            .map(|r| r.state.clone().unwrap())
            .collect();
        assert_eq!(got, vec!["G1", "G2", "G2", "G1"]);

        let err = editor
            .correct_classification(5, 2, "X", ClsMode::Single)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownState("X".into()));
    }

    #[test]
    fn test_delete_track_erases_raster() {
        let mut editor = editor();
        editor.delete_track(7, None).unwrap();
        assert!(!editor.table().contains_track(7));
        for frame in 0..4 {
            assert!(!editor.raster().contains(frame, 2));
            // other track untouched
            assert!(editor.raster().contains(frame, 1));
        }
    }

    #[test]
    fn test_delete_all_unassigned() {
        let mut editor = editor();
        // hand-drawn objects must exist on the raster first
        editor.register_object(3, 0, 0, "G1").unwrap_err();
        editor.raster_mut().plane_mut(0)[[6, 6]] = 3;
        editor.register_object(3, 0, 0, "G1").unwrap();
        assert_eq!(editor.table().rows_for_track(0).len(), 1);

        editor.delete_track(0, None).unwrap();
        assert!(editor.table().rows_for_track(0).is_empty());
        assert!(!editor.raster().contains(0, 3));
        assert!(editor.table().contains_track(5));
    }

    #[test]
    fn test_keep_tracks() {
        let mut editor = editor();
        editor.create_parent(5, 7).unwrap();
        editor.keep_tracks(&[7]).unwrap();
        assert!(!editor.table().contains_track(5));
        assert!(editor.table().contains_track(7));
        // kept daughter was unlinked from its dropped parent
        let row = editor.table().first_row(7).unwrap();
        assert_eq!((row.lineage_id, row.parent_track_id), (7, 0));
        for frame in 0..4 {
            assert!(!editor.raster().contains(frame, 1));
        }
    }

    #[test]
    fn test_register_idempotent() {
        let mut editor = editor();
        editor.raster_mut().plane_mut(1)[[6, 6]] = 9;
        editor.raster_mut().plane_mut(1)[[6, 7]] = 9;

        editor.register_object(9, 1, 0, "S").unwrap();
        let first: Vec<Observation> = editor.table().rows().to_vec();
        editor.register_object(9, 1, 0, "S").unwrap();
        assert_eq!(editor.table().rows(), &first[..]);

        // reassignment upgrades the same row instead of inserting
        editor.register_object(9, 1, 12, "S").unwrap();
        assert_eq!(editor.table().len(), first.len());
        let row = editor.table().first_row(12).unwrap();
        assert_eq!(row.label, 9);
        assert_eq!((row.lineage_id, row.parent_track_id), (12, 0));
        assert_eq!(editor.last_registered(), 12);
        assert_eq!(editor.table().max_track_id(), 12);
    }

    #[test]
    fn test_register_rejects_conflicts() {
        let mut editor = editor();
        let err = editor.register_object(1, 0, 9, "G1").unwrap_err();
        assert_eq!(err, ValidationError::DuplicateLabel { frame: 0, label: 1 });
        editor.raster_mut().plane_mut(0)[[6, 6]] = 4;
        let err = editor.register_object(4, 0, 5, "G1").unwrap_err();
        assert_eq!(err, ValidationError::TrackInFrame { track: 5, frame: 0 });

        // reassigning an unassigned row must obey the same one-row-per-frame
        // rule as a fresh registration
        editor.register_object(4, 0, 0, "G1").unwrap();
        let before = editor.table().rows().to_vec();
        let err = editor.register_object(4, 0, 5, "G1").unwrap_err();
        assert_eq!(err, ValidationError::TrackInFrame { track: 5, frame: 0 });
        assert_eq!(editor.table().rows(), &before[..]);
        assert_eq!(
            editor
                .table()
                .rows()
                .iter()
                .filter(|r| r.track_id == 5 && r.frame == 0)
                .count(),
            1
        );
    }

    #[test]
    fn test_copy_object() {
        let mut editor = editor();
        editor.delete_track(7, Some(3)).unwrap();
        let msg = editor.copy_object(2, 2, 3).unwrap();
        assert!(msg.contains("as label 2")); // frame 3 now only holds label 1
        let idx = editor.table().find(3, 2).unwrap();
        let row = &editor.table().rows()[idx];
        assert_eq!(row.track_id, 7);
        assert!(editor.raster().contains(3, 2));

        let err = editor.copy_object(2, 2, 2).unwrap_err();
        assert_eq!(err, ValidationError::SameFrame);
        // 7 already holds frame 2, duplicating onto it would break the key
        let err = editor.copy_object(2, 3, 2).unwrap_err();
        assert_eq!(err, ValidationError::TrackInFrame { track: 7, frame: 2 });
    }

    /// Parent 5 divides after frame 3 into daughters 7 and 8 (frames 4..=5).
    fn mitosis_editor() -> TrackEditor {
        let mut data = Array3::zeros((6, 8, 8));
        let mut rows = Vec::new();
        for frame in 0..4 {
            square(&mut data, frame, 0, 0, 1);
            rows.push(Observation::new(frame, 5, 1, 0.5, 0.5).with_lineage(5, 0));
        }
        for frame in 4..6 {
            square(&mut data, frame, 0, 0, 2);
            rows.push(Observation::new(frame, 7, 2, 0.5, 0.5).with_lineage(5, 5));
            square(&mut data, frame, 4, 4, 3);
            rows.push(Observation::new(frame, 8, 3, 4.5, 4.5).with_lineage(5, 5));
        }
        TrackEditor::new(
            LineageTable::from_rows(rows, Vec::new()),
            RasterVolume::new(data),
            DatasetConfig::default(),
            true,
        )
    }

    #[test]
    fn test_edit_division_earlier() {
        let mut editor = mitosis_editor();
        // daughter 8 is trimmed so only 7 spans the new boundary
        editor.delete_track(8, Some(4)).unwrap();
        editor.edit_division(5, &[7, 8], 3).unwrap();
        assert_eq!(editor.table().track_frames(5), vec![0, 1, 2]);
        assert_eq!(editor.table().track_frames(7), vec![3, 4, 5]);
        let moved = editor.table().rows_for_track(7)[0].clone();
        assert_eq!((moved.lineage_id, moved.parent_track_id), (5, 5));
    }

    #[test]
    fn test_edit_division_later() {
        let mut editor = mitosis_editor();
        editor.delete_track(8, Some(4)).unwrap();
        editor.edit_division(5, &[7, 8], 5).unwrap();
        assert_eq!(editor.table().track_frames(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(editor.table().track_frames(7), vec![5]);
        let absorbed = editor.table().rows_for_track(5)[4].clone();
        assert_eq!((absorbed.lineage_id, absorbed.parent_track_id), (5, 0));
    }

    #[test]
    fn test_edit_division_rejects_ambiguity() {
        let mut editor = mitosis_editor();
        // both daughters start at frame 4: no unique heir for the boundary
        let err = editor.edit_division(5, &[7, 8], 5).unwrap_err();
        assert_eq!(err, ValidationError::MultipleDaughters(4));
        let err = editor.edit_division(5, &[9], 5).unwrap_err();
        assert_eq!(err, ValidationError::TrackNotFound(9));
        editor.del_parent(7).unwrap();
        let err = editor.edit_division(5, &[7], 5).unwrap_err();
        assert_eq!(err, ValidationError::NotDaughterOf { daughter: 7, parent: 5 });
    }

    #[test]
    fn test_max_frame_label_and_bounds() {
        let editor = editor();
        assert_eq!(editor.max_frame_label(0).unwrap(), 1);
        assert_eq!(editor.max_frame_label(2).unwrap(), 2);
        assert_eq!(
            editor.max_frame_label(9).unwrap_err(),
            ValidationError::FrameOutOfRange(9)
        );
    }
}
