//! Row store for tracked objects with forest-structure bookkeeping.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::lineage::{Observation, ValidationError};

/// Parent → daughters adjacency, derived from the per-row parent ids.
///
/// Maintained incrementally by the structural mutators and rebuilt lazily
/// from the rows whenever a bulk edit marks it stale.
#[derive(Debug, Clone, Default)]
struct ChildIndex {
    children: HashMap<u32, BTreeSet<u32>>,
    stale: bool,
}

/// The lineage table: an unordered collection of [`Observation`] rows,
/// semantically keyed by `(track_id, frame)` for nonzero track ids.
///
/// The table also remembers the opaque extra-column names of the source
/// schema (so newly minted rows stay schema-compatible) and a running
/// high-water mark over track ids, used to mint fresh identities.
#[derive(Debug, Clone)]
pub struct LineageTable {
    rows: Vec<Observation>,
    extra_columns: Vec<String>,
    track_count: u32,
    index: RefCell<ChildIndex>,
}

impl Default for LineageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LineageTable {
    /// Create an empty table with no extra columns.
    pub fn new() -> Self {
        Self::from_rows(Vec::new(), Vec::new())
    }

    /// Build a table from already-parsed rows plus the names of the opaque
    /// pass-through columns of the source file.
    pub fn from_rows(rows: Vec<Observation>, extra_columns: Vec<String>) -> Self {
        let track_count = rows.iter().map(|r| r.track_id).max().unwrap_or(0);
        Self {
            rows,
            extra_columns,
            track_count,
            index: RefCell::new(ChildIndex {
                children: HashMap::new(),
                stale: true,
            }),
        }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// A null-valued extras map matching the table's extra columns.
    pub fn null_extras(&self) -> BTreeMap<String, serde_json::Value> {
        self.extra_columns
            .iter()
            .map(|c| (c.clone(), serde_json::Value::Null))
            .collect()
    }

    /// Running high-water mark over track ids.
    pub fn max_track_id(&self) -> u32 {
        self.track_count
    }

    /// Raise the high-water mark when an explicit id is registered.
    pub fn note_track_id(&mut self, id: u32) {
        self.track_count = self.track_count.max(id);
    }

    /// Mint a fresh, never-used track id.
    pub fn next_track_id(&mut self) -> u32 {
        self.track_count += 1;
        self.track_count
    }

    pub fn contains_track(&self, id: u32) -> bool {
        self.rows.iter().any(|r| r.track_id == id)
    }

    /// Frames holding a row of this track, ascending.
    pub fn track_frames(&self, id: u32) -> Vec<usize> {
        let mut frames: Vec<usize> = self
            .rows
            .iter()
            .filter(|r| r.track_id == id)
            .map(|r| r.frame)
            .collect();
        frames.sort_unstable();
        frames
    }

    /// Rows of one track, ordered by frame.
    pub fn rows_for_track(&self, id: u32) -> Vec<&Observation> {
        let mut rows: Vec<&Observation> = self.rows.iter().filter(|r| r.track_id == id).collect();
        rows.sort_by_key(|r| r.frame);
        rows
    }

    /// Any row of the track, if it has one.
    pub fn first_row(&self, id: u32) -> Option<&Observation> {
        self.rows.iter().find(|r| r.track_id == id)
    }

    /// Index of the row at `(frame, label)`, if registered.
    pub fn find(&self, frame: usize, label: u32) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.frame == frame && r.label == label)
    }

    /// Raster labels registered for one frame.
    pub fn labels_in_frame(&self, frame: usize) -> BTreeSet<u32> {
        self.rows
            .iter()
            .filter(|r| r.frame == frame)
            .map(|r| r.label)
            .collect()
    }

    /// Track ids present in one frame (0 included if unassigned rows exist).
    pub fn track_ids_in_frame(&self, frame: usize) -> BTreeSet<u32> {
        self.rows
            .iter()
            .filter(|r| r.frame == frame)
            .map(|r| r.track_id)
            .collect()
    }

    /// Row indices matching a predicate, in table order.
    pub fn indices_where(&self, pred: impl Fn(&Observation) -> bool) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(r))
            .map(|(i, _)| i)
            .collect()
    }

    /// Mutable access to one row. Conservatively marks the adjacency index
    /// stale, since the caller may rewrite identity fields.
    pub fn row_mut(&mut self, idx: usize) -> &mut Observation {
        self.mark_stale();
        &mut self.rows[idx]
    }

    /// Append a row, keeping the high-water mark and adjacency current.
    pub fn push(&mut self, row: Observation) {
        self.track_count = self.track_count.max(row.track_id);
        {
            let mut index = self.index.borrow_mut();
            if !index.stale && row.parent_track_id != 0 {
                index
                    .children
                    .entry(row.parent_track_id)
                    .or_default()
                    .insert(row.track_id);
            }
        }
        self.rows.push(row);
    }

    /// Drop every row failing the predicate.
    pub fn retain(&mut self, pred: impl Fn(&Observation) -> bool) {
        self.rows.retain(|r| pred(r));
        self.mark_stale();
    }

    /// Canonical row order: by track id, then frame.
    pub fn sort_canonical(&mut self) {
        self.rows.sort_by_key(|r| (r.track_id, r.frame));
    }

    /// Self-root every row, used when the source table carried no lineage
    /// columns. Unassigned rows stay at the 0/0/0 sentinel triple.
    pub fn seed_lineage(&mut self) {
        for row in &mut self.rows {
            row.lineage_id = row.track_id;
            row.parent_track_id = 0;
        }
        self.mark_stale();
    }

    /// `(track, frame, y, x)` rows for trajectory rendering; unassigned
    /// objects carry track id 0 and are excluded.
    pub fn trajectory_points(&self) -> Vec<(u32, usize, f64, f64)> {
        self.rows
            .iter()
            .filter(|r| r.track_id > 0)
            .map(|r| (r.track_id, r.frame, r.centroid_y, r.centroid_x))
            .collect()
    }

    /// Overwrite the lineage id on every row of one track.
    pub fn set_lineage(&mut self, track: u32, lineage: u32) {
        for row in &mut self.rows {
            if row.track_id == track {
                row.lineage_id = lineage;
            }
        }
    }

    /// Overwrite the parent id on every row of one track, keeping the
    /// adjacency index in step.
    pub fn set_parent(&mut self, track: u32, parent: u32) {
        let old_parent = match self.first_row(track) {
            Some(r) => r.parent_track_id,
            None => return,
        };
        for row in &mut self.rows {
            if row.track_id == track {
                row.parent_track_id = parent;
            }
        }
        let mut index = self.index.borrow_mut();
        if !index.stale {
            if old_parent != 0 {
                if let Some(daugs) = index.children.get_mut(&old_parent) {
                    daugs.remove(&track);
                }
            }
            if parent != 0 {
                index.children.entry(parent).or_default().insert(track);
            }
        }
    }

    /// Relabel rows of `old` at `from_frame` and onward to track `new`,
    /// leaving lineage/parent fields untouched.
    pub fn relabel_from(&mut self, old: u32, from_frame: usize, new: u32) {
        for row in &mut self.rows {
            if row.track_id == old && row.frame >= from_frame {
                row.track_id = new;
            }
        }
        self.track_count = self.track_count.max(new);
        self.mark_stale();
    }

    /// Link `daughter` under `parent`: the daughter joins the parent's
    /// lineage, and so does the daughter's whole subtree.
    pub fn link(&mut self, parent: u32, daughter: u32) -> Result<(), ValidationError> {
        if !self.contains_track(parent) {
            return Err(ValidationError::TrackNotFound(parent));
        }
        let daug_row = self
            .first_row(daughter)
            .ok_or(ValidationError::TrackNotFound(daughter))?;
        if daug_row.parent_track_id != 0 {
            return Err(ValidationError::AlreadyLinked {
                daughter,
                parent: daug_row.parent_track_id,
            });
        }
        let parent_lineage = self
            .first_row(parent)
            .map(|r| r.lineage_id)
            .unwrap_or(parent);

        self.set_lineage(daughter, parent_lineage);
        self.set_parent(daughter, parent);
        for d in self.descendants(daughter) {
            self.set_lineage(d, parent_lineage);
        }
        Ok(())
    }

    /// Unlink `daughter` from its parent: it becomes its own lineage root,
    /// and its subtree follows.
    pub fn unlink(&mut self, daughter: u32) -> Result<(), ValidationError> {
        let daug_row = self
            .first_row(daughter)
            .ok_or(ValidationError::TrackNotFound(daughter))?;
        if daug_row.parent_track_id == 0 {
            return Err(ValidationError::NotLinked(daughter));
        }
        self.set_lineage(daughter, daughter);
        self.set_parent(daughter, 0);
        for d in self.descendants(daughter) {
            self.set_lineage(d, daughter);
        }
        Ok(())
    }

    /// Direct daughters of a track, ascending.
    pub fn direct_daughters(&self, id: u32) -> Vec<u32> {
        self.ensure_index();
        self.index
            .borrow()
            .children
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Transitive closure over the parent-edge relation rooted at `id`,
    /// excluding `id` itself.
    ///
    /// Traversal keeps a visited set, so it terminates even on a corrupted
    /// graph; the result is only meaningful while the forest invariant holds.
    pub fn descendants(&self, id: u32) -> BTreeSet<u32> {
        self.ensure_index();
        let index = self.index.borrow();
        let mut out = BTreeSet::new();
        let mut queue: Vec<u32> = index
            .children
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        while let Some(t) = queue.pop() {
            if t == id || !out.insert(t) {
                continue;
            }
            if let Some(daugs) = index.children.get(&t) {
                queue.extend(daugs.iter().copied());
            }
        }
        out
    }

    fn mark_stale(&self) {
        self.index.borrow_mut().stale = true;
    }

    fn ensure_index(&self) {
        let mut index = self.index.borrow_mut();
        if !index.stale {
            return;
        }
        index.children.clear();
        for row in &self.rows {
            if row.parent_track_id != 0 {
                index
                    .children
                    .entry(row.parent_track_id)
                    .or_default()
                    .insert(row.track_id);
            }
        }
        index.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(frame: usize, track: u32) -> Observation {
        Observation::new(frame, track, track, 0.0, 0.0)
    }

    fn forest() -> LineageTable {
        // lineage 1: 1 -> {2, 3}, 3 -> 4; lineage 5: root only
        let rows = vec![
            row(0, 1),
            row(1, 1),
            row(2, 2).with_lineage(1, 1),
            row(2, 3).with_lineage(1, 1),
            row(3, 4).with_lineage(1, 3),
            row(0, 5),
        ];
        LineageTable::from_rows(rows, Vec::new())
    }

    #[test]
    fn test_descendants() {
        let table = forest();
        let d: Vec<u32> = table.descendants(1).into_iter().collect();
        assert_eq!(d, vec![2, 3, 4]);
        assert_eq!(table.descendants(3).into_iter().collect::<Vec<_>>(), vec![4]);
        assert!(table.descendants(5).is_empty());
        assert!(table.descendants(4).is_empty());
    }

    #[test]
    fn test_direct_daughters() {
        let table = forest();
        assert_eq!(table.direct_daughters(1), vec![2, 3]);
        assert_eq!(table.direct_daughters(2), Vec::<u32>::new());
    }

    #[test]
    fn test_index_follows_mutation() {
        let mut table = forest();
        assert_eq!(table.descendants(1).len(), 3);

        table.unlink(3).unwrap();
        assert_eq!(table.descendants(1).into_iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(table.descendants(3).into_iter().collect::<Vec<_>>(), vec![4]);
        // subtree lineage moved with the unlink
        assert_eq!(table.first_row(4).unwrap().lineage_id, 3);

        // bulk mutation marks the index stale; it must rebuild on next query
        table.retain(|r| r.track_id != 4);
        assert!(table.descendants(3).is_empty());
    }

    #[test]
    fn test_link_rejects_second_parent() {
        let mut table = forest();
        let err = table.link(5, 2).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AlreadyLinked {
                daughter: 2,
                parent: 1
            }
        );
        let err = table.unlink(5).unwrap_err();
        assert_eq!(err, ValidationError::NotLinked(5));
    }

    #[test]
    fn test_high_water_mark() {
        let mut table = forest();
        assert_eq!(table.max_track_id(), 5);
        assert_eq!(table.next_track_id(), 6);
        table.note_track_id(10);
        assert_eq!(table.max_track_id(), 10);
        table.note_track_id(7);
        assert_eq!(table.max_track_id(), 10);
    }

    #[test]
    fn test_relabel_from() {
        let mut table = forest();
        table.relabel_from(1, 1, 9);
        assert_eq!(table.track_frames(1), vec![0]);
        assert_eq!(table.track_frames(9), vec![1]);
        assert_eq!(table.max_track_id(), 9);
    }

    #[test]
    fn test_trajectory_excludes_unassigned() {
        let mut table = forest();
        table.push(Observation::new(0, 0, 7, 1.0, 2.0));
        assert!(table.trajectory_points().iter().all(|p| p.0 > 0));
    }
}
