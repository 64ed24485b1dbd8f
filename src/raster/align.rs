//! Table ↔ raster reconciliation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::lineage::{LineageTable, Observation, display_name};
use crate::raster::volume::RasterVolume;
use crate::raster::regions::{Region, regions};

/// Fatal reconciliation mismatch: a raster label does not map to exactly one
/// connected component. This indicates drawing or segmentation corruption and
/// must abort instead of being silently repaired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("label {label} in frame {frame} maps to {components} connected components, expected one")]
pub struct ConsistencyError {
    pub frame: usize,
    pub label: u32,
    pub components: usize,
}

/// Counts of what reconciliation changed, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignReport {
    /// Unassigned rows created for labels only present in the raster.
    pub added: usize,
    /// Rows dropped because their label vanished from the raster.
    pub removed: usize,
    /// Centroids overwritten in morphology-alignment mode.
    pub updated: usize,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn single_region<'a>(
    comps: &'a [Region],
    frame: usize,
    label: u32,
) -> Result<&'a Region, ConsistencyError> {
    match comps {
        [one] => Ok(one),
        _ => Err(ConsistencyError {
            frame,
            label,
            components: comps.len(),
        }),
    }
}

/// Reconcile the table against the raster, frame by frame.
///
/// Labels present in the raster but absent from the table become new
/// unassigned rows (centroid measured from the raster, state set to
/// `default_state`, extra columns null). Rows whose label is absent from the
/// raster are dropped, the object having been erased on the canvas. With
/// `align_morph`, the centroid of every surviving object is re-measured and
/// overwritten when it moved (compared at 3-decimal precision).
///
/// Mutates the table in place; callers needing atomicity on a
/// [`ConsistencyError`] should pass a staged copy.
pub fn align(
    table: &mut LineageTable,
    raster: &RasterVolume,
    align_morph: bool,
    default_state: Option<&str>,
) -> Result<AlignReport, ConsistencyError> {
    let mut report = AlignReport::default();

    for frame in 0..raster.frames() {
        let mut by_label: HashMap<u32, Vec<Region>> = HashMap::new();
        for region in regions(raster.plane(frame)) {
            by_label.entry(region.label).or_default().push(region);
        }
        let table_labels = table.labels_in_frame(frame);

        // raster-only labels: register as unassigned objects
        let mut missing: Vec<u32> = by_label
            .keys()
            .copied()
            .filter(|l| !table_labels.contains(l))
            .collect();
        missing.sort_unstable();
        for label in missing {
            let region = single_region(&by_label[&label], frame, label)?;
            let mut row = Observation::new(frame, 0, label, region.centroid_x, region.centroid_y);
            row.state = default_state.map(str::to_string);
            row.extras = table.null_extras();
            row.name = display_name(&row, default_state.is_some());
            table.push(row);
            report.added += 1;
        }

        // table-only labels: the object was erased on the canvas
        let before = table.len();
        table.retain(|r| r.frame != frame || by_label.contains_key(&r.label));
        report.removed += before - table.len();

        if align_morph {
            for label in table_labels {
                let Some(comps) = by_label.get(&label) else {
                    continue;
                };
                let region = single_region(comps, frame, label)?;
                let Some(idx) = table.find(frame, label) else {
                    continue;
                };
                let row = &table.rows()[idx];
                if round3(row.centroid_x) == round3(region.centroid_x)
                    && round3(row.centroid_y) == round3(region.centroid_y)
                {
                    continue;
                }
                info!(frame, label, "updating object centroid");
                let row = table.row_mut(idx);
                row.centroid_x = region.centroid_x;
                row.centroid_y = region.centroid_y;
                report.updated += 1;
            }
        }
    }

    debug!(
        added = report.added,
        removed = report.removed,
        updated = report.updated,
        "aligned table and raster"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn raster_with(labels: &[(usize, usize, usize, u32)]) -> RasterVolume {
        let mut data = Array3::zeros((2, 4, 4));
        for &(f, y, x, l) in labels {
            data[[f, y, x]] = l;
        }
        RasterVolume::new(data)
    }

    #[test]
    fn test_raster_only_label_becomes_unassigned_row() {
        let raster = raster_with(&[(0, 1, 1, 3), (0, 1, 2, 3)]);
        let mut table = LineageTable::from_rows(Vec::new(), vec!["intensity".into()]);

        let report = align(&mut table, &raster, false, Some("G1")).unwrap();
        assert_eq!(report, AlignReport { added: 1, removed: 0, updated: 0 });

        let row = &table.rows()[0];
        assert!(row.is_unassigned());
        assert_eq!(row.label, 3);
        assert_eq!(row.state.as_deref(), Some("G1"));
        assert_eq!(row.centroid_x, 1.5);
        assert_eq!(row.centroid_y, 1.0);
        assert_eq!(row.extras["intensity"], serde_json::Value::Null);
    }

    #[test]
    fn test_table_only_row_is_dropped() {
        let raster = raster_with(&[(0, 0, 0, 1)]);
        let rows = vec![
            Observation::new(0, 4, 1, 0.0, 0.0),
            Observation::new(0, 5, 2, 3.0, 3.0), // erased on canvas
        ];
        let mut table = LineageTable::from_rows(rows, Vec::new());

        let report = align(&mut table, &raster, false, None).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].track_id, 4);
    }

    #[test]
    fn test_closure_property() {
        // after align, per frame: raster label set == table label set
        let raster = raster_with(&[(0, 0, 0, 1), (0, 3, 3, 2), (1, 2, 2, 9)]);
        let mut table =
            LineageTable::from_rows(vec![Observation::new(1, 3, 4, 0.0, 0.0)], Vec::new());
        align(&mut table, &raster, false, None).unwrap();
        for frame in 0..raster.frames() {
            assert_eq!(table.labels_in_frame(frame), raster.labels(frame));
        }
    }

    #[test]
    fn test_morph_updates_moved_centroid() {
        let raster = raster_with(&[(0, 2, 2, 1)]);
        let rows = vec![Observation::new(0, 6, 1, 1.0, 1.0)];
        let mut table = LineageTable::from_rows(rows, Vec::new());

        let report = align(&mut table, &raster, true, None).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(table.rows()[0].centroid_x, 2.0);
        assert_eq!(table.rows()[0].centroid_y, 2.0);

        // second pass is a no-op
        let report = align(&mut table, &raster, true, None).unwrap();
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn test_split_component_is_fatal() {
        let raster = raster_with(&[(0, 0, 0, 5), (0, 3, 3, 5)]);
        let mut table = LineageTable::new();
        let err = align(&mut table, &raster, false, None).unwrap_err();
        assert_eq!(err.components, 2);
        assert_eq!(err.label, 5);
    }
}
