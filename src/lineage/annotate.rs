//! Display-name derivation for tracked objects.

use crate::lineage::{LineageTable, Observation};

/// Compute the display name of one row.
///
/// Unassigned rows read `unassigned` (suffixed with the state when
/// classification is enabled and a state is present). Tracked rows join
/// `track-parent-state` with the parent segment dropped for roots and the
/// state segment dropped when classification is disabled.
pub fn display_name(row: &Observation, has_state: bool) -> String {
    if row.track_id == 0 {
        return match (has_state, &row.state) {
            (true, Some(state)) => format!("unassigned-{state}"),
            _ => "unassigned".to_string(),
        };
    }
    let mut parts = vec![row.track_id.to_string()];
    if row.parent_track_id != 0 {
        parts.push(row.parent_track_id.to_string());
    }
    if has_state {
        if let Some(state) = &row.state {
            parts.push(state.clone());
        }
    }
    parts.join("-")
}

/// Rewrite the `name` field of every row in the table.
pub fn derive_names(table: &mut LineageTable, has_state: bool) {
    for idx in 0..table.len() {
        let name = display_name(&table.rows()[idx], has_state);
        table.row_mut(idx).name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_daughter_names() {
        let root = Observation::new(0, 5, 1, 0.0, 0.0).with_state("G1");
        assert_eq!(display_name(&root, true), "5-G1");
        assert_eq!(display_name(&root, false), "5");

        let daug = Observation::new(2, 7, 2, 0.0, 0.0)
            .with_lineage(5, 5)
            .with_state("M");
        assert_eq!(display_name(&daug, true), "7-5-M");
        assert_eq!(display_name(&daug, false), "7-5");
    }

    #[test]
    fn test_unassigned_names() {
        let bare = Observation::new(0, 0, 3, 0.0, 0.0);
        assert_eq!(display_name(&bare, true), "unassigned");
        assert_eq!(display_name(&bare, false), "unassigned");

        let with_state = Observation::new(0, 0, 3, 0.0, 0.0).with_state("S");
        assert_eq!(display_name(&with_state, true), "unassigned-S");
        assert_eq!(display_name(&with_state, false), "unassigned");
    }

    #[test]
    fn test_derive_names_rewrites_table() {
        let rows = vec![
            Observation::new(0, 1, 1, 0.0, 0.0).with_state("G1"),
            Observation::new(0, 0, 2, 0.0, 0.0),
        ];
        let mut table = LineageTable::from_rows(rows, Vec::new());
        derive_names(&mut table, true);
        assert_eq!(table.rows()[0].name, "1-G1");
        assert_eq!(table.rows()[1].name, "unassigned");
    }
}
