//! Pure grouping logic for a producer's bulk `STATE_SNAPSHOT` push: figures
//! that share a nonzero `window_group` are co-located into one renderer
//! window; a zero group means "its own window". Kept as a standalone pure
//! function, no session-graph or supervisor access, so the partitioning
//! itself is exhaustively testable without spinning up a broker.

use std::collections::BTreeMap;

use crate::model::figure::Figure;

/// One renderer-to-be's figure ids, in the order their figures appeared in
/// the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnGroup {
    /// Figure ids this renderer should be handed on assignment.
    pub figure_ids: Vec<u64>,
}

/// Partition `figures` into spawn groups: figures sharing the same nonzero
/// `window_group` land in one group together, in snapshot order; a figure
/// with `window_group == 0` gets a solo group of its own.
#[must_use]
pub fn partition_by_window_group(figures: &[Figure]) -> Vec<SpawnGroup> {
    let mut groups: Vec<SpawnGroup> = Vec::new();
    let mut group_index: BTreeMap<u64, usize> = BTreeMap::new();

    for figure in figures {
        if figure.window_group == 0 {
            groups.push(SpawnGroup { figure_ids: vec![figure.id] });
            continue;
        }
        if let Some(&idx) = group_index.get(&figure.window_group) {
            groups[idx].figure_ids.push(figure.id);
        } else {
            group_index.insert(figure.window_group, groups.len());
            groups.push(SpawnGroup { figure_ids: vec![figure.id] });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fig(id: u64, group: u64) -> Figure {
        let mut f = Figure::new(id, String::new());
        f.window_group = group;
        f
    }

    #[test]
    fn zero_group_figures_each_get_their_own_group() {
        let figures = vec![fig(1, 0), fig(2, 0)];
        let groups = partition_by_window_group(&figures);
        assert_eq!(groups, vec![SpawnGroup { figure_ids: vec![1] }, SpawnGroup { figure_ids: vec![2] }]);
    }

    #[test]
    fn shared_nonzero_group_co_locates_figures() {
        let figures = vec![fig(1, 7), fig(2, 0), fig(3, 7)];
        let groups = partition_by_window_group(&figures);
        assert_eq!(groups, vec![SpawnGroup { figure_ids: vec![1, 3] }, SpawnGroup { figure_ids: vec![2] }]);
    }

    #[test]
    fn distinct_nonzero_groups_stay_separate() {
        let figures = vec![fig(1, 5), fig(2, 6)];
        let groups = partition_by_window_group(&figures);
        assert_eq!(groups, vec![SpawnGroup { figure_ids: vec![1] }, SpawnGroup { figure_ids: vec![2] }]);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(partition_by_window_group(&[]).is_empty());
    }
}
