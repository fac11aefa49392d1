use fungen_types::Action;

/// Which actions of an axis an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    /// Explicit indices into the axis list. Out-of-range entries are ignored.
    Indices(Vec<usize>),
    /// Inclusive millisecond range.
    TimeRange { start_ms: u64, end_ms: u64 },
}

impl Selection {
    pub fn indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Selection::Indices(indices.into_iter().collect())
    }

    pub fn time_range(start_ms: u64, end_ms: u64) -> Self {
        Selection::TimeRange { start_ms, end_ms }
    }

    /// Indices touched by per-point operations.
    ///
    /// An explicit empty index list selects nothing.
    pub fn point_indices(&self, actions: &[Action]) -> Vec<usize> {
        match self {
            Selection::All => (0..actions.len()).collect(),
            Selection::Indices(indices) => valid_sorted(indices, actions.len()),
            Selection::TimeRange { start_ms, end_ms } => {
                time_range_indices(actions, *start_ms, *end_ms)
                    .map(|(start, end)| (start..=end).collect())
                    .unwrap_or_default()
            }
        }
    }

    /// Indices smoothed in place, possibly non-contiguous.
    ///
    /// An empty index list falls back to the whole axis.
    pub fn filter_indices(&self, actions: &[Action]) -> Vec<usize> {
        match self {
            Selection::Indices(indices) if indices.is_empty() => (0..actions.len()).collect(),
            other => other.point_indices(actions),
        }
    }

    /// Contiguous `[start, end]` span covering the selection, when it holds at
    /// least `min_points` selected actions.
    pub fn span(&self, actions: &[Action], min_points: usize) -> Option<(usize, usize)> {
        let (start, end, selected) = match self {
            Selection::Indices(indices) if !indices.is_empty() => {
                let valid = valid_sorted(indices, actions.len());
                let (first, last) = (*valid.first()?, *valid.last()?);
                (first, last, valid.len())
            }
            Selection::TimeRange { start_ms, end_ms } => {
                let (start, end) = time_range_indices(actions, *start_ms, *end_ms)?;
                (start, end, end - start + 1)
            }
            _ => {
                if actions.is_empty() {
                    return None;
                }
                (0, actions.len() - 1, actions.len())
            }
        };
        (selected >= min_points.max(1)).then_some((start, end))
    }

    pub fn is_explicit_indices(&self) -> bool {
        matches!(self, Selection::Indices(indices) if !indices.is_empty())
    }
}

fn valid_sorted(indices: &[usize], len: usize) -> Vec<usize> {
    let mut valid: Vec<usize> = indices.iter().copied().filter(|&i| i < len).collect();
    valid.sort_unstable();
    valid.dedup();
    valid
}

/// First index with `at >= start_ms` through last index with `at <= end_ms`.
pub fn time_range_indices(actions: &[Action], start_ms: u64, end_ms: u64) -> Option<(usize, usize)> {
    let start = actions.partition_point(|action| action.at < start_ms);
    let end_exclusive = actions.partition_point(|action| action.at <= end_ms);
    (start < end_exclusive).then(|| (start, end_exclusive - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: u64) -> Vec<Action> {
        (0..n).map(|i| Action::new(i * 100, (i * 10) as u8)).collect()
    }

    #[test]
    fn time_range_is_inclusive() {
        let actions = ramp(6);
        assert_eq!(time_range_indices(&actions, 100, 300), Some((1, 3)));
        assert_eq!(time_range_indices(&actions, 150, 250), Some((2, 2)));
        assert_eq!(time_range_indices(&actions, 210, 290), None);
        assert_eq!(time_range_indices(&[], 0, 10), None);
    }

    #[test]
    fn index_selection_ignores_invalid_entries() {
        let actions = ramp(4);
        let selection = Selection::indices([3, 9, 1, 1]);
        assert_eq!(selection.point_indices(&actions), vec![1, 3]);
        assert_eq!(selection.span(&actions, 2), Some((1, 3)));
        assert_eq!(selection.span(&actions, 3), None);
    }

    #[test]
    fn empty_index_list_differs_per_operation_kind() {
        let actions = ramp(3);
        let empty = Selection::Indices(Vec::new());
        assert!(empty.point_indices(&actions).is_empty());
        assert_eq!(empty.filter_indices(&actions), vec![0, 1, 2]);
        assert_eq!(empty.span(&actions, 3), Some((0, 2)));
    }
}
