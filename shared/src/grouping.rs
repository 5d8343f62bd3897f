//! Run-length grouping of ordered items for collapsible list sections.
//!
//! [`group_runs`] partitions a sequence into maximal runs of adjacent items
//! that share a key (typically the repayment `status`). Groups are derived
//! values: recompute them from the current collection whenever it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group<K> {
    pub key: K,
    /// Index of the first item of the run.
    pub start: usize,
    /// Index of the last item of the run (inclusive).
    pub end: usize,
    pub count: usize,
    pub indices: Vec<usize>,
}

impl<K> Group<K> {
    fn open(key: K, index: usize) -> Self {
        Self {
            key,
            start: index,
            end: index,
            count: 1,
            indices: vec![index],
        }
    }

    fn extend(&mut self, index: usize) {
        self.end = index;
        self.count += 1;
        self.indices.push(index);
    }

    pub fn is_singleton(&self) -> bool {
        self.count == 1
    }

    pub fn first_item<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.get(self.start)
    }

    pub fn last_item<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.get(self.end)
    }
}

/// Single left-to-right scan; a new group starts whenever `key_of` differs
/// from the key of the group being built.
pub fn group_runs<T, K, F>(items: &[T], mut key_of: F) -> Vec<Group<K>>
where
    K: PartialEq,
    F: FnMut(&T) -> K,
{
    let mut groups: Vec<Group<K>> = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let key = key_of(item);
        match groups.last_mut() {
            Some(current) if current.key == key => current.extend(index),
            _ => groups.push(Group::open(key, index)),
        }
    }

    groups
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsePolicy {
    /// Render single-item runs as plain items instead of a one-row section.
    pub expand_singletons: bool,
}

/// A display row of a grouped list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row<K> {
    Header {
        start: usize,
        key: K,
        count: usize,
        expanded: bool,
    },
    Item {
        index: usize,
    },
}

/// Flattens groups into rows. `expanded` holds the `start` index of every
/// section the user opened.
pub fn layout_rows<K: Clone>(
    groups: &[Group<K>],
    expanded: &BTreeSet<usize>,
    policy: CollapsePolicy,
) -> Vec<Row<K>> {
    let mut rows = Vec::with_capacity(groups.len());

    for group in groups {
        if group.is_singleton() && policy.expand_singletons {
            rows.push(Row::Item { index: group.start });
            continue;
        }

        let is_open = expanded.contains(&group.start);
        rows.push(Row::Header {
            start: group.start,
            key: group.key.clone(),
            count: group.count,
            expanded: is_open,
        });

        if is_open {
            rows.extend(group.indices.iter().map(|&index| Row::Item { index }));
        }
    }

    rows
}

/// One item row per index, for lists that are not grouped.
pub fn flat_rows<K>(len: usize) -> Vec<Row<K>> {
    (0..len).map(|index| Row::Item { index }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Status {
        Pending,
        Paid,
    }

    fn summary<K: Copy>(groups: &[Group<K>]) -> Vec<(K, usize)> {
        groups.iter().map(|g| (g.key, g.count)).collect()
    }

    #[test]
    fn groups_adjacent_equal_statuses() {
        use Status::*;
        let schedule = [Pending, Pending, Paid, Paid, Paid, Pending];
        let groups = group_runs(&schedule, |s| *s);

        assert_eq!(summary(&groups), vec![(Pending, 2), (Paid, 3), (Pending, 1)]);
        assert_eq!(groups[1].start, 2);
        assert_eq!(groups[1].end, 4);
        assert_eq!(groups[1].indices, vec![2, 3, 4]);
        assert_eq!(groups[1].first_item(&schedule), Some(&Paid));
        assert_eq!(groups[2].last_item(&schedule), Some(&Pending));
    }

    #[test]
    fn empty_input_has_no_groups() {
        let groups = group_runs(&[] as &[u8], |b| *b);
        assert!(groups.is_empty());
    }

    #[test]
    fn grouping_does_not_sort() {
        let groups = group_runs(&[1, 2, 1], |n| *n);
        assert_eq!(summary(&groups), vec![(1, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn collapsed_sections_hide_items() {
        let groups = group_runs(&["a", "a", "b"], |s| *s);
        let rows = layout_rows(&groups, &BTreeSet::new(), CollapsePolicy::default());

        assert_eq!(
            rows,
            vec![
                Row::Header {
                    start: 0,
                    key: "a",
                    count: 2,
                    expanded: false
                },
                Row::Header {
                    start: 2,
                    key: "b",
                    count: 1,
                    expanded: false
                },
            ]
        );
    }

    #[test]
    fn expanded_section_lists_its_items() {
        let groups = group_runs(&["a", "a", "b"], |s| *s);
        let expanded: BTreeSet<usize> = [0].into_iter().collect();
        let policy = CollapsePolicy {
            expand_singletons: true,
        };
        let rows = layout_rows(&groups, &expanded, policy);

        assert_eq!(
            rows,
            vec![
                Row::Header {
                    start: 0,
                    key: "a",
                    count: 2,
                    expanded: true
                },
                Row::Item { index: 0 },
                Row::Item { index: 1 },
                Row::Item { index: 2 },
            ]
        );
    }

    proptest! {
        #[test]
        fn groups_partition_the_input(keys in proptest::collection::vec(0u8..3, 0..60)) {
            let groups = group_runs(&keys, |k| *k);

            let indices: Vec<usize> = groups.iter().flat_map(|g| g.indices.clone()).collect();
            prop_assert_eq!(indices, (0..keys.len()).collect::<Vec<_>>());

            let total: usize = groups.iter().map(|g| g.count).sum();
            prop_assert_eq!(total, keys.len());
        }

        #[test]
        fn adjacent_items_share_group_iff_equal(keys in proptest::collection::vec(0u8..3, 1..60)) {
            let groups = group_runs(&keys, |k| *k);

            for group in &groups {
                prop_assert!(group.indices.iter().all(|&i| keys[i] == group.key));
                prop_assert_eq!(group.end - group.start + 1, group.count);
            }
            for pair in groups.windows(2) {
                prop_assert_ne!(pair[0].key, pair[1].key);
            }
        }
    }
}
