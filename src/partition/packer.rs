//! Greedy bin-packing of weighted test files into groups.
//!
//! [`pack`] is the longest-processing-time-first heuristic: items are
//! sorted by cost, heaviest first, and each one goes to the group with
//! the smallest running total. The result is within 4/3 of the optimal
//! makespan and fully deterministic.
//!
//! [`in_groups`] is the cost-blind alternative used for `found` grouping:
//! items are dealt out cyclically in their original order.
//!
//! Both honor a [`PinSet`]: every file matching a pinned pattern is placed
//! in one shared group before general balancing starts.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Group, PartitionError, TestItem};

/// A path pattern whose matches must all run in the same process.
#[derive(Debug, Clone)]
pub struct PinnedPattern {
    regex: Regex,
}

impl PinnedPattern {
    /// Compiles `pattern` as a regular expression matched against paths.
    pub fn new(pattern: &str) -> Result<Self, PartitionError> {
        Regex::new(pattern)
            .map(|regex| Self { regex })
            .map_err(|e| {
                PartitionError::InvalidConfiguration(format!(
                    "invalid pinned pattern '{}': {}",
                    pattern, e
                ))
            })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Serialize for PinnedPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PinnedPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Pinned patterns plus whether their groups are reserved for them.
#[derive(Debug, Clone, Default)]
pub struct PinSet {
    pub patterns: Vec<PinnedPattern>,

    /// When set, a group that received pinned files takes no other files.
    /// Ignored if every group is reserved.
    pub isolate: bool,
}

impl PinSet {
    pub fn new(patterns: Vec<PinnedPattern>, isolate: bool) -> Self {
        Self { patterns, isolate }
    }
}

/// Packs `items` into `num_groups` groups, heaviest item first into the
/// currently lightest group.
///
/// Always returns exactly `num_groups` groups (a `num_groups` of zero is
/// treated as one). Within each group items are sorted by path.
pub fn pack(items: Vec<TestItem>, num_groups: usize, pins: &PinSet) -> Vec<Group> {
    let (mut groups, eligible, mut items) = place_pinned(items, num_groups, pins);

    // Stable sort: equal costs keep their input order.
    items.sort_by(|a, b| b.cost.total_cmp(&a.cost));

    for item in items {
        let target = lightest(&groups, &eligible);
        groups[target].push(item);
    }

    finish(groups)
}

/// Deals `items` round-robin into `num_groups` groups without looking at
/// costs. Within each group items are sorted by path.
pub fn in_groups(items: Vec<TestItem>, num_groups: usize, pins: &PinSet) -> Vec<Group> {
    let (mut groups, eligible, items) = place_pinned(items, num_groups, pins);

    for (i, item) in items.into_iter().enumerate() {
        groups[eligible[i % eligible.len()]].push(item);
    }

    finish(groups)
}

/// Moves pinned items into their groups.
///
/// Returns the groups, the indices still open to general items, and the
/// items left to distribute.
fn place_pinned(
    mut items: Vec<TestItem>,
    num_groups: usize,
    pins: &PinSet,
) -> (Vec<Group>, Vec<usize>, Vec<TestItem>) {
    let num_groups = num_groups.max(1);
    let mut groups: Vec<Group> = (0..num_groups).map(|_| Group::default()).collect();
    let all: Vec<usize> = (0..num_groups).collect();
    let mut reserved = vec![false; num_groups];

    for pattern in &pins.patterns {
        let (matched, rest): (Vec<TestItem>, Vec<TestItem>) =
            items.into_iter().partition(|i| pattern.is_match(&i.path));
        items = rest;

        if matched.is_empty() {
            continue;
        }

        let target = lightest(&groups, &all);
        for item in matched {
            groups[target].push(item);
        }
        if pins.isolate {
            reserved[target] = true;
        }
    }

    let eligible: Vec<usize> = all.iter().copied().filter(|&i| !reserved[i]).collect();
    let eligible = if eligible.is_empty() { all } else { eligible };

    (groups, eligible, items)
}

/// Index of the group with the smallest total among `candidates`; ties go
/// to the lowest index.
fn lightest(groups: &[Group], candidates: &[usize]) -> usize {
    let mut best = candidates[0];
    for &i in &candidates[1..] {
        if groups[i].total_cost < groups[best].total_cost {
            best = i;
        }
    }
    best
}

fn finish(mut groups: Vec<Group>) -> Vec<Group> {
    for group in &mut groups {
        group.sort_by_path();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(spec: &[(&str, f64)]) -> Vec<TestItem> {
        spec.iter().map(|(p, c)| TestItem::new(*p, *c)).collect()
    }

    fn pins(patterns: &[&str], isolate: bool) -> PinSet {
        PinSet::new(
            patterns.iter().map(|p| PinnedPattern::new(p).unwrap()).collect(),
            isolate,
        )
    }

    #[test]
    fn test_pack_reference_split() {
        let input = items(&[("1", 1.0), ("2", 2.0), ("3", 3.0), ("4", 4.0), ("5", 5.0)]);
        let groups = pack(input, 2, &PinSet::default());

        assert_eq!(groups[0].paths(), vec!["1", "2", "5"]);
        assert_eq!(groups[1].paths(), vec!["3", "4"]);
    }

    #[test]
    fn test_pack_conserves_cost_and_items() {
        let input = items(&[
            ("a", 7.0),
            ("b", 3.5),
            ("c", 3.5),
            ("d", 2.0),
            ("e", 9.0),
            ("f", 0.5),
            ("g", 4.0),
        ]);
        let total: f64 = input.iter().map(|i| i.cost).sum();

        for n in 1..=9 {
            let groups = pack(input.clone(), n, &PinSet::default());
            assert_eq!(groups.len(), n);

            let packed: f64 = groups.iter().map(|g| g.total_cost).sum();
            assert_eq!(packed, total);

            let mut paths: Vec<&str> = groups.iter().flat_map(|g| g.paths()).collect();
            paths.sort();
            assert_eq!(paths, vec!["a", "b", "c", "d", "e", "f", "g"]);
        }
    }

    #[test]
    fn test_pack_respects_lpt_bound() {
        // Optimal makespan for 2 groups is 15 (8+7 / 6+5+4).
        let input = items(&[("a", 8.0), ("b", 7.0), ("c", 6.0), ("d", 5.0), ("e", 4.0)]);
        let groups = pack(input, 2, &PinSet::default());

        let max = groups.iter().map(|g| g.total_cost).fold(0.0, f64::max);
        assert!(max <= 15.0 * 4.0 / 3.0);
    }

    #[test]
    fn test_pack_more_groups_than_items() {
        let groups = pack(items(&[("a", 1.0), ("b", 2.0)]), 5, &PinSet::default());

        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0].paths(), vec!["b"]);
        assert_eq!(groups[1].paths(), vec!["a"]);
        assert!(groups[2..].iter().all(|g| g.is_empty() && g.total_cost == 0.0));
    }

    #[test]
    fn test_pack_empty_input() {
        let groups = pack(Vec::new(), 3, &PinSet::default());
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(Group::is_empty));
    }

    #[test]
    fn test_groups_are_sorted_by_path() {
        let input = items(&[("z", 1.0), ("m", 5.0), ("a", 3.0), ("q", 2.0)]);
        for group in pack(input, 2, &PinSet::default()) {
            let paths = group.paths();
            let mut sorted = paths.clone();
            sorted.sort();
            assert_eq!(paths, sorted);
        }
    }

    #[test]
    fn test_ties_keep_input_order() {
        let input = items(&[("x", 1.0), ("y", 1.0), ("z", 1.0)]);
        let groups = pack(input, 3, &PinSet::default());

        assert_eq!(groups[0].paths(), vec!["x"]);
        assert_eq!(groups[1].paths(), vec!["y"]);
        assert_eq!(groups[2].paths(), vec!["z"]);
    }

    #[test]
    fn test_in_groups_is_cyclic() {
        let input = items(&[("p0", 9.0), ("p1", 1.0), ("p2", 1.0), ("p3", 9.0)]);
        let groups = in_groups(input, 2, &PinSet::default());

        assert_eq!(groups[0].paths(), vec!["p0", "p2"]);
        assert_eq!(groups[1].paths(), vec!["p1", "p3"]);
        assert_eq!(groups[0].total_cost, 10.0);
    }

    #[test]
    fn test_pinned_items_share_one_group() {
        let input = items(&[
            ("spec/db/a_spec.rb", 1.0),
            ("spec/models/b_spec.rb", 5.0),
            ("spec/db/c_spec.rb", 2.0),
            ("spec/models/d_spec.rb", 4.0),
            ("spec/models/e_spec.rb", 3.0),
        ]);
        let groups = pack(input, 3, &pins(&["^spec/db/"], false));

        let holders: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.paths().iter().any(|p| p.starts_with("spec/db/")))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(holders.len(), 1);
        let pinned = &groups[holders[0]];
        assert!(pinned.paths().contains(&"spec/db/a_spec.rb"));
        assert!(pinned.paths().contains(&"spec/db/c_spec.rb"));
    }

    #[test]
    fn test_isolated_group_takes_no_general_items() {
        let input = items(&[
            ("slow/a", 1.0),
            ("b", 5.0),
            ("c", 4.0),
            ("d", 3.0),
        ]);
        let groups = pack(input, 3, &pins(&["^slow/"], true));

        assert_eq!(groups[0].paths(), vec!["slow/a"]);
        let rest: Vec<&str> = groups[1..].iter().flat_map(|g| g.paths()).collect();
        assert!(!rest.contains(&"slow/a"));
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn test_isolate_with_single_group_still_runs_everything() {
        let input = items(&[("slow/a", 1.0), ("b", 5.0)]);
        let groups = pack(input, 1, &pins(&["^slow/"], true));

        assert_eq!(groups[0].paths(), vec!["b", "slow/a"]);
    }

    #[test]
    fn test_unmatched_pin_is_noop() {
        let input = items(&[("a", 2.0), ("b", 1.0)]);
        let pinned = pack(input.clone(), 2, &pins(&["^nothing$"], true));
        let plain = pack(input, 2, &PinSet::default());

        assert_eq!(pinned, plain);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            PinnedPattern::new("(unclosed"),
            Err(PartitionError::InvalidConfiguration(_))
        ));
    }
}
