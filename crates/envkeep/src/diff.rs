//! Key-level comparison of two variable maps

use crate::current::Variables;
use serde::Serialize;

/// Differences going from `left` to `right`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariableDiff {
    /// Keys only in right
    pub added: Vec<String>,
    /// Keys only in left
    pub removed: Vec<String>,
    /// Keys in both with different values
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl VariableDiff {
    pub fn between(left: &Variables, right: &Variables) -> Self {
        let mut diff = Self::default();

        for (key, value) in left {
            match right.get(key) {
                None => diff.removed.push(key.clone()),
                Some(other) if other != value => diff.changed.push(key.clone()),
                Some(_) => diff.unchanged.push(key.clone()),
            }
        }

        diff.added = right
            .keys()
            .filter(|key| !left.contains_key(*key))
            .cloned()
            .collect();

        diff
    }

    /// True when both sides hold identical maps
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_between() {
        let left = vars(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let right = vars(&[("B", "2"), ("C", "30"), ("D", "4"), ("0", "x")]);

        let diff = VariableDiff::between(&left, &right);
        assert_eq!(diff.added, vec!["0", "D"]);
        assert_eq!(diff.removed, vec!["A"]);
        assert_eq!(diff.changed, vec!["C"]);
        assert_eq!(diff.unchanged, vec!["B"]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_identical_maps() {
        let map = vars(&[("A", "1")]);
        let diff = VariableDiff::between(&map, &map);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, vec!["A"]);
        assert!(VariableDiff::between(&Variables::new(), &Variables::new()).is_empty());
    }
}
