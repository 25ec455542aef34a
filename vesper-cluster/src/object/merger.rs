//! Merge strategies over the parts of a replicated object.
//!
//! Parts are handed over in node order, so every merge is deterministic for
//! a given snapshot.

use super::part::Part;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Folds every part of an object into a single result.
pub trait Merger<T, R> {
    /// Merge a snapshot of parts
    fn merge(&self, parts: &[Part<T>]) -> R;
}

impl<T, R, F> Merger<T, R> for F
where
    F: Fn(&[Part<T>]) -> R,
{
    fn merge(&self, parts: &[Part<T>]) -> R {
        self(parts)
    }
}

/// Sum of all counters
pub fn long_sum(parts: &[Part<i64>]) -> i64 {
    parts.iter().map(|part| *part.value()).sum()
}

/// Largest counter, `None` when there are no parts
pub fn long_max(parts: &[Part<i64>]) -> Option<i64> {
    parts.iter().map(|part| *part.value()).max()
}

/// All list elements, each kept once at its first occurrence
pub fn list_union(parts: &[Part<Vec<Value>>]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    for value in parts.iter().flat_map(|part| part.value()) {
        if !result.contains(value) {
            result.push(value.clone());
        }
    }
    result
}

/// Union of all maps. On key clashes the later node wins.
pub fn map_union(parts: &[Part<Map<String, Value>>]) -> Map<String, Value> {
    let mut result = Map::new();
    for part in parts {
        result.extend(part.value().iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    result
}

/// All list elements, duplicates included
pub fn concat(parts: &[Part<Vec<Value>>]) -> Vec<Value> {
    parts.iter().flat_map(|part| part.value().iter().cloned()).collect()
}

/// Largest value according to `cmp`
pub fn max_by<T, F>(cmp: F) -> impl Fn(&[Part<T>]) -> Option<T>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering,
{
    move |parts| parts.iter().map(Part::value).max_by(|a, b| cmp(a, b)).cloned()
}
