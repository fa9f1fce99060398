//! Per-field sample gating.
//!
//! A `Filters` set maps event-document keys to scalar predicates. Every
//! predicate must pass for a sample document to be accepted. Missing keys and
//! non-finite values count as failures while `drop_missing` is on; turning it
//! off lets such samples through, which is occasionally useful when a source
//! legitimately omits a field.

use std::collections::BTreeMap;

use crate::stream::Document;

pub type FilterFn = Box<dyn Fn(f64) -> bool>;

pub struct Filters {
    rules: BTreeMap<String, FilterFn>,
    drop_missing: bool,
}

impl Default for Filters {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Filters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Filters")
            .field("fields", &self.rules.keys().collect::<Vec<_>>())
            .field("drop_missing", &self.drop_missing)
            .finish()
    }
}

impl Filters {
    /// Empty filter set; accepts everything.
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
            drop_missing: true,
        }
    }

    pub fn with_drop_missing(mut self, drop_missing: bool) -> Self {
        self.drop_missing = drop_missing;
        self
    }

    pub fn drop_missing(&self) -> bool {
        self.drop_missing
    }

    /// Install a predicate for one document key, replacing any existing one.
    pub fn insert<F>(&mut self, field: impl Into<String>, predicate: F)
    where
        F: Fn(f64) -> bool + 'static,
    {
        self.rules.insert(field.into(), Box::new(predicate));
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with<F>(mut self, field: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(f64) -> bool + 'static,
    {
        self.insert(field, predicate);
        self
    }

    /// Require `min <= value <= max` on a field; either bound may be open.
    pub fn with_bounds(self, field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.with(field, move |x| {
            min.is_none_or(|lo| x >= lo) && max.is_none_or(|hi| x <= hi)
        })
    }

    /// Merge another set of rules into this one (later rules win per field).
    pub fn install(&mut self, other: Filters) {
        self.rules.extend(other.rules);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against one event document.
    pub fn passes(&self, doc: &Document) -> bool {
        self.rules.iter().all(|(key, predicate)| {
            match doc.get(key) {
                // Missing and non-finite data share a fate controlled by
                // drop_missing.
                None => !self.drop_missing,
                Some(v) if !v.is_finite() => !self.drop_missing,
                Some(v) => predicate(*v),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, f64)]) -> Document {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_set_accepts_anything() {
        let f = Filters::new();
        assert!(f.passes(&doc(&[("a", f64::NAN)])));
        assert!(f.passes(&Document::new()));
    }

    #[test]
    fn predicate_gates_the_sample() {
        let f = Filters::new().with("a", |x| x > 0.0);
        assert!(f.passes(&doc(&[("a", 1.0)])));
        assert!(!f.passes(&doc(&[("a", -1.0)])));
    }

    #[test]
    fn all_rules_must_pass() {
        let f = Filters::new()
            .with("a", |x| x > 0.0)
            .with("c", |x| (4.0..6.0).contains(&x));
        assert!(f.passes(&doc(&[("a", 1.0), ("c", 5.0)])));
        assert!(!f.passes(&doc(&[("a", 1.0), ("c", 9.0)])));
    }

    #[test]
    fn missing_and_non_finite_follow_drop_missing() {
        let strict = Filters::new().with("a", |_| true);
        assert!(!strict.passes(&Document::new()));
        assert!(!strict.passes(&doc(&[("a", f64::NAN)])));
        assert!(!strict.passes(&doc(&[("a", f64::INFINITY)])));

        let lax = Filters::new().with("a", |_| false).with_drop_missing(false);
        assert!(lax.passes(&Document::new()));
        assert!(lax.passes(&doc(&[("a", f64::NAN)])));
        // A present, finite value is still judged by the predicate.
        assert!(!lax.passes(&doc(&[("a", 1.0)])));
    }

    #[test]
    fn bounds_helper_covers_open_ends() {
        let f = Filters::new().with_bounds("a", Some(0.0), None);
        assert!(f.passes(&doc(&[("a", 1e9)])));
        assert!(!f.passes(&doc(&[("a", -0.1)])));
    }
}
