//! Nearest-neighbour identity matching over the known-embedding gallery.

use crate::types::{Embedding, KnownIdentity};

/// Distance below which the nearest known embedding is accepted.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// One known embedding paired with the label of the identity that owns it.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Every known embedding flattened in store order.
///
/// Order is significant: it decides ties between equally distant entries.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_identities(identities: &[KnownIdentity]) -> Self {
        let entries = identities
            .iter()
            .flat_map(|identity| {
                let label = identity.label();
                identity.embeddings.iter().map(move |embedding| GalleryEntry {
                    label: label.clone(),
                    embedding: embedding.clone(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length of the first entry, if any.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dim())
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest entry; `f32::INFINITY` for an empty gallery.
    pub distance: f32,
    /// Position of the nearest entry in the gallery.
    pub index: Option<usize>,
    /// Label of the accepted identity.
    pub label: Option<String>,
}

impl MatchResult {
    fn no_match(distance: f32, index: Option<usize>) -> Self {
        Self { matched: false, distance, index, label: None }
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans every entry of the probe's length; strict `<` keeps the first of
/// several equal minima.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut mismatched = 0usize;

        for (i, entry) in gallery.entries.iter().enumerate() {
            // A different length means a different model; never comparable.
            if entry.embedding.dim() != probe.dim() {
                mismatched += 1;
                continue;
            }
            let dist = probe.euclidean_distance(&entry.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        if mismatched > 0 {
            tracing::warn!(
                live_dim = probe.dim(),
                mismatched,
                gallery = gallery.len(),
                "gallery embeddings differ in length from the live one; retrain with the current model"
            );
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                distance: best_dist,
                index: Some(idx),
                label: Some(gallery.entries[idx].label.clone()),
            },
            _ => MatchResult::no_match(best_dist, best_idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str, embeddings: &[&[f32]]) -> KnownIdentity {
        KnownIdentity {
            id: id.into(),
            name: name.into(),
            embeddings: embeddings.iter().map(|v| Embedding::new(v.to_vec())).collect(),
        }
    }

    #[test]
    fn test_gallery_flattens_in_order() {
        let gallery = Gallery::from_identities(&[
            identity("1", "Ann", &[&[0.0], &[1.0]]),
            identity("2", "Bob", &[&[2.0]]),
        ]);
        let labels: Vec<_> = gallery.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["1 - Ann", "1 - Ann", "2 - Bob"]);
    }

    #[test]
    fn test_nearest_entry_wins() {
        // Distances from the origin probe: 0.1, 0.6, 0.3
        let gallery = Gallery::from_identities(&[
            identity("1", "Near", &[&[0.1, 0.0]]),
            identity("2", "Far", &[&[0.6, 0.0]]),
            identity("3", "Mid", &[&[0.0, 0.3]]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert!(result.matched);
        assert_eq!(result.label.as_deref(), Some("1 - Near"));
        assert_eq!(result.index, Some(0));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_entry_found_anywhere_in_gallery() {
        let gallery = Gallery::from_identities(&[
            identity("1", "Decoy", &[&[0.9, 0.0], &[0.0, 0.8]]),
            identity("2", "Match", &[&[0.7, 0.7], &[0.05, 0.0]]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.index, Some(3));
        assert_eq!(result.label.as_deref(), Some("2 - Match"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let gallery = Gallery::from_identities(&[identity("1", "Edge", &[&[0.5, 0.0]])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.label.is_none());
        assert_eq!(result.index, Some(0));
    }

    #[test]
    fn test_tie_goes_to_first_entry() {
        let gallery = Gallery::from_identities(&[
            identity("1", "First", &[&[0.2, 0.0]]),
            identity("2", "Second", &[&[0.0, 0.2]]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.label.as_deref(), Some("1 - First"));
    }

    #[test]
    fn test_deterministic() {
        let gallery = Gallery::from_identities(&[
            identity("1", "A", &[&[0.3, 0.1]]),
            identity("2", "B", &[&[0.1, 0.3]]),
        ]);
        let probe = Embedding::new(vec![0.2, 0.2]);
        let first = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        for _ in 0..10 {
            assert_eq!(EuclideanMatcher.compare(&probe, &gallery, 0.5), first);
        }
    }

    #[test]
    fn test_length_mismatch_never_matches() {
        // Shared prefix is identical, so a prefix-only distance would be zero
        let gallery = Gallery::from_identities(&[identity("1", "Ann", &[&[0.1, 0.0, 0.9, 0.9]])]);
        let live = Embedding::new(vec![0.1, 0.0]);
        let result = EuclideanMatcher.compare(&live, &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.label.is_none());
        assert!(result.index.is_none());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_length_mismatch_skipped_among_valid_entries() {
        let gallery = Gallery::from_identities(&[
            identity("1", "Stale", &[&[0.0]]),
            identity("2", "Current", &[&[0.1, 0.0]]),
        ]);
        let live = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&live, &gallery, 0.5);
        assert_eq!(result.label.as_deref(), Some("2 - Current"));
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_gallery_dim() {
        assert_eq!(Gallery::from_identities(&[]).dim(), None);
        let gallery = Gallery::from_identities(&[identity("1", "Ann", &[&[0.1, 0.0, 0.9]])]);
        assert_eq!(gallery.dim(), Some(3));
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &Gallery::default(), 0.5);
        assert!(!result.matched);
        assert!(result.index.is_none());
        assert!(result.distance.is_infinite());
    }
}
