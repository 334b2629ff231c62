use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// SHA-256 over the recent points sequence; equal sequences share a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityFingerprint([u8; 32]);

impl EntityFingerprint {
    pub fn from_points(points: &[Option<f64>]) -> Self {
        let mut hasher = Sha256::new();
        for p in points {
            match p {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for EntityFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    Raw,
    AdjustedDownFromLower,
    AdjustedUpFromHigher,
}

impl Correction {
    pub fn as_str(self) -> &'static str {
        match self {
            Correction::Raw => "raw",
            Correction::AdjustedDownFromLower => "adjusted_down_from_lower",
            Correction::AdjustedUpFromHigher => "adjusted_up_from_higher",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reference {
    pub threshold: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enforced {
    pub probability: f64,
    pub raw: f64,
    pub correction: Correction,
    pub reference: Option<Reference>,
}

impl Enforced {
    pub fn adjusted(&self) -> bool {
        self.correction != Correction::Raw
    }
}

#[derive(Debug, Default)]
struct Bucket {
    entries: Vec<(f64, f64)>,
    last_used: u64,
}

impl Bucket {
    fn upsert(&mut self, threshold: f64, probability: f64) -> usize {
        match self
            .entries
            .binary_search_by(|(t, _)| t.total_cmp(&threshold))
        {
            Ok(i) => {
                self.entries[i].1 = probability;
                i
            }
            Err(i) => {
                self.entries.insert(i, (threshold, probability));
                i
            }
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    buckets: HashMap<EntityFingerprint, Bucket>,
    tick: u64,
}

#[derive(Debug)]
pub struct ThresholdCache {
    inner: Mutex<CacheState>,
    capacity: usize,
    max_adjustment: f64,
}

impl ThresholdCache {
    /// `capacity` bounds the number of entity buckets (0 = unbounded);
    /// `max_adjustment` caps a single correction, in percentage points.
    pub fn new(capacity: usize, max_adjustment: f64) -> Self {
        Self {
            inner: Mutex::new(CacheState::default()),
            capacity,
            max_adjustment: max_adjustment.max(0.0),
        }
    }

    /// Stores `raw` for `threshold` and returns it, corrected against the
    /// nearest recorded neighbours when it would break the ordering.
    pub fn record(&self, fingerprint: EntityFingerprint, threshold: f64, raw: f64) -> Enforced {
        let raw = raw.clamp(0.0, 100.0);
        let mut state = self.inner.lock();
        state.tick += 1;
        let tick = state.tick;
        if !state.buckets.contains_key(&fingerprint) {
            self.evict_for_insert(&mut state);
        }
        let bucket = state.buckets.entry(fingerprint).or_default();
        bucket.last_used = tick;

        let i = bucket.upsert(threshold, raw);
        let lower = i.checked_sub(1).map(|j| bucket.entries[j]);
        let higher = bucket.entries.get(i + 1).copied();

        let (probability, correction, reference) = match (lower, higher) {
            (Some((t, p)), _) if p < raw => {
                let adj = (p - self.max_adjustment.min((raw - p) * 0.5)).max(0.0);
                (adj, Correction::AdjustedDownFromLower, Some((t, p)))
            }
            (_, Some((t, p))) if p > raw => {
                let adj = (p + self.max_adjustment.min((p - raw) * 0.5)).min(100.0);
                (adj, Correction::AdjustedUpFromHigher, Some((t, p)))
            }
            _ => (raw, Correction::Raw, None),
        };
        if correction != Correction::Raw {
            bucket.entries[i].1 = probability;
            debug!(
                %fingerprint,
                threshold,
                raw,
                probability,
                correction = correction.as_str(),
                "monotonicity correction"
            );
        }

        Enforced {
            probability,
            raw,
            correction,
            reference: reference.map(|(threshold, probability)| Reference {
                threshold,
                probability,
            }),
        }
    }

    pub fn thresholds(&self, fingerprint: &EntityFingerprint) -> Vec<(f64, f64)> {
        self.inner
            .lock()
            .buckets
            .get(fingerprint)
            .map(|b| b.entries.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.buckets.clear();
        state.tick = 0;
    }

    fn evict_for_insert(&self, state: &mut CacheState) {
        if self.capacity == 0 {
            return;
        }
        while state.buckets.len() >= self.capacity {
            let Some(oldest) = state
                .buckets
                .iter()
                .min_by_key(|(_, b)| b.last_used)
                .map(|(k, _)| *k)
            else {
                break;
            };
            state.buckets.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(seed: f64) -> EntityFingerprint {
        EntityFingerprint::from_points(&[Some(seed), Some(20.0), None, Some(31.0)])
    }

    #[test]
    fn fingerprint_depends_on_sequence() {
        assert_eq!(fp(1.0), fp(1.0));
        assert_ne!(fp(1.0), fp(2.0));
        let a = EntityFingerprint::from_points(&[Some(0.0), None]);
        let b = EntityFingerprint::from_points(&[None, Some(0.0)]);
        assert_ne!(a, b);
        assert_eq!(fp(1.0).to_string().len(), 16);
    }

    #[test]
    fn first_threshold_is_returned_raw() {
        let cache = ThresholdCache::new(8, 0.5);
        let out = cache.record(fp(1.0), 25.5, 55.0);
        assert_eq!(out.probability, 55.0);
        assert!(!out.adjusted());
        assert!(out.reference.is_none());
    }

    #[test]
    fn lower_line_below_a_higher_one_is_pulled_up() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 30.5, 40.0);
        let out = cache.record(fp(1.0), 28.5, 35.0);
        assert_eq!(out.correction, Correction::AdjustedUpFromHigher);
        assert!((out.probability - 40.5).abs() < 1e-12);
        assert_eq!(
            out.reference,
            Some(Reference {
                threshold: 30.5,
                probability: 40.0
            })
        );
        assert_eq!(cache.thresholds(&fp(1.0)), vec![(28.5, 40.5), (30.5, 40.0)]);
    }

    #[test]
    fn higher_line_above_a_lower_one_is_pulled_down() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 26.5, 50.0);
        let out = cache.record(fp(1.0), 28.5, 60.0);
        assert_eq!(out.correction, Correction::AdjustedDownFromLower);
        assert!((out.probability - 49.5).abs() < 1e-12);
        assert_eq!(out.raw, 60.0);
    }

    #[test]
    fn small_violations_are_halved() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 26.5, 50.0);
        let out = cache.record(fp(1.0), 28.5, 50.4);
        assert!((out.probability - 49.8).abs() < 1e-12);
    }

    #[test]
    fn lower_neighbour_is_checked_first() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 20.5, 50.0);
        cache.record(fp(1.0), 30.5, 70.0);
        let out = cache.record(fp(1.0), 25.5, 60.0);
        assert_eq!(out.correction, Correction::AdjustedDownFromLower);
        assert_eq!(out.reference.map(|r| r.threshold), Some(20.5));
    }

    #[test]
    fn consistent_values_pass_through() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 20.5, 70.0);
        cache.record(fp(1.0), 30.5, 30.0);
        let out = cache.record(fp(1.0), 25.5, 50.0);
        assert_eq!(out.correction, Correction::Raw);
        assert_eq!(out.probability, 50.0);
    }

    #[test]
    fn other_entities_do_not_interfere() {
        let cache = ThresholdCache::new(8, 0.5);
        cache.record(fp(1.0), 30.5, 40.0);
        let out = cache.record(fp(2.0), 28.5, 35.0);
        assert!(!out.adjusted());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn least_recently_used_bucket_is_evicted() {
        let cache = ThresholdCache::new(2, 0.5);
        cache.record(fp(1.0), 20.5, 50.0);
        cache.record(fp(2.0), 20.5, 50.0);
        cache.record(fp(1.0), 22.5, 45.0);
        cache.record(fp(3.0), 20.5, 50.0);
        assert_eq!(cache.len(), 2);
        assert!(cache.thresholds(&fp(2.0)).is_empty());
        assert_eq!(cache.thresholds(&fp(1.0)).len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let cache = ThresholdCache::new(0, 0.5);
        cache.record(fp(1.0), 20.5, 50.0);
        cache.reset();
        assert!(cache.is_empty());
    }
}
