use crate::catalog::{BucketKey, CatalogTree, Entry, EntryList, RESERVED_KEYS};
use crate::catalog_store::CatalogStore;
use crate::error::Result;
use crate::extractor::IdentitySource;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// One scraped record before identification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub identity: IdentitySource,
    pub payload: Map<String, Value>,
}

impl RawCandidate {
    pub fn from_codes<I, S>(codes: I, payload: Map<String, Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawCandidate {
            identity: IdentitySource::Codes(codes.into_iter().map(Into::into).collect()),
            payload,
        }
    }

    pub fn listing(id: impl Into<String>, payload: Map<String, Value>) -> Self {
        RawCandidate {
            identity: IdentitySource::ListingId(id.into()),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoIdentifierFound,
    DuplicateIdentifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(String),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub admitted: usize,
    pub duplicates: usize,
    pub no_identifier: usize,
    /// Admissions dropped with an interrupted bucket.
    pub discarded: usize,
    pub flushes: usize,
    pub failed_flushes: usize,
}

/// Owns the in-memory catalog and the only handle to its store, so every
/// write for a run goes through one place.
///
/// Admission is first-seen-wins: within a bucket the earliest candidate of an
/// identifier group is kept and any later candidate sharing one of its codes
/// is rejected, even if it carries a fuller payload.
///
/// A bucket opened with [`Merger::begin_bucket`] holds its admissions aside
/// until [`Merger::commit_bucket`], so a bucket that is abandoned midway never
/// reaches the store and is scraped again on the next run.
pub struct Merger {
    store: CatalogStore,
    tree: CatalogTree,
    seen: HashMap<BucketKey, HashSet<String>>,
    staged: HashMap<BucketKey, EntryList>,
    stats: MergeStats,
    dirty: bool,
}

impl Merger {
    pub fn new(store: CatalogStore, tree: CatalogTree) -> Self {
        Merger {
            store,
            tree,
            seen: HashMap::new(),
            staged: HashMap::new(),
            stats: MergeStats::default(),
            dirty: false,
        }
    }

    /// Loads the store, starting from an empty tree if it is corrupt.
    pub fn open(store: CatalogStore) -> Result<Self> {
        let tree = store.load_or_recover()?;
        Ok(Self::new(store, tree))
    }

    pub fn tree(&self) -> &CatalogTree {
        &self.tree
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether `id` is already recorded (as primary or cross reference) in the bucket.
    pub fn is_known(&mut self, bucket: &BucketKey, id: &str) -> bool {
        self.seen_in(bucket).contains(id)
    }

    pub fn begin_bucket(&mut self, bucket: &BucketKey) {
        self.staged.entry(bucket.clone()).or_default();
    }

    /// Moves the bucket's held admissions into the tree. Returns how many.
    pub fn commit_bucket(&mut self, bucket: &BucketKey) -> usize {
        let Some(entries) = self.staged.remove(bucket) else {
            return 0;
        };
        let count = entries.len();
        for entry in entries {
            self.tree.push(bucket, entry);
        }
        if count > 0 {
            self.dirty = true;
        }
        count
    }

    /// Drops the bucket's held admissions and forgets their identifiers.
    pub fn discard_bucket(&mut self, bucket: &BucketKey) -> usize {
        let Some(entries) = self.staged.remove(bucket) else {
            return 0;
        };
        // reseeded from the tree on next use
        self.seen.remove(bucket);
        self.stats.discarded += entries.len();
        if !entries.is_empty() {
            warn!("Discarded {} uncommitted entries from {}", entries.len(), bucket);
        }
        entries.len()
    }

    fn seen_in(&mut self, bucket: &BucketKey) -> &mut HashSet<String> {
        let tree = &self.tree;
        self.seen
            .entry(bucket.clone())
            .or_insert_with(|| tree.known_identifiers(bucket))
    }

    pub fn admit(&mut self, bucket: &BucketKey, candidate: RawCandidate) -> Admission {
        let Some(identity) = candidate.identity.identify() else {
            self.stats.no_identifier += 1;
            info!("Rejected candidate in {}: no identifier found", bucket);
            return Admission::Rejected(Rejection::NoIdentifierFound);
        };

        let seen = self.seen_in(bucket);

        // A candidate whose group overlaps a known one in any code is the same part.
        let collision = std::iter::once(&identity.primary)
            .chain(identity.cross.iter())
            .find(|id| seen.contains(*id))
            .cloned();
        if let Some(known) = collision {
            self.stats.duplicates += 1;
            info!("Rejected duplicate identifier {} in {}", known, bucket);
            return Admission::Rejected(Rejection::DuplicateIdentifier(known));
        }

        seen.insert(identity.primary.clone());
        seen.extend(identity.cross.iter().cloned());

        let mut payload = candidate.payload;
        for key in RESERVED_KEYS {
            if payload.remove(key).is_some() {
                warn!("Dropped payload field '{}' of {} in {}", key, identity.primary, bucket);
            }
        }

        let cross_count = identity.cross.len();
        let entry = Entry {
            identifier: identity.primary.clone(),
            cross_identifiers: identity.cross,
            payload,
        };
        match self.staged.get_mut(bucket) {
            Some(held) => held.push(entry),
            None => {
                self.tree.push(bucket, entry);
                self.dirty = true;
            }
        }
        self.stats.admitted += 1;
        info!(
            "Admitted {} into {} ({} cross references)",
            identity.primary, bucket, cross_count
        );
        Admission::Admitted(identity.primary)
    }

    pub fn flush_bucket(&mut self, bucket: &BucketKey) -> Result<()> {
        debug!(
            "Flushing catalog after {} ({} entries in bucket)",
            bucket,
            self.tree.entries(bucket).len()
        );
        self.flush()
    }

    /// Writes the whole tree. On failure the tree stays in memory and dirty
    /// so the next flush retries.
    pub fn flush(&mut self) -> Result<()> {
        match self.store.save(&self.tree) {
            Ok(()) => {
                self.stats.flushes += 1;
                self.dirty = false;
                info!("Catalog saved to {:?}", self.store.path());
                Ok(())
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                error!("Failed to save catalog: {}", e);
                Err(e)
            }
        }
    }

    pub fn into_tree(self) -> CatalogTree {
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn payload(price: f64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("price".to_string(), json!(price));
        map
    }

    fn merger_in(dir: &std::path::Path) -> Merger {
        let store = CatalogStore::open(dir.join("catalog.json")).unwrap();
        Merger::open(store).unwrap()
    }

    #[test]
    fn test_repeat_identifier_is_rejected() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let bucket = BucketKey::new("Audi", "A3", "turbo");

        let first = merger.admit(&bucket, RawCandidate::from_codes(["abc-123"], payload(120.0)));
        let second = merger.admit(&bucket, RawCandidate::from_codes(["XYZ999"], payload(80.0)));
        let repeat = merger.admit(&bucket, RawCandidate::from_codes(["ABC123"], payload(95.0)));

        assert_eq!(first, Admission::Admitted("ABC123".to_string()));
        assert_eq!(second, Admission::Admitted("XYZ999".to_string()));
        assert_eq!(
            repeat,
            Admission::Rejected(Rejection::DuplicateIdentifier("ABC123".to_string()))
        );

        let ids: HashSet<&str> = merger
            .tree()
            .entries(&bucket)
            .iter()
            .map(|e| e.identifier.as_str())
            .collect();
        assert_eq!(ids, HashSet::from(["ABC123", "XYZ999"]));
        assert_eq!(merger.tree().entries(&bucket)[0].payload["price"], json!(120.0));
        assert_eq!(merger.stats().duplicates, 1);
        assert_eq!(merger.stats().admitted, 2);
    }

    #[test]
    fn test_missing_identifier_is_rejected() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let bucket = BucketKey::flat("Audi");

        assert_eq!(
            merger.admit(&bucket, RawCandidate::from_codes(["ab", "x-1"], Map::new())),
            Admission::Rejected(Rejection::NoIdentifierFound)
        );
        assert_eq!(
            merger.admit(&bucket, RawCandidate::listing("  ", Map::new())),
            Admission::Rejected(Rejection::NoIdentifierFound)
        );
        assert!(merger.tree().is_empty());
        assert!(!merger.is_dirty());
        assert_eq!(merger.stats().no_identifier, 2);
    }

    #[test]
    fn test_cross_reference_blocks_later_primary() {
        let dir = tempdir().unwrap();
        let bucket = BucketKey::new("Audi", "A3", "turbo");
        let a = || RawCandidate::from_codes(["XXXX1", "XXXX1", "YYYY2"], Map::new());
        let b = || RawCandidate::from_codes(["YYYY2"], Map::new());

        let mut forward = merger_in(dir.path());
        assert!(forward.admit(&bucket, a()).is_admitted());
        assert_eq!(
            forward.admit(&bucket, b()),
            Admission::Rejected(Rejection::DuplicateIdentifier("YYYY2".to_string()))
        );

        let mut reverse = Merger::new(forward.store.clone(), CatalogTree::new());
        assert!(reverse.admit(&bucket, b()).is_admitted());
        assert_eq!(
            reverse.admit(&bucket, a()),
            Admission::Rejected(Rejection::DuplicateIdentifier("YYYY2".to_string()))
        );
        assert_eq!(reverse.tree().entries(&bucket)[0].identifier, "YYYY2");
        assert_eq!(reverse.tree().entries(&bucket).len(), 1);
    }

    #[test]
    fn test_is_known_covers_cross_references() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let bucket = BucketKey::new("Audi", "A3", "turbo");
        merger.admit(&bucket, RawCandidate::from_codes(["ABC123", "ABC123", "XYZ999"], Map::new()));

        assert!(merger.is_known(&bucket, "ABC123"));
        assert!(merger.is_known(&bucket, "XYZ999"));
        assert!(!merger.is_known(&bucket, "DEF456"));
        assert!(!merger.is_known(&BucketKey::flat("Audi"), "ABC123"));
    }

    #[test]
    fn test_buckets_are_independent() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let turbo = BucketKey::new("Audi", "A3", "turbo");
        let egr = BucketKey::new("Audi", "A3", "egr");

        assert!(merger.admit(&turbo, RawCandidate::from_codes(["ABC123"], Map::new())).is_admitted());
        assert!(merger.admit(&egr, RawCandidate::from_codes(["ABC123"], Map::new())).is_admitted());
    }

    #[test]
    fn test_seen_set_is_seeded_from_persisted_entries() {
        let dir = tempdir().unwrap();
        let bucket = BucketKey::new("Audi", "A3", "turbo");
        {
            let mut merger = merger_in(dir.path());
            merger.admit(&bucket, RawCandidate::from_codes(["ABC123", "ABC123", "XYZ999"], payload(1.0)));
            merger.flush_bucket(&bucket).unwrap();
        }

        let mut merger = merger_in(dir.path());
        assert_eq!(
            merger.admit(&bucket, RawCandidate::from_codes(["XYZ999"], payload(2.0))),
            Admission::Rejected(Rejection::DuplicateIdentifier("XYZ999".to_string()))
        );
        assert!(merger.admit(&bucket, RawCandidate::from_codes(["NEW1234"], payload(3.0))).is_admitted());
    }

    #[test]
    fn test_flush_then_reload_is_lossless() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        merger.admit(&BucketKey::new("Audi", "A3", "turbo"), RawCandidate::from_codes(["ABC123", "DEF456"], payload(10.5)));
        merger.admit(&BucketKey::flat("BMW"), RawCandidate::listing("24681357", payload(8900.0)));
        merger.flush().unwrap();
        assert!(!merger.is_dirty());

        let reloaded = merger_in(dir.path());
        assert_eq!(reloaded.tree(), merger.tree());
    }

    #[test]
    fn test_failed_flush_keeps_tree_for_retry() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("out");
        let store = CatalogStore::open(nested.join("catalog.json")).unwrap();
        let mut merger = Merger::new(store, CatalogTree::new());
        let bucket = BucketKey::flat("turbo");
        merger.admit(&bucket, RawCandidate::from_codes(["ABC123"], Map::new()));

        fs::remove_dir_all(&nested).unwrap();
        assert!(merger.flush().is_err());
        assert!(merger.is_dirty());
        assert_eq!(merger.stats().failed_flushes, 1);

        fs::create_dir_all(&nested).unwrap();
        merger.flush().unwrap();
        assert_eq!(merger.stats().flushes, 1);
        assert_eq!(merger_in(&nested).tree().entries(&bucket).len(), 1);
    }

    #[test]
    fn test_discarded_bucket_leaves_tree_untouched() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let bucket = BucketKey::new("Audi", "", "turbo");

        merger.begin_bucket(&bucket);
        assert!(merger.admit(&bucket, RawCandidate::from_codes(["ABC1234"], Map::new())).is_admitted());
        assert!(merger.is_known(&bucket, "ABC1234"));
        assert!(merger.tree().entries(&bucket).is_empty());
        assert!(!merger.is_dirty());

        assert_eq!(merger.discard_bucket(&bucket), 1);
        assert!(!merger.is_known(&bucket, "ABC1234"));
        assert!(!merger.tree().contains_bucket(&bucket));
        assert_eq!(merger.stats().discarded, 1);

        // a fresh attempt admits the same code again
        merger.begin_bucket(&bucket);
        assert!(merger.admit(&bucket, RawCandidate::from_codes(["ABC1234"], Map::new())).is_admitted());
        assert_eq!(merger.commit_bucket(&bucket), 1);
        assert!(merger.is_dirty());
        assert_eq!(merger.tree().entries(&bucket)[0].identifier, "ABC1234");
    }

    #[test]
    fn test_committed_bucket_keeps_rejecting_duplicates() {
        let dir = tempdir().unwrap();
        let mut merger = merger_in(dir.path());
        let bucket = BucketKey::flat("turbo");

        merger.begin_bucket(&bucket);
        merger.admit(&bucket, RawCandidate::from_codes(["ABC1234", "ABC1234", "XYZ9876"], Map::new()));
        assert_eq!(
            merger.admit(&bucket, RawCandidate::from_codes(["XYZ9876"], Map::new())),
            Admission::Rejected(Rejection::DuplicateIdentifier("XYZ9876".to_string()))
        );
        merger.commit_bucket(&bucket);
        assert_eq!(merger.commit_bucket(&bucket), 0);

        assert_eq!(
            merger.admit(&bucket, RawCandidate::from_codes(["XYZ9876"], Map::new())),
            Admission::Rejected(Rejection::DuplicateIdentifier("XYZ9876".to_string()))
        );
        assert_eq!(merger.tree().entries(&bucket).len(), 1);
    }

    #[test]
    fn test_reserved_payload_keys_do_not_shadow_identifier() {
        let dir = tempdir().unwrap();
        let bucket = BucketKey::flat("Audi");
        {
            let mut merger = merger_in(dir.path());
            for id in ["111", "222"] {
                let mut fields = payload(5000.0);
                fields.insert("identifier".to_string(), json!("SHADOW"));
                fields.insert("cross_identifiers".to_string(), json!(["SHADOW"]));
                assert!(merger.admit(&bucket, RawCandidate::listing(id, fields)).is_admitted());
            }
            merger.flush().unwrap();
        }

        let reloaded = merger_in(dir.path());
        let entries = reloaded.tree().entries(&bucket);
        let ids: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["111", "222"]);
        assert!(entries.iter().all(|e| e.cross_identifiers.is_empty()));
        assert!(entries.iter().all(|e| !e.payload.contains_key("identifier")));
        assert_eq!(entries[1].payload["price"], json!(5000.0));
    }

    #[test]
    fn test_random_admission_sequences_keep_identifiers_unique() {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog.json")).unwrap();
        let bucket = BucketKey::new("Audi", "A3", "turbo");
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut merger = Merger::new(store.clone(), CatalogTree::new());
            for _ in 0..40 {
                let len = rng.gen_range(1..=4);
                let codes: Vec<String> = (0..len).map(|_| format!("CODE{:02}", rng.gen_range(0..15))).collect();
                merger.admit(&bucket, RawCandidate::from_codes(codes, Map::new()));

                let mut all = HashSet::new();
                for entry in merger.tree().entries(&bucket) {
                    assert!(!entry.cross_identifiers.contains(&entry.identifier));
                    for id in entry.known_identifiers() {
                        assert!(all.insert(id.clone()), "{} recorded twice", id);
                    }
                }
            }
            let stats = merger.stats();
            assert_eq!(stats.admitted + stats.duplicates, 40);
        }
    }
}
