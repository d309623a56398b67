use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Three-level bucket key (brand, model, part). An empty level means the
/// catalog has no grouping at that depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub domain: String,
    pub subdomain: String,
    pub category: String,
}

impl BucketKey {
    pub fn new(domain: impl Into<String>, subdomain: impl Into<String>, category: impl Into<String>) -> Self {
        BucketKey {
            domain: domain.into(),
            subdomain: subdomain.into(),
            category: category.into(),
        }
    }

    /// A bucket grouped by a single key, e.g. listings per brand or entries per part.
    pub fn flat(domain: impl Into<String>) -> Self {
        Self::new(domain, "", "")
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<&str> = [&self.domain, &self.subdomain, &self.category]
            .into_iter()
            .map(String::as_str)
            .filter(|level| !level.is_empty())
            .collect();
        write!(f, "{}", levels.join(" / "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub identifier: String,
    #[serde(default)]
    pub cross_identifiers: BTreeSet<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Entry {
    pub fn new(identifier: impl Into<String>) -> Self {
        Entry {
            identifier: identifier.into(),
            cross_identifiers: BTreeSet::new(),
            payload: Map::new(),
        }
    }

    /// Primary identifier plus every cross reference.
    pub fn known_identifiers(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.identifier).chain(self.cross_identifiers.iter())
    }
}

/// Keys owned by [`Entry`] itself. A payload field with one of these names
/// would be written twice and shadow the real identifier on reload.
pub const RESERVED_KEYS: [&str; 2] = ["identifier", "cross_identifiers"];

pub type EntryList = Vec<Entry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogTree {
    buckets: BTreeMap<String, BTreeMap<String, BTreeMap<String, EntryList>>>,
}

impl CatalogTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, bucket: &BucketKey) -> &[Entry] {
        self.buckets
            .get(&bucket.domain)
            .and_then(|models| models.get(&bucket.subdomain))
            .and_then(|parts| parts.get(&bucket.category))
            .map(|entries| entries.as_slice())
            .unwrap_or(&[])
    }

    /// The single path through which buckets are created.
    pub fn upsert(&mut self, bucket: &BucketKey) -> &mut EntryList {
        self.buckets
            .entry(bucket.domain.clone())
            .or_default()
            .entry(bucket.subdomain.clone())
            .or_default()
            .entry(bucket.category.clone())
            .or_default()
    }

    pub fn push(&mut self, bucket: &BucketKey, entry: Entry) {
        self.upsert(bucket).push(entry);
    }

    pub fn contains_bucket(&self, bucket: &BucketKey) -> bool {
        self.buckets
            .get(&bucket.domain)
            .and_then(|models| models.get(&bucket.subdomain))
            .map_or(false, |parts| parts.contains_key(&bucket.category))
    }

    /// Every identifier (primary and cross) already recorded in the bucket.
    pub fn known_identifiers(&self, bucket: &BucketKey) -> HashSet<String> {
        self.entries(bucket)
            .iter()
            .flat_map(|entry| entry.known_identifiers().cloned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketKey, &EntryList)> {
        self.buckets.iter().flat_map(|(domain, models)| {
            models.iter().flat_map(move |(subdomain, parts)| {
                parts.iter().map(move |(category, entries)| {
                    (BucketKey::new(domain.as_str(), subdomain.as_str(), category.as_str()), entries)
                })
            })
        })
    }

    pub fn domains(&self) -> impl Iterator<Item = &String> {
        self.buckets.keys()
    }

    pub fn bucket_count(&self) -> usize {
        self.iter().count()
    }

    pub fn entry_count(&self) -> usize {
        self.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drops entries with an empty identifier or one already used as a primary
    /// identifier earlier in the same bucket. Returns how many were dropped.
    pub fn dedupe(&mut self) -> usize {
        let mut dropped = 0;
        for models in self.buckets.values_mut() {
            for parts in models.values_mut() {
                for entries in parts.values_mut() {
                    let mut seen = HashSet::new();
                    let before = entries.len();
                    entries.retain(|entry| {
                        !entry.identifier.is_empty() && seen.insert(entry.identifier.clone())
                    });
                    dropped += before - entries.len();
                }
            }
        }
        dropped
    }

    /// Primary identifiers that also appear as a cross reference of an earlier
    /// entry in the same bucket. New admissions never create these; old
    /// catalogs may hold some.
    pub fn cross_overlaps(&self) -> Vec<(BucketKey, String)> {
        let mut overlaps = Vec::new();
        for (bucket, entries) in self.iter() {
            let mut cross_seen: HashSet<&str> = HashSet::new();
            for entry in entries {
                if cross_seen.contains(entry.identifier.as_str()) {
                    overlaps.push((bucket.clone(), entry.identifier.clone()));
                }
                cross_seen.extend(entry.cross_identifiers.iter().map(String::as_str));
            }
        }
        overlaps
    }
}
