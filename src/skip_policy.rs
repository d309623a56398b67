use crate::catalog::{BucketKey, CatalogTree};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketPolicy {
    /// Skip any bucket that already holds an entry. Suits slow-changing
    /// reference data such as OEM cross references.
    FetchOnce,
    /// Always scrape; duplicates are filtered on admission. Suits live listings.
    AlwaysRescrape,
}

impl fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketPolicy::FetchOnce => write!(f, "fetch-once"),
            BucketPolicy::AlwaysRescrape => write!(f, "always-rescrape"),
        }
    }
}

impl FromStr for BucketPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fetch-once" | "fetch_once" | "once" => Ok(BucketPolicy::FetchOnce),
            "always-rescrape" | "always_rescrape" | "always" => Ok(BucketPolicy::AlwaysRescrape),
            other => Err(format!("unknown bucket policy '{}'", other)),
        }
    }
}

/// Matches buckets level by level; a missing level matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub policy: BucketPolicy,
}

impl PolicyOverride {
    fn matches(&self, bucket: &BucketKey) -> bool {
        let level = |pattern: &Option<String>, value: &str| {
            pattern.as_deref().map_or(true, |p| p.eq_ignore_ascii_case(value))
        };
        level(&self.domain, &bucket.domain)
            && level(&self.subdomain, &bucket.subdomain)
            && level(&self.category, &bucket.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicy {
    pub default: BucketPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<PolicyOverride>,
}

impl SkipPolicy {
    pub fn new(default: BucketPolicy) -> Self {
        SkipPolicy {
            default,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, rule: PolicyOverride) -> Self {
        self.overrides.push(rule);
        self
    }

    /// First matching override wins, otherwise the default applies.
    pub fn policy_for(&self, bucket: &BucketKey) -> BucketPolicy {
        self.overrides
            .iter()
            .find(|rule| rule.matches(bucket))
            .map_or(self.default, |rule| rule.policy)
    }

    pub fn should_scrape(&self, tree: &CatalogTree, bucket: &BucketKey) -> bool {
        match self.policy_for(bucket) {
            BucketPolicy::FetchOnce => tree.entries(bucket).is_empty(),
            BucketPolicy::AlwaysRescrape => true,
        }
    }
}

impl Default for SkipPolicy {
    fn default() -> Self {
        SkipPolicy::new(BucketPolicy::FetchOnce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Entry;

    #[test]
    fn test_policy_decides_for_same_bucket_state() {
        let bucket = BucketKey::new("Audi", "A3", "turbo");
        let mut tree = CatalogTree::new();

        let fetch_once = SkipPolicy::new(BucketPolicy::FetchOnce);
        let always = SkipPolicy::new(BucketPolicy::AlwaysRescrape);
        assert!(fetch_once.should_scrape(&tree, &bucket));

        tree.push(&bucket, Entry::new("ABC123"));
        assert!(!fetch_once.should_scrape(&tree, &bucket));
        assert!(always.should_scrape(&tree, &bucket));
    }

    #[test]
    fn test_empty_bucket_is_scraped_under_fetch_once() {
        let bucket = BucketKey::new("Audi", "A3", "egr");
        let mut tree = CatalogTree::new();
        tree.upsert(&bucket);
        assert!(SkipPolicy::default().should_scrape(&tree, &bucket));
    }

    #[test]
    fn test_overrides_match_per_level() {
        let policy = SkipPolicy::new(BucketPolicy::FetchOnce).with_override(PolicyOverride {
            domain: Some("audi".to_string()),
            subdomain: None,
            category: Some("turbo".to_string()),
            policy: BucketPolicy::AlwaysRescrape,
        });

        assert_eq!(
            policy.policy_for(&BucketKey::new("Audi", "A4", "turbo")),
            BucketPolicy::AlwaysRescrape
        );
        assert_eq!(
            policy.policy_for(&BucketKey::new("Audi", "A4", "egr")),
            BucketPolicy::FetchOnce
        );
        assert_eq!(
            policy.policy_for(&BucketKey::new("BMW", "X5", "turbo")),
            BucketPolicy::FetchOnce
        );
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("always".parse::<BucketPolicy>(), Ok(BucketPolicy::AlwaysRescrape));
        assert_eq!("Fetch-Once".parse::<BucketPolicy>(), Ok(BucketPolicy::FetchOnce));
        assert!("sometimes".parse::<BucketPolicy>().is_err());

        let json = serde_json::to_string(&SkipPolicy::new(BucketPolicy::AlwaysRescrape)).unwrap();
        assert_eq!(json, r#"{"default":"always-rescrape"}"#);
    }
}
