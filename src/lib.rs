pub mod catalog;
pub mod catalog_store;
pub mod code_index;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod input_loader;
pub mod logger;
pub mod merger;
pub mod page_parser;
pub mod runner;
pub mod site_profile;
pub mod skip_policy;

// Exporting types for convenience
pub use catalog::{BucketKey, CatalogTree, Entry};
pub use catalog_store::CatalogStore;
pub use error::{CatalogError, Result};
pub use extractor::Extractor;
pub use fetcher::{Fetch, Fetcher, FetcherConfig};
pub use input_loader::{Target, TargetRecord};
pub use merger::{Admission, Merger, RawCandidate, Rejection};
pub use runner::{RunSummary, Runner};
pub use site_profile::SiteProfile;
pub use skip_policy::{BucketPolicy, SkipPolicy};
