use crate::catalog::BucketKey;
use crate::delay_manager::Pacer;
use crate::error::Result;
use crate::fetcher::Fetch;
use crate::input_loader::Target;
use crate::merger::{MergeStats, Merger};
use crate::page_parser::{PageParser, ParsedItem};
use crate::site_profile::SiteProfile;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Pagination of one query stops after this many failed pages in a row.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub buckets_total: usize,
    pub buckets_scraped: usize,
    pub buckets_skipped: usize,
    pub pages_fetched: usize,
    pub fetch_failures: usize,
    pub items_seen: usize,
    /// Items missing a required field.
    pub incomplete: usize,
    /// Listings recognised before their detail page was fetched.
    pub known_skipped: usize,
    pub merge: MergeStats,
    pub interrupted: bool,
}

pub struct Runner<'a> {
    parser: PageParser,
    fetcher: &'a dyn Fetch,
    pacer: &'a dyn Pacer,
    shutdown: Arc<AtomicBool>,
    max_pages: u32,
}

impl<'a> Runner<'a> {
    pub fn new(
        profile: &SiteProfile,
        fetcher: &'a dyn Fetch,
        pacer: &'a dyn Pacer,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Runner {
            parser: PageParser::new(profile)?,
            fetcher,
            pacer,
            shutdown,
            max_pages: profile.pagination.max_pages.max(1),
        })
    }

    /// Caps pagination below the profile's own limit.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = self.max_pages.min(max_pages.max(1));
        self
    }

    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn run(&self, merger: &mut Merger, targets: &[Target]) -> RunSummary {
        let profile = self.parser.profile();
        let mut summary = RunSummary {
            buckets_total: targets.len(),
            ..RunSummary::default()
        };

        for (i, target) in targets.iter().enumerate() {
            if self.cancelled() {
                summary.interrupted = true;
                break;
            }
            let bucket = target.bucket();
            if !profile.policy.should_scrape(merger.tree(), &bucket) {
                summary.buckets_skipped += 1;
                info!(
                    "Skipping {} ({} entries already stored, policy {})",
                    bucket,
                    merger.tree().entries(&bucket).len(),
                    profile.policy.policy_for(&bucket)
                );
                continue;
            }

            if summary.buckets_scraped > 0 {
                self.pacer.bucket_delay();
            }
            summary.buckets_scraped += 1;
            info!("Processing {} / {} : {}", i + 1, targets.len(), bucket);

            merger.begin_bucket(&bucket);
            self.scrape_bucket(merger, target, &bucket, &mut summary);

            // A half-scraped bucket is never stored, so the next run redoes it.
            if summary.interrupted {
                let dropped = merger.discard_bucket(&bucket);
                info!("Interrupted during {}, {} entries not kept", bucket, dropped);
                break;
            }
            merger.commit_bucket(&bucket);
            if merger.is_dirty() && merger.flush_bucket(&bucket).is_err() {
                warn!("Keeping {} in memory, the next flush retries", bucket);
            }
        }

        if merger.is_dirty() && merger.flush().is_err() {
            warn!("Final flush failed, unsaved entries are lost");
        }
        summary.merge = merger.stats();
        summary
    }

    fn scrape_bucket(&self, merger: &mut Merger, target: &Target, bucket: &BucketKey, summary: &mut RunSummary) {
        let profile = self.parser.profile();
        for template in &profile.queries {
            let vars = target.query_vars(template);
            let mut last_page = self.max_pages;
            let mut failures_in_row = 0;
            let mut page = 1;

            while page <= last_page {
                if self.cancelled() {
                    summary.interrupted = true;
                    return;
                }
                let Some(url) = profile.page_url(page, &vars) else {
                    break;
                };

                debug!("Fetching page {} of '{}': {}", page, vars["query"], url);
                let html = match self.fetcher.fetch(&url) {
                    Ok(html) => html,
                    Err(e) => {
                        summary.fetch_failures += 1;
                        failures_in_row += 1;
                        warn!("Skipping page {} of {}: {}", page, bucket, e);
                        if failures_in_row >= MAX_CONSECUTIVE_FAILURES {
                            break;
                        }
                        page += 1;
                        continue;
                    }
                };
                failures_in_row = 0;
                summary.pages_fetched += 1;

                if page == 1 {
                    if let Some(count) = self.parser.page_count(&html) {
                        last_page = last_page.min(count.max(1));
                        debug!("{} result pages for '{}'", count, vars["query"]);
                    }
                }

                let base = match Url::parse(&url) {
                    Ok(base) => base,
                    Err(e) => {
                        warn!("Unparsable page URL {}: {}", url, e);
                        break;
                    }
                };
                let items = self.parser.extract_items(&html, &base);
                if items.is_empty() {
                    debug!("No items on page {}, stopping pagination", page);
                    break;
                }
                info!("Found {} items on page {} of {}", items.len(), page, bucket);

                let mut admitted = 0;
                for item in items {
                    if self.cancelled() {
                        summary.interrupted = true;
                        return;
                    }
                    if self.process_item(merger, target, bucket, item, summary) {
                        admitted += 1;
                        if profile.max_items_per_page.is_some_and(|cap| admitted >= cap) {
                            debug!("Admitted {} items from page {}, moving on", admitted, page);
                            break;
                        }
                    }
                }
                page += 1;
            }
        }
    }

    fn process_item(
        &self,
        merger: &mut Merger,
        target: &Target,
        bucket: &BucketKey,
        mut item: ParsedItem,
        summary: &mut RunSummary,
    ) -> bool {
        summary.items_seen += 1;

        if let Some(link) = self.parser.detail_url(&item) {
            if let Some(id) = self.parser.early_listing_id(&item) {
                if merger.is_known(bucket, &id) {
                    summary.known_skipped += 1;
                    debug!("Listing {} already in {}, skipping detail page", id, bucket);
                    return false;
                }
            }
            match self.fetcher.fetch(&link) {
                Ok(html) => {
                    summary.pages_fetched += 1;
                    match Url::parse(&link) {
                        Ok(base) => self.parser.apply_detail(&mut item, &html, &base),
                        Err(e) => warn!("Unparsable detail URL {}: {}", link, e),
                    }
                }
                Err(e) => {
                    summary.fetch_failures += 1;
                    warn!("Skipping item, detail page failed: {}", e);
                    return false;
                }
            }
        }

        let Some(mut candidate) = self.parser.into_candidate(item) else {
            summary.incomplete += 1;
            return false;
        };
        if self.parser.profile().record_target {
            for (name, value) in [("brand", &target.brand), ("model", &target.model), ("part", &target.part)] {
                if !value.is_empty() {
                    candidate
                        .payload
                        .entry(name.to_string())
                        .or_insert_with(|| Value::String(value.clone()));
                }
            }
        }
        merger.admit(bucket, candidate).is_admitted()
    }
}
