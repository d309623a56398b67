use anyhow::{bail, Context, Result};
use catalog_scraper_lib::delay_manager::{NoDelay, Pacer, RandomDelay};
use catalog_scraper_lib::{code_index, input_loader, logger, site_profile};
use catalog_scraper_lib::{BucketPolicy, CatalogStore, Fetcher, FetcherConfig, Merger, RunSummary, Runner, SiteProfile};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "catalog-scraper", version, about = "Build deduplicated JSON catalogs of car listings and OEM part codes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every target of a site profile into a catalog
    Scrape(ScrapeArgs),
    /// Fold a parts catalog into a brand / model / part code index
    Index(IndexArgs),
    /// List the built-in profiles, or print one as JSON
    Profiles {
        #[arg(long, value_name = "NAME")]
        dump: Option<String>,
    },
}

#[derive(Args)]
struct ScrapeArgs {
    /// Built-in profile name or path to a JSON profile
    #[arg(short, long)]
    profile: String,
    /// CSV or Excel file with Brand / Model / Part columns
    #[arg(short, long)]
    targets: Option<PathBuf>,
    /// Catalog file, defaults to `<profile>.json`
    #[arg(long)]
    store: Option<PathBuf>,
    /// Defaults to the store path with a `.log` extension
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    proxy: Option<String>,
    /// fetch-once or always-rescrape, overriding the profile default
    #[arg(long)]
    policy: Option<BucketPolicy>,
    #[arg(long)]
    max_pages: Option<u32>,
    /// Skip the randomized pauses (tests, local mirrors)
    #[arg(long)]
    no_delay: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct IndexArgs {
    /// Parts catalog (current or legacy layout)
    #[arg(long)]
    parts: PathBuf,
    /// Listing catalog whose brands are used to split model names
    #[arg(long)]
    listings: Option<PathBuf>,
    /// Extra known brand, repeatable
    #[arg(long = "brand")]
    brands: Vec<String>,
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short, long)]
    verbose: bool,
}

fn pacer(no_delay: bool) -> Box<dyn Pacer> {
    if no_delay {
        Box::new(NoDelay)
    } else {
        Box::new(RandomDelay::default())
    }
}

/// The first Ctrl-C asks the run to stop after the current step, a second one exits.
fn install_shutdown_watcher() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let watcher = flag.clone();
    let spawned = thread::Builder::new().name("signal-watcher".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Signal handling unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupt received, saving and stopping after the current step");
            watcher.store(true, Ordering::SeqCst);
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Second interrupt, exiting immediately");
                std::process::exit(130);
            }
        });
    });
    if let Err(e) = spawned {
        warn!("Could not start signal watcher: {}", e);
    }
    flag
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Buckets: {} total, {} scraped, {} skipped",
        summary.buckets_total, summary.buckets_scraped, summary.buckets_skipped
    );
    info!(
        "Pages fetched: {}, fetch failures: {}, items seen: {}, incomplete: {}, known listings skipped: {}",
        summary.pages_fetched, summary.fetch_failures, summary.items_seen, summary.incomplete, summary.known_skipped
    );
    info!(
        "Admitted: {}, duplicates: {}, without identifier: {}, discarded: {}, saves: {} ({} failed)",
        summary.merge.admitted,
        summary.merge.duplicates,
        summary.merge.no_identifier,
        summary.merge.discarded,
        summary.merge.flushes,
        summary.merge.failed_flushes
    );
}

fn scrape(args: ScrapeArgs) -> Result<()> {
    let mut profile = SiteProfile::load(&args.profile)?;
    if let Some(policy) = args.policy {
        profile = profile.with_policy(policy);
    }

    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.json", profile.name)));
    let log_path = args.log_file.clone().unwrap_or_else(|| store_path.with_extension("log"));
    logger::init(Some(&log_path), args.verbose)
        .with_context(|| format!("cannot open log file {:?}", log_path))?;
    info!("Starting catalog scraper with profile '{}'", profile.name);

    let records = match &args.targets {
        Some(path) => input_loader::load_records(path)?,
        None => Vec::new(),
    };
    let targets = input_loader::expand_targets(&records, &profile);
    if targets.is_empty() {
        bail!("profile '{}' yields no targets; pass --targets", profile.name);
    }
    info!("{} buckets to consider", targets.len());

    let store = CatalogStore::open(&store_path)?;
    let mut merger = Merger::open(store)?;
    info!(
        "Loaded {} entries in {} buckets from {:?}",
        merger.tree().entry_count(),
        merger.tree().bucket_count(),
        store_path
    );

    let config = FetcherConfig {
        proxy: args.proxy.clone(),
        ..FetcherConfig::default()
    };
    let fetcher = Fetcher::new(config, pacer(args.no_delay))?;
    let bucket_pacer = pacer(args.no_delay);
    let shutdown = install_shutdown_watcher();

    let mut runner = Runner::new(&profile, &fetcher, bucket_pacer.as_ref(), shutdown)?;
    if let Some(max_pages) = args.max_pages {
        runner = runner.with_max_pages(max_pages);
    }
    let summary = runner.run(&mut merger, &targets);

    log_summary(&summary);
    if summary.interrupted {
        info!("Run interrupted, progress saved to {:?}", store_path);
    } else {
        info!("Scraping completed, catalog at {:?}", store_path);
    }
    Ok(())
}

fn index(args: IndexArgs) -> Result<()> {
    logger::init(None, args.verbose)?;
    let parts = CatalogStore::open(&args.parts)?.load()?;
    if parts.is_empty() {
        warn!("Parts catalog {:?} is empty", args.parts);
    }

    let mut known_brands = args.brands;
    if let Some(listings) = &args.listings {
        let listings = CatalogStore::open(listings)?.load()?;
        known_brands.extend(listings.domains().cloned());
    }

    let index = code_index::build_index(&parts, &known_brands);
    code_index::write_index(&index, &args.output)?;
    Ok(())
}

fn profiles(dump: Option<String>) -> Result<()> {
    match dump {
        Some(name) => {
            let profile = SiteProfile::load(&name)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        None => {
            for name in site_profile::builtin_names() {
                let description = site_profile::builtin(name).map(|p| p.description).unwrap_or_default();
                println!("{:<20} {}", name, description);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Scrape(args) => scrape(args),
        Command::Index(args) => index(args),
        Command::Profiles { dump } => profiles(dump),
    }
}
