use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use manga_core::config::{self, FileConfig, RunSettings};
use manga_core::discovery::{
    AxisSettings, CatalogSettings, MirrorSet, ProviderContext, build_provider, with_catalog_quotas,
};
use manga_core::{
    ArchiveOutcome, CancelToken, DownloadEngine, DownloadStats, Fetcher, HttpClient, RateLimiter,
    RetryPolicy, archive, classify_input,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, progress_manager, terminal};
use crate::cli::Args;

pub(crate) async fn run_downloader() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    terminal::init_tracing(args.default_log_level());
    debug!(?args, "CLI arguments parsed");

    let file_config = match args.config.clone().or_else(config::resolve_default_config_path) {
        Some(path) => config::load_or_create(&path)?,
        None => FileConfig::default(),
    };
    let settings = RunSettings::resolve(args.overrides(), &file_config)?;
    info!(manga = %settings.manga, "Manga downloader starting");

    let kind = classify_input(&settings.manga)?;

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();

    let client = HttpClient::new().context("Failed to build HTTP client")?;
    let limiter = Arc::new(with_catalog_quotas(RateLimiter::disabled()));

    let ctx = ProviderContext {
        client: client.clone(),
        limiter: Arc::clone(&limiter),
        cancel: cancel.clone(),
        output_dir: settings.output_dir.clone(),
        axis: AxisSettings {
            start_chapter: settings.start_chapter,
            start_page: settings.start_page,
            max_pages: settings.max_pages,
            max_decimals: settings.max_decimals,
            workers: settings.workers,
            policy: settings.mirror_policy,
        },
        mirrors: MirrorSet::new(&settings.mirrors)?,
        probe_timeout: settings.probe_timeout,
        catalog: CatalogSettings {
            language: settings.language.clone(),
            data_saver: settings.data_saver,
            ..CatalogSettings::default()
        },
    };

    let provider = build_provider(kind, &ctx);
    info!(provider = provider.name(), "Discovering pages");
    let discovery = provider.discover().await?;

    if discovery.items.is_empty() {
        if cancel.is_cancelled() {
            warn!("Interrupted before any page was found. Run again to resume.");
        } else {
            warn!(work = %discovery.work_name, "No pages found");
        }
        return Ok(ProcessExit::Failure);
    }
    info!(
        work = %discovery.work_name,
        pages = discovery.items.len(),
        dir = %discovery.root.display(),
        "Pages discovered"
    );

    let fetcher = Arc::new(Fetcher::new(
        Arc::new(client),
        limiter,
        RetryPolicy::with_max_attempts(settings.max_retries),
        cancel.clone(),
    ));
    let engine = DownloadEngine::new(settings.workers, fetcher, cancel.clone())?;
    let stats = Arc::new(DownloadStats::new());

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_bar, Arc::clone(&stats), discovery.items.len());

    let result = engine.download_all(&discovery.items, &stats).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    let summary = result?;

    info!(
        saved = summary.saved,
        already_present = summary.already_present,
        failed = summary.failed,
        skipped = summary.skipped,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        pages_per_sec = summary.pages_per_second(),
        "Download complete"
    );

    if cancel.is_cancelled() {
        warn!(
            succeeded = summary.succeeded(),
            total = summary.total(),
            "Interrupted. Run again to resume."
        );
        return Ok(ProcessExit::Failure);
    }

    if settings.cbz {
        if summary.failed > 0 {
            warn!(
                failed = summary.failed,
                "Keeping chapter folders so a re-run can fetch the missing pages"
            );
        } else {
            let root = discovery.root.clone();
            let outcome = tokio::task::spawn_blocking(move || archive(&root))
                .await
                .context("Archive task panicked")??;
            if let ArchiveOutcome::Created { path, entries } = outcome {
                info!(archive = %path.display(), entries, "CBZ ready");
            }
        }
    }

    Ok(exit_handler::determine_exit_outcome(
        summary.succeeded(),
        summary.failed,
    ))
}
