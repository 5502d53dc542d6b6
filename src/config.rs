//! JSON file configuration and merged run settings.
//!
//! The config file lives at `$XDG_CONFIG_HOME/manga_downloader/config.json`
//! (falling back to `$HOME/.config/...`) and is created with defaults the
//! first time it is looked for. Every key is optional when read.
//!
//! Precedence for each setting: command line, then file, then built-in default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::discovery::{DEFAULT_MIRRORS, MirrorPolicy};
use crate::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, PROBE_TIMEOUT_SECS};

const CONFIG_DIR_NAME: &str = "manga_downloader";
const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_START_CHAPTER: u32 = 1;
const DEFAULT_START_PAGE: u32 = 1;
const DEFAULT_MAX_PAGES: u32 = 50;
const DEFAULT_MAX_DECIMALS: u32 = 50;
const DEFAULT_LANGUAGE: &str = "en";

/// Range accepted for `workers`.
pub const WORKERS_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// Range accepted for `max_retries` (total attempts per page).
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Contents of the JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Work to download when none is given on the command line. Empty means unset.
    pub manga_name: Option<String>,
    /// First chapter probed.
    pub start_chapter: Option<u32>,
    /// First page of the first chapter found.
    pub start_page: Option<u32>,
    /// Highest page number probed per chapter.
    pub max_pages: Option<u32>,
    /// Highest sub-chapter suffix probed.
    pub max_decimals: Option<u32>,
    /// Concurrent probes and downloads.
    pub workers: Option<usize>,
    /// Package the run into a CBZ.
    pub cbz: Option<bool>,
    /// Catalog translation language.
    pub language: Option<String>,
    /// Directory the work folder is created in.
    pub output_dir: Option<PathBuf>,
    /// Mirror base addresses in priority order.
    pub mirrors: Option<Vec<String>>,
    /// Which mirror addresses are downloaded.
    pub mirror_policy: Option<MirrorPolicy>,
    /// Use the catalog's compressed page set.
    pub data_saver: Option<bool>,
    /// Attempts per page.
    pub max_retries: Option<u32>,
    /// Per-probe timeout in seconds.
    pub probe_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Returns the config written on first run: every default spelled out.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            manga_name: Some(String::new()),
            start_chapter: Some(DEFAULT_START_CHAPTER),
            start_page: Some(DEFAULT_START_PAGE),
            max_pages: Some(DEFAULT_MAX_PAGES),
            max_decimals: Some(DEFAULT_MAX_DECIMALS),
            workers: Some(DEFAULT_CONCURRENCY),
            cbz: Some(true),
            language: Some(DEFAULT_LANGUAGE.to_string()),
            output_dir: Some(PathBuf::from(".")),
            mirrors: Some(DEFAULT_MIRRORS.iter().map(|s| (*s).to_string()).collect()),
            mirror_policy: Some(MirrorPolicy::FirstMatch),
            data_saver: Some(false),
            max_retries: Some(DEFAULT_MAX_RETRIES),
            probe_timeout_secs: Some(PROBE_TIMEOUT_SECS),
        }
    }

    /// Parses config JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a JSON object of the expected shape.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid config JSON")
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/manga_downloader/config.json`
/// 2. `$HOME/.config/manga_downloader/config.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `path`, writing a default file first if none exists.
///
/// A default file that cannot be written is not an error; the defaults are
/// used in memory.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read or parsed.
pub fn load_or_create(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        let defaults = FileConfig::with_defaults();
        match write_config(path, &defaults) {
            Ok(()) => info!(path = %path.display(), "created default config"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not write default config"),
        }
        return Ok(defaults);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config = FileConfig::from_json(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

fn write_config(path: &Path, config: &FileConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Work name or URL.
    pub manga: Option<String>,
    /// First chapter probed.
    pub start_chapter: Option<u32>,
    /// First page of the first chapter.
    pub start_page: Option<u32>,
    /// Page bound per chapter.
    pub max_pages: Option<u32>,
    /// Sub-chapter bound.
    pub max_decimals: Option<u32>,
    /// Worker count.
    pub workers: Option<usize>,
    /// Archive toggle.
    pub cbz: Option<bool>,
    /// Catalog language.
    pub language: Option<String>,
    /// Output directory.
    pub output_dir: Option<PathBuf>,
    /// Mirror policy.
    pub mirror_policy: Option<MirrorPolicy>,
    /// Compressed catalog pages.
    pub data_saver: Option<bool>,
    /// Attempts per page.
    pub max_retries: Option<u32>,
}

/// Fully resolved, validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Work name or URL.
    pub manga: String,
    /// First chapter probed.
    pub start_chapter: u32,
    /// First page of the first chapter.
    pub start_page: u32,
    /// Page bound per chapter.
    pub max_pages: u32,
    /// Sub-chapter bound.
    pub max_decimals: u32,
    /// Concurrent probes and downloads.
    pub workers: usize,
    /// Package into a CBZ when done.
    pub cbz: bool,
    /// Catalog language.
    pub language: String,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Mirror bases in priority order.
    pub mirrors: Vec<String>,
    /// Mirror policy.
    pub mirror_policy: MirrorPolicy,
    /// Compressed catalog pages.
    pub data_saver: bool,
    /// Attempts per page.
    pub max_retries: u32,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
}

impl RunSettings {
    /// Merges command-line values over file values over defaults, then validates.
    ///
    /// # Errors
    ///
    /// Returns an error if no work is named or a value is out of range.
    pub fn resolve(overrides: Overrides, file: &FileConfig) -> Result<Self> {
        let manga = overrides
            .manga
            .or_else(|| file.manga_name.clone())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let Some(manga) = manga else {
            bail!("No manga specified. Pass --manga or set `manga_name` in the config file");
        };

        let settings = Self {
            manga,
            start_chapter: overrides
                .start_chapter
                .or(file.start_chapter)
                .unwrap_or(DEFAULT_START_CHAPTER),
            start_page: overrides
                .start_page
                .or(file.start_page)
                .unwrap_or(DEFAULT_START_PAGE),
            max_pages: overrides
                .max_pages
                .or(file.max_pages)
                .unwrap_or(DEFAULT_MAX_PAGES),
            max_decimals: overrides
                .max_decimals
                .or(file.max_decimals)
                .unwrap_or(DEFAULT_MAX_DECIMALS),
            workers: overrides
                .workers
                .or(file.workers)
                .unwrap_or(DEFAULT_CONCURRENCY),
            cbz: overrides.cbz.or(file.cbz).unwrap_or(true),
            language: overrides
                .language
                .or_else(|| file.language.clone())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            output_dir: overrides
                .output_dir
                .or_else(|| file.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            mirrors: file
                .mirrors
                .clone()
                .unwrap_or_else(|| DEFAULT_MIRRORS.iter().map(|s| (*s).to_string()).collect()),
            mirror_policy: overrides
                .mirror_policy
                .or(file.mirror_policy)
                .unwrap_or_default(),
            data_saver: overrides.data_saver.or(file.data_saver).unwrap_or(false),
            max_retries: overrides
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            probe_timeout: Duration::from_secs(
                file.probe_timeout_secs.unwrap_or(PROBE_TIMEOUT_SECS),
            ),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !WORKERS_RANGE.contains(&self.workers) {
            bail!(
                "Invalid effective workers value: {}. Expected range: 1..=100",
                self.workers
            );
        }
        if self.max_pages == 0 {
            bail!("Invalid effective max_pages value: 0. Expected at least 1");
        }
        if self.start_page == 0 {
            bail!("Invalid effective start_page value: 0. Pages are numbered from 1");
        }
        if self.start_page > self.max_pages {
            bail!(
                "Invalid effective start_page value: {}. Must not exceed max_pages ({})",
                self.start_page,
                self.max_pages
            );
        }
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            bail!(
                "Invalid effective max_retries value: {}. Expected range: 1..=10",
                self.max_retries
            );
        }
        if self.mirrors.iter().all(|m| m.trim().is_empty()) {
            bail!("At least one mirror is required");
        }
        if self.probe_timeout.is_zero() {
            bail!("Invalid effective probe_timeout_secs value: 0");
        }
        Ok(())
    }
}
