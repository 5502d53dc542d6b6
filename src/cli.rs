//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use manga_core::MirrorPolicy;
use manga_core::config::Overrides;

/// Download every chapter of a manga and package it as a CBZ.
///
/// The work is found on mirror image hosts (a name or mirror URL), through
/// the catalog API (a mangadex.org title URL) or on a rendered reader page
/// (a weebcentral.com chapter URL). Unset options fall back to the config
/// file, then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "manga-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Manga name, mirror URL, catalog title URL or reader chapter URL
    #[arg(short = 'M', long)]
    pub manga: Option<String>,

    /// First chapter to probe
    #[arg(long)]
    pub start_chapter: Option<u32>,

    /// First page of the first chapter found
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_page: Option<u32>,

    /// Highest page number probed per chapter
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Highest sub-chapter suffix probed (12.1 ..= 12.N)
    #[arg(long)]
    pub max_decimals: Option<u32>,

    /// Concurrent probes and downloads (1-100)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Package the downloaded chapters into a CBZ
    #[arg(long, overrides_with = "no_cbz")]
    pub cbz: bool,

    /// Keep chapter folders and skip the CBZ
    #[arg(long, overrides_with = "cbz")]
    pub no_cbz: bool,

    /// Catalog translation language
    #[arg(long = "lang")]
    pub language: Option<String>,

    /// Directory the work folder is created in
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Download a page from every mirror that has it, not just the first
    #[arg(long)]
    pub all_mirrors: bool,

    /// Use the catalog's compressed page images
    #[arg(long)]
    pub data_saver: bool,

    /// Attempts per page for transient failures (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Config file (default: $XDG_CONFIG_HOME/manga_downloader/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Returns the values given on the command line, for merging over the config file.
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        let cbz = if self.cbz {
            Some(true)
        } else if self.no_cbz {
            Some(false)
        } else {
            None
        };

        Overrides {
            manga: self.manga.clone(),
            start_chapter: self.start_chapter,
            start_page: self.start_page,
            max_pages: self.max_pages,
            max_decimals: self.max_decimals,
            workers: self.workers.map(usize::from),
            cbz,
            language: self.language.clone(),
            output_dir: self.output_dir.clone(),
            mirror_policy: self.all_mirrors.then_some(MirrorPolicy::AllMatches),
            data_saver: self.data_saver.then_some(true),
            max_retries: self.max_retries,
        }
    }

    /// Returns the default log level: `-q` wins, then `-v` count, then `info`.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
