use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl a portal's archive pages and articles into new WARC files.
    Crawl(CrawlArgs),
    /// Print the cached page of one URL.
    Cat(CatArgs),
    /// Print the URLs indexed in a WARC file.
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Portal config (YAML).
    #[arg(long)]
    pub config: PathBuf,

    /// Previous archive-page WARC files, oldest first.
    #[arg(long = "archive-old", num_args = 1..)]
    pub archive_old: Vec<PathBuf>,

    /// WARC file receiving this run's archive pages.
    #[arg(long)]
    pub archive_new: PathBuf,

    /// Previous article WARC files, oldest first.
    #[arg(long = "articles-old", num_args = 1..)]
    pub articles_old: Vec<PathBuf>,

    /// WARC file receiving this run's articles.
    #[arg(long)]
    pub articles_new: PathBuf,

    /// Corpus output (JSON lines); stdout when omitted.
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Serve only from the old WARC files; never touch the network.
    #[arg(long)]
    pub just_cache: bool,

    #[arg(long)]
    pub known_bad_urls: Option<PathBuf>,

    /// Article URLs processed by earlier runs.
    #[arg(long)]
    pub known_article_urls: Option<PathBuf>,

    #[arg(long)]
    pub new_good_urls: Option<PathBuf>,

    #[arg(long)]
    pub new_problematic_urls: Option<PathBuf>,

    #[arg(long)]
    pub new_problematic_archive_urls: Option<PathBuf>,

    /// Skip corrupt records and keep the last of duplicate URLs.
    #[arg(long)]
    pub lenient: bool,

    /// Verify payload digests of cached records.
    #[arg(long)]
    pub check_digest: bool,

    /// Download errors tolerated before aborting.
    #[arg(long, default_value_t = 10)]
    pub max_errors: usize,

    /// Requests per rate limit period; 0 disables the limiter.
    #[arg(long, default_value_t = 2)]
    pub rate_limit_calls: usize,

    /// Rate limit period in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub rate_limit_period: f64,

    /// Attempts per archive page.
    #[arg(long, default_value_t = 1)]
    pub archive_page_retries: usize,

    /// HTTP timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Keep cookies between requests.
    #[arg(long)]
    pub keep_cookies: bool,

    /// Replace existing output WARC files instead of picking a free name.
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Args)]
pub struct CatArgs {
    #[arg(long)]
    pub warc: PathBuf,

    #[arg(long)]
    pub url: String,

    /// Accept corrupt records and duplicate URLs.
    #[arg(long)]
    pub lenient: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub warc: PathBuf,

    #[arg(long)]
    pub lenient: bool,
}
