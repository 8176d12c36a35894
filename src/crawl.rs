use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::archive_crawler::ArchiveCrawler;
use crate::article_crawler::{ArticleCrawler, ArticleOutputs};
use crate::cli::CrawlArgs;
use crate::config::PortalConfig;
use crate::fetch::{CacheOptions, CachingFetcher, HttpConfig, HttpFetcher, LiveFetcher};
use crate::portal::PortalRegistry;
use crate::urls::read_optional_url_file;
use crate::warc::ReaderOptions;

pub fn run(args: CrawlArgs, invocation: Vec<String>) -> anyhow::Result<()> {
    run_with_registry(args, invocation, &PortalRegistry::with_builtin())
}

/// Full crawl: archive pages first, feeding article URLs to the article phase as
/// they are found. Both new archives are closed even when the crawl fails.
pub fn run_with_registry(
    args: CrawlArgs,
    invocation: Vec<String>,
    registry: &PortalRegistry,
) -> anyhow::Result<()> {
    let config = PortalConfig::load(&args.config)?;
    let known_article_urls = Arc::new(
        read_optional_url_file(args.known_article_urls.as_deref())
            .context("read known article urls")?,
    );
    let bad_urls =
        read_optional_url_file(args.known_bad_urls.as_deref()).context("read known bad urls")?;
    config.validate(&known_article_urls)?;
    let extractor = registry.resolve(&config)?;
    let config = Arc::new(config);

    tracing::info!(
        site = %config.site_name,
        extractor = %config.extractor,
        columns = config.columns.len(),
        known_articles = known_article_urls.len(),
        bad_urls = bad_urls.len(),
        just_cache = args.just_cache,
        "starting crawl"
    );

    let http = if args.just_cache {
        None
    } else {
        Some(HttpFetcher::new(http_config(&args)?)?)
    };
    let reader = ReaderOptions {
        strict: !args.lenient,
        check_digest: args.check_digest,
    };

    let archive_fetcher = CachingFetcher::open(
        CacheOptions {
            old_archives: args.archive_old.clone(),
            new_archive: args.archive_new.clone(),
            overwrite: args.overwrite,
            reader,
            invocation: invocation.clone(),
            bad_urls: bad_urls.clone(),
        },
        http.clone().map(|http| Box::new(http) as Box<dyn LiveFetcher>),
    )
    .context("open archive page cache")?;
    let article_fetcher = CachingFetcher::open(
        CacheOptions {
            old_archives: args.articles_old.clone(),
            new_archive: args.articles_new.clone(),
            overwrite: args.overwrite,
            reader,
            invocation,
            bad_urls,
        },
        http.map(|http| Box::new(http) as Box<dyn LiveFetcher>),
    )
    .context("open article cache")?;

    let mut archive = ArchiveCrawler::new(
        Arc::clone(&config),
        Arc::clone(&extractor),
        archive_fetcher,
        Arc::clone(&known_article_urls),
    )
    .with_page_tries(args.archive_page_retries)
    .with_problematic_urls_file(args.new_problematic_archive_urls.clone());

    let mut articles = ArticleCrawler::new(
        config,
        extractor,
        article_fetcher,
        known_article_urls,
        open_corpus(args.corpus.as_deref())?,
    )
    .with_outputs(ArticleOutputs {
        new_good_urls: args.new_good_urls.clone(),
        new_problematic_urls: args.new_problematic_urls.clone(),
    });

    let crawled = articles.run(archive.url_iterator());
    let archive_closed = archive.finish().context("close archive page cache");
    let articles_closed = articles.finish().context("close article cache");

    crawled?;
    let archive_path = archive_closed?;
    let articles_path = articles_closed?;
    tracing::info!(
        archive = %archive_path.display(),
        articles = %articles_path.display(),
        "crawl finished"
    );
    Ok(())
}

fn http_config(args: &CrawlArgs) -> anyhow::Result<HttpConfig> {
    let rate_limit_period = Duration::try_from_secs_f64(args.rate_limit_period)
        .with_context(|| format!("invalid rate limit period: {}", args.rate_limit_period))?;
    Ok(HttpConfig {
        timeout: Duration::from_secs(args.timeout),
        rate_limit_calls: args.rate_limit_calls,
        rate_limit_period,
        max_errors: args.max_errors,
        keep_cookies: args.keep_cookies,
        ..HttpConfig::default()
    })
}

fn open_corpus(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    let Some(path) = path else {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create corpus dir: {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("create corpus: {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

