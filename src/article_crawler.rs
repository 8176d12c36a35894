use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use crate::config::PortalConfig;
use crate::fetch::CachingFetcher;
use crate::portal::PortalExtractor;
use crate::urls::write_url_file;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub processed: usize,
    pub from_cache: usize,
    pub skipped: usize,
    pub out_of_range: usize,
    pub unknown_scheme: usize,
    pub problematic: usize,
    pub followed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleOutputs {
    pub new_good_urls: Option<PathBuf>,
    pub new_problematic_urls: Option<PathBuf>,
}

/// Downloads articles, converts them to corpus lines and follows in-article links.
pub struct ArticleCrawler {
    config: Arc<PortalConfig>,
    extractor: Arc<dyn PortalExtractor>,
    fetcher: CachingFetcher,
    known_article_urls: Arc<HashSet<String>>,
    problematic_urls: HashSet<String>,
    pending: VecDeque<String>,
    queued: HashSet<String>,
    corpus: Box<dyn Write>,
    outputs: ArticleOutputs,
    stats: CrawlStats,
}

impl ArticleCrawler {
    pub fn new(
        config: Arc<PortalConfig>,
        extractor: Arc<dyn PortalExtractor>,
        fetcher: CachingFetcher,
        known_article_urls: Arc<HashSet<String>>,
        corpus: Box<dyn Write>,
    ) -> Self {
        Self {
            config,
            extractor,
            fetcher,
            known_article_urls,
            problematic_urls: HashSet::new(),
            pending: VecDeque::new(),
            queued: HashSet::new(),
            corpus,
            outputs: ArticleOutputs::default(),
            stats: CrawlStats::default(),
        }
    }

    pub fn with_outputs(mut self, outputs: ArticleOutputs) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn fetcher(&self) -> &CachingFetcher {
        &self.fetcher
    }

    pub fn problematic_urls(&self) -> &HashSet<String> {
        &self.problematic_urls
    }

    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    /// Processes the archive stream, then the links followed from articles,
    /// oldest first.
    pub fn run<I>(&mut self, urls: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = anyhow::Result<String>>,
    {
        for url in urls {
            let url = url?;
            self.visit(&url)?;
        }

        while let Some(url) = self.pending.pop_front() {
            self.visit(&url)?;
        }

        let stats = self.stats;
        tracing::info!(
            processed = stats.processed,
            from_cache = stats.from_cache,
            skipped = stats.skipped,
            out_of_range = stats.out_of_range,
            unknown_scheme = stats.unknown_scheme,
            problematic = stats.problematic,
            followed = stats.followed,
            "article crawl finished"
        );
        Ok(())
    }

    /// Writes the side files and closes the corpus and the new archive.
    pub fn finish(mut self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.outputs.new_good_urls {
            write_url_file(path, self.fetcher.good_urls())?;
        }
        if let Some(path) = &self.outputs.new_problematic_urls {
            write_url_file(path, &self.problematic_urls)?;
        }
        self.corpus.flush().context("flush corpus")?;
        self.fetcher.finish()
    }

    fn is_known(&self, url: &str) -> bool {
        self.fetcher.is_good(url)
            || self.fetcher.is_bad(url)
            || self.problematic_urls.contains(url)
            || self.known_article_urls.contains(url)
    }

    fn visit(&mut self, url: &str) -> anyhow::Result<()> {
        if self.is_known(url) {
            tracing::debug!(%url, "already processed or known");
            self.stats.skipped += 1;
            return Ok(());
        }

        let cached = self.fetcher.is_cached(url);
        let Some(html) = self.fetcher.fetch(url, false)? else {
            tracing::warn!(%url, "article could not be fetched");
            self.problematic_urls.insert(url.to_owned());
            self.stats.problematic += 1;
            return Ok(());
        };
        if cached {
            self.stats.from_cache += 1;
        }

        let Some(scheme) = self.extractor.identify_site_scheme(url, &html) else {
            tracing::warn!(%url, "no site scheme matches the article");
            self.stats.unknown_scheme += 1;
            return Ok(());
        };

        if self.config.filter_articles_by_date {
            match self.extractor.extract_article_date(url, &html, &scheme) {
                Some(date) if !self.config.date_in_range(date) => {
                    tracing::debug!(%url, %date, "article outside the date range");
                    self.stats.out_of_range += 1;
                    return Ok(());
                }
                Some(_) => {}
                None => tracing::warn!(%url, "article has no date; keeping it"),
            }
        }

        self.extractor
            .article_to_corpus(url, &html, &scheme, &mut *self.corpus)
            .with_context(|| format!("convert article: {url}"))?;
        self.stats.processed += 1;

        for link in self.extractor.follow_links_on_page(url, &html, &scheme) {
            if self.is_known(&link) || self.queued.contains(&link) {
                continue;
            }
            tracing::debug!(from = %url, url = %link, "following link");
            self.queued.insert(link.clone());
            self.pending.push_back(link);
            self.stats.followed += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArticleCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleCrawler")
            .field("site", &self.config.site_name)
            .field("fetcher", &self.fetcher)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
