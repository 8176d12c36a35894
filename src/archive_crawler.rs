use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::PortalConfig;
use crate::fetch::CachingFetcher;
use crate::pagination::{PageCursor, PaginationStrategy};
use crate::portal::PortalExtractor;
use crate::urls::write_url_file;

/// Walks every column's archive pages and yields the article URLs they list.
pub struct ArchiveCrawler {
    config: Arc<PortalConfig>,
    extractor: Arc<dyn PortalExtractor>,
    fetcher: CachingFetcher,
    strategy: PaginationStrategy,
    known_article_urls: Arc<HashSet<String>>,
    problematic_urls: HashSet<String>,
    page_tries: usize,
    problematic_urls_file: Option<PathBuf>,
}

impl ArchiveCrawler {
    pub fn new(
        config: Arc<PortalConfig>,
        extractor: Arc<dyn PortalExtractor>,
        fetcher: CachingFetcher,
        known_article_urls: Arc<HashSet<String>>,
    ) -> Self {
        let strategy = PaginationStrategy::new(config.pagination.clone(), Arc::clone(&extractor));
        Self {
            config,
            extractor,
            fetcher,
            strategy,
            known_article_urls,
            problematic_urls: HashSet::new(),
            page_tries: 1,
            problematic_urls_file: None,
        }
    }

    /// Attempts per archive page before the rest of its base URL is abandoned.
    pub fn with_page_tries(mut self, tries: usize) -> Self {
        self.page_tries = tries.max(1);
        self
    }

    pub fn with_problematic_urls_file(mut self, path: Option<PathBuf>) -> Self {
        self.problematic_urls_file = path;
        self
    }

    pub fn fetcher(&self) -> &CachingFetcher {
        &self.fetcher
    }

    pub fn good_urls(&self) -> &HashSet<String> {
        self.fetcher.good_urls()
    }

    pub fn problematic_urls(&self) -> &HashSet<String> {
        &self.problematic_urls
    }

    /// `(column, base url)` pairs in crawl order.
    pub fn base_urls(&self) -> Vec<(String, String)> {
        self.config
            .columns
            .iter()
            .flat_map(|column| {
                self.config
                    .base_urls(column)
                    .into_iter()
                    .map(|url| (column.name.clone(), url))
            })
            .collect()
    }

    pub fn url_iterator(&mut self) -> ArchiveUrls<'_> {
        let base_urls = self.base_urls().into();
        ArchiveUrls {
            crawler: self,
            base_urls,
            current: None,
            buffered: VecDeque::new(),
            seen: HashSet::new(),
            done: false,
        }
    }

    pub fn finish(self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.problematic_urls_file {
            write_url_file(path, &self.problematic_urls)?;
        }
        tracing::info!(
            good = self.fetcher.good_urls().len(),
            problematic = self.problematic_urls.len(),
            "archive crawl finished"
        );
        self.fetcher.finish()
    }

    fn give_up(&mut self, url: &str) {
        if self.fetcher.is_good(url) || self.fetcher.is_cached(url) || self.fetcher.is_bad(url) {
            return;
        }
        tracing::warn!(%url, "archive page failed; skipping the rest of its base url");
        self.problematic_urls.insert(url.to_owned());
    }
}

impl std::fmt::Debug for ArchiveCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCrawler")
            .field("site", &self.config.site_name)
            .field("fetcher", &self.fetcher)
            .field("problematic_urls", &self.problematic_urls.len())
            .finish_non_exhaustive()
    }
}

struct PageState {
    column: String,
    base_url: String,
    page_url: String,
    cursor: PageCursor,
}

/// Lazy stream of article URLs. Ends at the first error.
pub struct ArchiveUrls<'a> {
    crawler: &'a mut ArchiveCrawler,
    base_urls: VecDeque<(String, String)>,
    current: Option<PageState>,
    buffered: VecDeque<String>,
    seen: HashSet<String>,
    done: bool,
}

impl ArchiveUrls<'_> {
    /// Fetches one archive page. `Ok(false)` once every base URL is exhausted.
    fn step(&mut self) -> anyhow::Result<bool> {
        let mut state = match self.current.take() {
            Some(state) => state,
            None => match self.base_urls.pop_front() {
                Some((column, base_url)) => {
                    let cursor = self.crawler.strategy.start(self.crawler.page_tries);
                    let page_url = self.crawler.strategy.page_url(&base_url, &cursor);
                    tracing::info!(%column, %base_url, "starting base url");
                    PageState {
                        column,
                        base_url,
                        page_url,
                        cursor,
                    }
                }
                None => return Ok(false),
            },
        };

        let crawler = &mut *self.crawler;
        if crawler.fetcher.is_good(&state.page_url) {
            tracing::info!(url = %state.page_url, "archive page already visited; next base url");
            return Ok(true);
        }

        let ignore_cache = crawler.config.ignore_archive_cache;
        let Some(html) = crawler.fetcher.fetch(&state.page_url, ignore_cache)? else {
            if !crawler.fetcher.is_bad(&state.page_url) && state.cursor.retry() {
                tracing::info!(
                    url = %state.page_url,
                    tries_left = state.cursor.tries_left,
                    "retrying archive page"
                );
                self.current = Some(state);
            } else {
                crawler.give_up(&state.page_url);
            }
            return Ok(true);
        };

        let article_urls: BTreeSet<String> =
            crawler.extractor.extract_article_urls_from_page(&html);
        tracing::info!(
            column = %state.column,
            page = state.cursor.page_num,
            url = %state.page_url,
            count = article_urls.len(),
            "archive page"
        );
        for url in &article_urls {
            if self.seen.insert(url.clone()) {
                self.buffered.push_back(url.clone());
            }
        }

        if let Some(next) = crawler.strategy.next_page(
            &state.base_url,
            &state.cursor,
            &html,
            &article_urls,
            &crawler.known_article_urls,
        ) {
            state.cursor.advance();
            state.page_url = next;
            self.current = Some(state);
        }
        Ok(true)
    }
}

impl Iterator for ArchiveUrls<'_> {
    type Item = anyhow::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(url) = self.buffered.pop_front() {
                return Some(Ok(url));
            }
            if self.done {
                return None;
            }
            match self.step() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(err) => {
                    self.done = true;
                    self.buffered.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for ArchiveUrls<'_> {}
