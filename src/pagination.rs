use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::portal::PortalExtractor;

pub const PAGENUM_PLACEHOLDER: &str = "#pagenum";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub next_url_by_link: bool,
    pub last_archive_page_url: Option<String>,

    pub next_url_by_pagenum: bool,
    pub initial_pagenum: u64,
    pub max_pagenum: Option<u64>,
    pub infinite_scrolling: bool,
    /// Continue while a page holds more than this many unknown article URLs.
    /// Zero stops at the first page that overlaps the known set.
    pub new_article_url_threshold: Option<usize>,
    pub first_page_without_pagenum: bool,
    /// Removed from the end of page one's URL after the placeholder is dropped.
    pub first_page_suffix_to_strip: Option<String>,

    pub stop_on_empty_archive_page: bool,
    pub stop_on_taboo_set: BTreeSet<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            next_url_by_link: false,
            last_archive_page_url: None,
            next_url_by_pagenum: false,
            initial_pagenum: 1,
            max_pagenum: None,
            infinite_scrolling: false,
            new_article_url_threshold: None,
            first_page_without_pagenum: false,
            first_page_suffix_to_strip: None,
            stop_on_empty_archive_page: false,
            stop_on_taboo_set: BTreeSet::new(),
        }
    }
}

impl PaginationConfig {
    /// `known_urls_available` tells whether the overlap threshold can ever fire. Without
    /// known URLs a threshold-only walk is accepted and ends at the first failed page.
    pub fn validate(&self, known_urls_available: bool) -> Result<(), ConfigError> {
        if self.next_url_by_link && self.next_url_by_pagenum {
            return Err(ConfigError::Invalid(
                "pagination: next_url_by_link and next_url_by_pagenum are mutually exclusive"
                    .to_owned(),
            ));
        }

        if !self.next_url_by_pagenum {
            if self.infinite_scrolling
                || self.max_pagenum.is_some()
                || self.new_article_url_threshold.is_some()
                || self.first_page_without_pagenum
            {
                return Err(ConfigError::Invalid(
                    "pagination: page number options are set but next_url_by_pagenum is false"
                        .to_owned(),
                ));
            }
        } else {
            if let Some(max) = self.max_pagenum
                && max < self.initial_pagenum
            {
                return Err(ConfigError::Invalid(format!(
                    "pagination: max_pagenum {max} is below initial_pagenum {}",
                    self.initial_pagenum
                )));
            }
            let bounded = self.max_pagenum.is_some()
                || self.infinite_scrolling
                || self.stop_on_empty_archive_page
                || !self.stop_on_taboo_set.is_empty();
            if !bounded && self.new_article_url_threshold.is_none() {
                return Err(ConfigError::Invalid(
                    "pagination: page numbers need max_pagenum, infinite_scrolling, \
                     stop_on_empty_archive_page, stop_on_taboo_set \
                     or new_article_url_threshold"
                        .to_owned(),
                ));
            }
            if !bounded && !known_urls_available {
                tracing::warn!(
                    "pagination: no known article urls; the threshold cannot stop paging \
                     and each base url ends at its first failed page"
                );
            }
        }

        if self.last_archive_page_url.is_some() && !self.next_url_by_link {
            tracing::warn!("pagination: last_archive_page_url is ignored without next_url_by_link");
        }
        if self.new_article_url_threshold == Some(0) {
            tracing::warn!(
                "pagination: new_article_url_threshold is 0; \
                 paging stops at the first known article url"
            );
        }
        Ok(())
    }
}

/// Position within one base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page_num: u64,
    pub first_page: bool,
    pub tries_left: usize,
    tries: usize,
}

impl PageCursor {
    pub fn new(initial_pagenum: u64, tries: usize) -> Self {
        let tries = tries.max(1);
        Self {
            page_num: initial_pagenum,
            first_page: true,
            tries_left: tries,
            tries,
        }
    }

    pub fn advance(&mut self) {
        self.page_num += 1;
        self.first_page = false;
        self.tries_left = self.tries;
    }

    /// Uses up one attempt; `true` while another one remains.
    pub fn retry(&mut self) -> bool {
        self.tries_left = self.tries_left.saturating_sub(1);
        self.tries_left > 0
    }
}

pub struct PaginationStrategy {
    config: PaginationConfig,
    extractor: Arc<dyn PortalExtractor>,
}

impl PaginationStrategy {
    pub fn new(config: PaginationConfig, extractor: Arc<dyn PortalExtractor>) -> Self {
        Self { config, extractor }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub fn start(&self, tries: usize) -> PageCursor {
        PageCursor::new(self.config.initial_pagenum, tries)
    }

    pub fn page_url(&self, base_url: &str, cursor: &PageCursor) -> String {
        if !base_url.contains(PAGENUM_PLACEHOLDER) {
            return base_url.to_owned();
        }
        if cursor.first_page && self.config.first_page_without_pagenum {
            let url = base_url.replace(PAGENUM_PLACEHOLDER, "");
            return match self.config.first_page_suffix_to_strip.as_deref() {
                Some(suffix) => url.strip_suffix(suffix).unwrap_or(&url).to_owned(),
                None => url,
            };
        }
        base_url.replace(PAGENUM_PLACEHOLDER, &cursor.page_num.to_string())
    }

    /// URL of the page after the one described by `cursor`, or `None` when this base
    /// URL is exhausted. Callers advance the cursor when they follow it.
    pub fn next_page(
        &self,
        base_url: &str,
        cursor: &PageCursor,
        html: &str,
        article_urls: &BTreeSet<String>,
        known: &HashSet<String>,
    ) -> Option<String> {
        let config = &self.config;

        if config.stop_on_empty_archive_page && article_urls.is_empty() {
            tracing::debug!(page = cursor.page_num, "empty archive page");
            return None;
        }
        if let Some(taboo) = article_urls
            .iter()
            .find(|url| config.stop_on_taboo_set.contains(*url))
        {
            tracing::debug!(url = %taboo, "taboo url on archive page");
            return None;
        }

        if config.next_url_by_link {
            let next = self.extractor.extract_next_page_url(html)?;
            if config.last_archive_page_url.as_deref() == Some(next.as_str()) {
                tracing::debug!(url = %next, "reached the last archive page");
                return None;
            }
            return Some(next);
        }

        if config.next_url_by_pagenum {
            if let Some(max) = config.max_pagenum
                && cursor.page_num >= max
            {
                return None;
            }
            if config.infinite_scrolling && article_urls.is_empty() {
                return None;
            }
            if let Some(threshold) = config.new_article_url_threshold
                && !known.is_empty()
            {
                let overlap = article_urls.iter().filter(|url| known.contains(*url)).count();
                let new = article_urls.len() - overlap;
                let stop = if threshold == 0 {
                    overlap > 0
                } else {
                    new <= threshold
                };
                if stop {
                    tracing::debug!(new, overlap, threshold, "not enough new article urls");
                    return None;
                }
            }
            let mut next = *cursor;
            next.advance();
            return Some(self.page_url(base_url, &next));
        }

        None
    }
}

impl std::fmt::Debug for PaginationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
