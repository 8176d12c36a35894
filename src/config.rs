use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pagination::PaginationConfig;
use crate::portal::css::CssSelectors;

const DATE_PLACEHOLDERS: [(&str, &str); 3] = [("#year", "%Y"), ("#month", "%m"), ("#day", "%d")];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Column {
    pub name: String,
    /// Archive URL template; may contain `#pagenum` and the date placeholders.
    pub url: String,
}

/// Everything site specific about one portal, read from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortalConfig {
    pub site_name: String,
    pub extractor: String,
    /// Relative links found on pages are resolved against this URL.
    pub base_url: String,
    pub columns: Vec<Column>,

    #[serde(default)]
    pub archive_page_urls_by_date: bool,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Exclusive.
    #[serde(default)]
    pub date_until: Option<NaiveDate>,
    #[serde(default)]
    pub go_reverse_in_archive: bool,
    #[serde(default)]
    pub filter_articles_by_date: bool,
    #[serde(default = "default_true")]
    pub ignore_archive_cache: bool,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub selectors: Option<CssSelectors>,
}

fn default_true() -> bool {
    true
}

impl PortalConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read portal config: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("parse portal config: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self, known_article_urls: &HashSet<String>) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::Invalid("no columns configured".to_owned()));
        }
        for column in &self.columns {
            if column.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "column {:?} has an empty url",
                    column.name
                )));
            }
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "base_url is not an absolute url: {}",
                self.base_url
            )));
        }

        if self.filter_articles_by_date && !self.archive_page_urls_by_date {
            return Err(ConfigError::DateFilterWithoutDates);
        }
        if self.archive_page_urls_by_date {
            let (from, until) = self.date_range().ok_or_else(|| {
                ConfigError::Invalid(
                    "date-based archives need both date_from and date_until".to_owned(),
                )
            })?;
            if from >= until {
                return Err(ConfigError::Invalid(format!(
                    "date_from {from} must be before date_until {until}"
                )));
            }
            for column in &self.columns {
                if !DATE_PLACEHOLDERS
                    .iter()
                    .any(|(placeholder, _)| column.url.contains(placeholder))
                {
                    tracing::warn!(
                        column = %column.name,
                        "date-based column url has no #year, #month or #day placeholder"
                    );
                }
            }
        }

        self.pagination.validate(!known_article_urls.is_empty())
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.date_from?, self.date_until?))
    }

    /// Whether `date` falls inside `[date_from, date_until)`; open ends accept.
    pub fn date_in_range(&self, date: NaiveDate) -> bool {
        self.date_from.is_none_or(|from| from <= date)
            && self.date_until.is_none_or(|until| date < until)
    }

    /// Base URLs of one column in crawl order.
    pub fn base_urls(&self, column: &Column) -> Vec<String> {
        if !self.archive_page_urls_by_date {
            return vec![column.url.clone()];
        }
        let Some((from, until)) = self.date_range() else {
            return Vec::new();
        };

        let mut days = from.iter_days().take_while(|day| *day < until).collect::<Vec<_>>();
        if self.go_reverse_in_archive {
            days.reverse();
        }

        let mut urls: Vec<String> = Vec::new();
        for day in days {
            let url = format_date(&column.url, day);
            if urls.last() != Some(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

pub fn format_date(template: &str, date: NaiveDate) -> String {
    DATE_PLACEHOLDERS
        .iter()
        .fold(template.to_owned(), |url, (placeholder, format)| {
            url.replace(placeholder, &date.format(format).to_string())
        })
}
