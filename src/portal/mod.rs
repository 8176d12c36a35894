pub mod css;

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::PortalConfig;
use crate::error::ConfigError;

/// Site specific knowledge about one portal: where the links are, what an article
/// looks like, and how it becomes corpus output.
pub trait PortalExtractor {
    fn extract_article_urls_from_page(&self, html: &str) -> BTreeSet<String>;

    fn extract_next_page_url(&self, _html: &str) -> Option<String> {
        None
    }

    fn identify_site_scheme(&self, url: &str, html: &str) -> Option<String>;

    fn extract_article_date(&self, _url: &str, _html: &str, _scheme: &str) -> Option<NaiveDate> {
        None
    }

    fn article_to_corpus(
        &self,
        url: &str,
        html: &str,
        scheme: &str,
        out: &mut dyn Write,
    ) -> anyhow::Result<()>;

    fn follow_links_on_page(&self, _url: &str, _html: &str, _scheme: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

pub type ExtractorFactory =
    Box<dyn Fn(&PortalConfig) -> anyhow::Result<Arc<dyn PortalExtractor>>>;

/// Extractor identifiers (the `extractor` key of a portal config) to constructors.
pub struct PortalRegistry {
    factories: HashMap<String, ExtractorFactory>,
}

impl PortalRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the extractors shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(css::EXTRACTOR_NAME, |config| {
            let extractor = css::CssExtractor::from_config(config)?;
            Ok(Arc::new(extractor) as Arc<dyn PortalExtractor>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PortalConfig) -> anyhow::Result<Arc<dyn PortalExtractor>> + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, config: &PortalConfig) -> anyhow::Result<Arc<dyn PortalExtractor>> {
        let factory = self
            .factories
            .get(&config.extractor)
            .ok_or_else(|| ConfigError::UnknownExtractor(config.extractor.clone()))?;
        factory(config)
    }
}

impl Default for PortalRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
