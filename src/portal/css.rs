use std::collections::BTreeSet;
use std::io::Write;

use anyhow::Context as _;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::PortalConfig;
use crate::portal::PortalExtractor;

pub const EXTRACTOR_NAME: &str = "css";

const DEFAULT_SCHEME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CssSelectors {
    pub article_links: String,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub follow_links: Option<String>,
    #[serde(default)]
    pub date: Option<DateSelector>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    /// Links not containing this substring are ignored.
    #[serde(default)]
    pub url_must_contain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSelector {
    pub selector: String,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default = "default_date_format")]
    pub format: String,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_owned()
}

#[derive(Debug, Serialize)]
struct CorpusLine<'a> {
    url: &'a str,
    scheme: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
    text: String,
}

/// Extractor driven entirely by CSS selectors from the portal config.
#[derive(Debug)]
pub struct CssExtractor {
    base_url: Url,
    article_links: Selector,
    next_page: Option<Selector>,
    follow_links: Option<Selector>,
    date: Option<(Selector, DateSelector)>,
    body: Option<Selector>,
    scheme: String,
    url_must_contain: Option<String>,
}

impl CssExtractor {
    pub fn from_config(config: &PortalConfig) -> anyhow::Result<Self> {
        let selectors = config.selectors.as_ref().ok_or_else(|| {
            anyhow::anyhow!("the css extractor needs a `selectors` block in the portal config")
        })?;
        let base_url = Url::parse(&config.base_url).context("parse base_url")?;

        Ok(Self {
            base_url,
            article_links: parse_selector(&selectors.article_links)?,
            next_page: selectors.next_page.as_deref().map(parse_selector).transpose()?,
            follow_links: selectors
                .follow_links
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            date: selectors
                .date
                .as_ref()
                .map(|date| Ok::<_, anyhow::Error>((parse_selector(&date.selector)?, date.clone())))
                .transpose()?,
            body: selectors.body.as_deref().map(parse_selector).transpose()?,
            scheme: selectors
                .scheme
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEME.to_owned()),
            url_must_contain: selectors.url_must_contain.clone(),
        })
    }

    fn links(&self, html: &str, selector: &Selector) -> BTreeSet<String> {
        let document = Html::parse_document(html);
        document
            .select(selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| self.resolve(href))
            .filter(|url| self.accepts(url))
            .collect()
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let mut url = self.base_url.join(href).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_fragment(None);
        Some(url.to_string())
    }

    fn accepts(&self, url: &str) -> bool {
        self.url_must_contain
            .as_deref()
            .is_none_or(|needle| url.contains(needle))
    }
}

impl PortalExtractor for CssExtractor {
    fn extract_article_urls_from_page(&self, html: &str) -> BTreeSet<String> {
        self.links(html, &self.article_links)
    }

    fn extract_next_page_url(&self, html: &str) -> Option<String> {
        let selector = self.next_page.as_ref()?;
        let document = Html::parse_document(html);
        document
            .select(selector)
            .filter_map(|element| element.value().attr("href"))
            .find_map(|href| self.resolve(href))
    }

    fn identify_site_scheme(&self, url: &str, _html: &str) -> Option<String> {
        self.accepts(url).then(|| self.scheme.clone())
    }

    fn extract_article_date(&self, _url: &str, html: &str, _scheme: &str) -> Option<NaiveDate> {
        let (selector, settings) = self.date.as_ref()?;
        let document = Html::parse_document(html);
        let element = document.select(selector).next()?;
        let raw = match settings.attr.as_deref() {
            Some(attr) => element.value().attr(attr)?.to_owned(),
            None => element_text(element),
        };
        parse_date(raw.trim(), &settings.format)
    }

    fn article_to_corpus(
        &self,
        url: &str,
        html: &str,
        scheme: &str,
        out: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let document = Html::parse_document(html);
        let text = match &self.body {
            Some(selector) => document
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            None => element_text(document.root_element()),
        };

        let line = CorpusLine {
            url,
            scheme,
            date: self.extract_article_date(url, html, scheme),
            text,
        };
        serde_json::to_writer(&mut *out, &line).context("write corpus line")?;
        out.write_all(b"\n").context("write corpus newline")?;
        Ok(())
    }

    fn follow_links_on_page(&self, _url: &str, html: &str, _scheme: &str) -> BTreeSet<String> {
        match &self.follow_links {
            Some(selector) => self.links(html, selector),
            None => BTreeSet::new(),
        }
    }
}

fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector)
        .map_err(|err| anyhow::anyhow!("invalid css selector {selector:?}: {err}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_date(raw: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
        return Some(date);
    }
    if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(raw, format) {
        return Some(datetime.date());
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|datetime| datetime.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CssExtractor {
        let config: PortalConfig = serde_yaml::from_str(
            r#"
site_name: example
extractor: css
base_url: https://news.example/
columns:
  - name: all
    url: https://news.example/archive?page=#pagenum
pagination:
  next_url_by_pagenum: true
  max_pagenum: 3
selectors:
  article_links: "ul.list a"
  next_page: "a.next"
  follow_links: "div.related a"
  url_must_contain: "/article/"
  body: "div.body p"
  date:
    selector: "meta[name=date]"
    attr: content
"#,
        )
        .unwrap();
        CssExtractor::from_config(&config).unwrap()
    }

    const ARCHIVE_PAGE: &str = r##"<html><body>
<ul class="list">
  <li><a href="/article/1#comments">One</a></li>
  <li><a href="https://news.example/article/2">Two</a></li>
  <li><a href="/about">About</a></li>
</ul>
<a class="next" href="/archive?page=2">Next</a>
</body></html>"##;

    const ARTICLE_PAGE: &str = r##"<html><head><meta name="date" content="2024-03-05"></head><body>
<div class="body"><p>First   paragraph.</p><p>Second.</p></div>
<div class="related"><a href="/article/3">Three</a><a href="/tags/x">Tag</a></div>
</body></html>"##;

    #[test]
    fn article_links_are_resolved_and_filtered() {
        let urls = extractor().extract_article_urls_from_page(ARCHIVE_PAGE);
        let expected: BTreeSet<String> = [
            "https://news.example/article/1",
            "https://news.example/article/2",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        assert_eq!(urls, expected);
    }

    #[test]
    fn next_page_link_is_absolute() {
        assert_eq!(
            extractor().extract_next_page_url(ARCHIVE_PAGE).as_deref(),
            Some("https://news.example/archive?page=2")
        );
    }

    #[test]
    fn article_date_comes_from_the_attribute() {
        let date = extractor().extract_article_date("u", ARTICLE_PAGE, "default");
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[test]
    fn corpus_line_is_json_with_normalized_text() -> anyhow::Result<()> {
        let mut out = Vec::new();
        extractor().article_to_corpus(
            "https://news.example/article/1",
            ARTICLE_PAGE,
            "default",
            &mut out,
        )?;
        let line: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(line["text"], "First paragraph.\nSecond.");
        assert_eq!(line["date"], "2024-03-05");
        assert!(out.ends_with(b"\n"));
        Ok(())
    }

    #[test]
    fn follow_links_respect_the_url_filter() {
        let links = extractor().follow_links_on_page("u", ARTICLE_PAGE, "default");
        assert_eq!(links.len(), 1);
        assert!(links.contains("https://news.example/article/3"));
    }

    #[test]
    fn scheme_requires_matching_url() {
        let extractor = extractor();
        assert_eq!(
            extractor.identify_site_scheme("https://news.example/article/9", ""),
            Some("default".to_owned())
        );
        assert_eq!(
            extractor.identify_site_scheme("https://news.example/about", ""),
            None
        );
    }
}
