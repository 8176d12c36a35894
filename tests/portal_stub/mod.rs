#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use chrono::NaiveDate;
use portalcrawl::config::PortalConfig;
use portalcrawl::fetch::{CachingFetcher, ErrorBudget, LiveFetcher};
use portalcrawl::portal::PortalExtractor;
use portalcrawl::warc::{HttpHead, WarcInfo, WarcReader, WarcRecord, WarcWriter};

/// Pages in a line format instead of HTML:
/// `article <url>`, `next <url>`, `follow <url>`, `date <yyyy-mm-dd>`, `noscheme`.
#[derive(Debug, Default)]
pub struct StubExtractor;

fn lines<'a>(html: &'a str, keyword: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    html.lines().filter_map(move |line| {
        let (key, value) = line.trim().split_once(' ')?;
        (key == keyword).then_some(value.trim())
    })
}

impl PortalExtractor for StubExtractor {
    fn extract_article_urls_from_page(&self, html: &str) -> BTreeSet<String> {
        lines(html, "article").map(str::to_owned).collect()
    }

    fn extract_next_page_url(&self, html: &str) -> Option<String> {
        lines(html, "next").next().map(str::to_owned)
    }

    fn identify_site_scheme(&self, _url: &str, html: &str) -> Option<String> {
        (!html.lines().any(|line| line.trim() == "noscheme")).then(|| "stub".to_owned())
    }

    fn extract_article_date(&self, _url: &str, html: &str, _scheme: &str) -> Option<NaiveDate> {
        lines(html, "date")
            .next()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    }

    fn article_to_corpus(
        &self,
        url: &str,
        _html: &str,
        scheme: &str,
        out: &mut dyn Write,
    ) -> anyhow::Result<()> {
        writeln!(out, "{scheme} {url}")?;
        Ok(())
    }

    fn follow_links_on_page(&self, _url: &str, html: &str, _scheme: &str) -> BTreeSet<String> {
        lines(html, "follow").map(str::to_owned).collect()
    }
}

pub fn stub_extractor() -> Arc<dyn PortalExtractor> {
    Arc::new(StubExtractor)
}

/// Serves pages from a map and records every call. Unknown URLs count against
/// the error budget like failed downloads.
#[derive(Debug, Clone)]
pub struct MapFetcher {
    pages: Rc<RefCell<HashMap<String, String>>>,
    pub calls: Rc<RefCell<Vec<String>>>,
    budget: ErrorBudget,
}

impl MapFetcher {
    pub fn new(pages: &[(&str, &str)], max_errors: usize) -> Self {
        let pages = pages
            .iter()
            .map(|(url, html)| ((*url).to_owned(), (*html).to_owned()))
            .collect();
        Self {
            pages: Rc::new(RefCell::new(pages)),
            calls: Rc::new(RefCell::new(Vec::new())),
            budget: ErrorBudget::new(max_errors),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.borrow().iter().filter(|call| *call == url).count()
    }

    pub fn boxed(&self) -> Option<Box<dyn LiveFetcher>> {
        Some(Box::new(self.clone()))
    }
}

impl LiveFetcher for MapFetcher {
    fn fetch(&self, url: &str, writer: &mut WarcWriter) -> anyhow::Result<Option<String>> {
        if writer.is_bad(url) || writer.is_good(url) {
            return Ok(None);
        }
        self.calls.borrow_mut().push(url.to_owned());

        let Some(html) = self.pages.borrow().get(url).cloned() else {
            self.budget.record_error()?;
            return Ok(None);
        };
        let (request, response) = pair(url, &html);
        writer.write_pair(&request, &response, url)?;
        Ok(Some(html))
    }
}

pub fn pair(url: &str, html: &str) -> (WarcRecord, WarcRecord) {
    let request = WarcRecord::request(url, &HttpHead::new("GET / HTTP/1.1"));
    let head = HttpHead::new("HTTP/1.1 200 OK").with_header("Content-Type", "text/html; charset=utf-8");
    let response = WarcRecord::response(
        url,
        &head,
        html.as_bytes(),
        None,
        "UTF-8",
        request.record_id(),
    );
    (request, response)
}

/// Writes a finished archive holding `pages`.
pub fn write_archive(path: &Path, pages: &[(&str, &str)]) -> anyhow::Result<()> {
    let mut writer = WarcWriter::create(path, true, &WarcInfo::for_invocation(&["test".to_owned()]))?;
    for (url, html) in pages {
        let (request, response) = pair(url, html);
        writer.write_pair(&request, &response, url)?;
    }
    writer.finish()?;
    Ok(())
}

pub fn open_cache(
    old: &[&Path],
    new: &Path,
    live: Option<Box<dyn LiveFetcher>>,
) -> anyhow::Result<CachingFetcher> {
    let readers = old
        .iter()
        .map(|path| WarcReader::open(path, Default::default()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let info = WarcInfo::for_invocation(&["test".to_owned()]);
    let writer = WarcWriter::create(new, true, &info)?;
    Ok(CachingFetcher::new(readers, writer, live))
}

pub fn config(yaml: &str) -> Arc<PortalConfig> {
    let config: PortalConfig = serde_yaml::from_str(yaml).expect("parse stub portal config");
    config.validate(&HashSet::new()).expect("valid stub portal config");
    Arc::new(config)
}

pub fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

/// `Write` sink whose contents stay readable after it is boxed away.
#[derive(Debug, Clone, Default)]
pub struct SharedSink(pub Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.borrow())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
