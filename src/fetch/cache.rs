use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::fetch::LiveFetcher;
use crate::warc::{ReaderOptions, WarcInfo, WarcReader, WarcWriter};

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Previous generations, oldest first.
    pub old_archives: Vec<PathBuf>,
    pub new_archive: PathBuf,
    pub overwrite: bool,
    pub reader: ReaderOptions,
    /// Recorded in the warcinfo record when there is nothing to carry forward.
    pub invocation: Vec<String>,
    pub bad_urls: HashSet<String>,
}

/// Prior WARC files layered under one new WARC file, with an optional network fallback.
pub struct CachingFetcher {
    readers: Vec<WarcReader>,
    writer: WarcWriter,
    live: Option<Box<dyn LiveFetcher>>,
}

impl CachingFetcher {
    pub fn new(
        readers: Vec<WarcReader>,
        writer: WarcWriter,
        live: Option<Box<dyn LiveFetcher>>,
    ) -> Self {
        Self {
            readers,
            writer,
            live,
        }
    }

    /// Opens every old archive, then creates the new one. The newest old archive's
    /// warcinfo block is carried forward.
    pub fn open(options: CacheOptions, live: Option<Box<dyn LiveFetcher>>) -> anyhow::Result<Self> {
        let readers = options
            .old_archives
            .iter()
            .map(|path| {
                WarcReader::open(path, options.reader)
                    .with_context(|| format!("open old archive: {}", path.display()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let info = match readers.last() {
            Some(newest) => WarcInfo::carried(newest.info_block()),
            None => WarcInfo::for_invocation(&options.invocation),
        };
        let writer = WarcWriter::create(&options.new_archive, options.overwrite, &info)?
            .with_bad_urls(options.bad_urls);

        Ok(Self::new(readers, writer, live))
    }

    pub fn writer(&self) -> &WarcWriter {
        &self.writer
    }

    pub fn readers(&self) -> &[WarcReader] {
        &self.readers
    }

    pub fn is_online(&self) -> bool {
        self.live.is_some()
    }

    pub fn is_good(&self, url: &str) -> bool {
        self.writer.is_good(url)
    }

    pub fn is_bad(&self, url: &str) -> bool {
        self.writer.is_bad(url)
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.readers.iter().any(|reader| reader.contains(url))
    }

    pub fn good_urls(&self) -> &HashSet<String> {
        self.writer.good_urls()
    }

    /// Returns the page text for `url` from the newest archive holding it, or from the
    /// network. `ignore_cache` asks for a fresh copy; the cached one is the fallback.
    pub fn fetch(&mut self, url: &str, ignore_cache: bool) -> anyhow::Result<Option<String>> {
        if self.writer.is_bad(url) {
            tracing::info!(%url, "skipping known-bad url");
            return Ok(None);
        }
        if self.writer.is_good(url) {
            tracing::error!(%url, "url was requested twice in one run");
            return Ok(None);
        }

        if self.is_cached(url) {
            if !ignore_cache {
                tracing::debug!(%url, "serving from cache");
                return self.copy_forward(url);
            }
            tracing::info!(%url, "cached copy exists but a fresh download was requested");
            // The new archive then holds the fresh pair and the cached one is not copied.
            if let Some(text) = self.fetch_live(url)? {
                return Ok(Some(text));
            }
            tracing::info!(%url, "fresh download failed; falling back to the cached copy");
            return self.copy_forward(url);
        }

        if self.live.is_none() {
            tracing::warn!(%url, "url is not cached and downloading is disabled");
            return Ok(None);
        }
        self.fetch_live(url)
    }

    pub fn finish(self) -> anyhow::Result<PathBuf> {
        self.writer.finish()
    }

    pub fn new_archive_path(&self) -> &Path {
        self.writer.path()
    }

    fn fetch_live(&mut self, url: &str) -> anyhow::Result<Option<String>> {
        match &self.live {
            Some(live) => live.fetch(url, &mut self.writer),
            None => Ok(None),
        }
    }

    fn copy_forward(&mut self, url: &str) -> anyhow::Result<Option<String>> {
        let Some(reader) = self.readers.iter().rev().find(|reader| reader.contains(url)) else {
            return Ok(None);
        };
        let Some(entry) = reader.entry(url) else {
            return Ok(None);
        };

        let request = reader.get_stored_bytes(entry.request)?;
        let response = reader.get_stored_bytes(entry.response)?;
        self.writer
            .copy_pair(&request, &response, url)
            .with_context(|| format!("copy cached pair from {}", reader.path().display()))?;

        reader.download_url(url)
    }
}

impl std::fmt::Debug for CachingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingFetcher")
            .field("readers", &self.readers)
            .field("writer", &self.writer)
            .field("online", &self.live.is_some())
            .finish()
    }
}
