use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::warc::record::{StoredRecord, WarcRecord, warc_fields};

/// Block of the warcinfo record that opens a new WARC file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcInfo(Vec<u8>);

impl WarcInfo {
    /// Fresh provenance for this invocation.
    pub fn for_invocation(args: &[String]) -> Self {
        let invocation = serde_json::to_string(args).unwrap_or_default();
        Self(warc_fields(&[
            (
                "software",
                format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            ),
            ("format", "WARC File Format 1.0".to_owned()),
            (
                "conformsTo",
                "http://bibnum.bnf.fr/WARC/WARC_ISO_28500_version1_latestdraft.pdf".to_owned(),
            ),
            ("invocation", invocation),
            ("created", chrono::Utc::now().to_rfc3339()),
        ]))
    }

    /// Carries a previous generation's warcinfo block forward unchanged.
    pub fn carried(block: &[u8]) -> Self {
        Self(block.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Append-only WARC writer. Every record is its own gzip member.
#[derive(Debug)]
pub struct WarcWriter {
    path: PathBuf,
    out: BufWriter<File>,
    good_urls: HashSet<String>,
    bad_urls: HashSet<String>,
}

impl WarcWriter {
    pub fn create(
        path: impl AsRef<Path>,
        overwrite: bool,
        info: &WarcInfo,
    ) -> anyhow::Result<Self> {
        let requested = path.as_ref();
        let path = if overwrite {
            requested.to_path_buf()
        } else {
            next_free_path(requested)
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create warc dir: {}", parent.display()))?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("create warc file: {}", path.display()))?;

        let mut writer = Self {
            path,
            out: BufWriter::new(file),
            good_urls: HashSet::new(),
            bad_urls: HashSet::new(),
        };

        let filename = writer
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let record = WarcRecord::warcinfo(&filename, info.as_bytes().to_vec());
        writer
            .write_member(&record.to_bytes())
            .context("write warcinfo record")?;

        tracing::info!(path = %writer.path.display(), "created warc file");
        Ok(writer)
    }

    pub fn with_bad_urls(mut self, bad_urls: HashSet<String>) -> Self {
        self.bad_urls = bad_urls;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn good_urls(&self) -> &HashSet<String> {
        &self.good_urls
    }

    pub fn bad_urls(&self) -> &HashSet<String> {
        &self.bad_urls
    }

    pub fn is_good(&self, url: &str) -> bool {
        self.good_urls.contains(url)
    }

    pub fn is_bad(&self, url: &str) -> bool {
        self.bad_urls.contains(url)
    }

    pub fn write_pair(
        &mut self,
        request: &WarcRecord,
        response: &WarcRecord,
        url: &str,
    ) -> anyhow::Result<()> {
        self.ensure_storable(url)?;
        self.write_member(&request.to_bytes())
            .with_context(|| format!("write request record: {url}"))?;
        self.write_member(&response.to_bytes())
            .with_context(|| format!("write response record: {url}"))?;
        self.good_urls.insert(url.to_owned());
        Ok(())
    }

    /// Copies two stored records. Single-record members are copied verbatim; anything
    /// else is gzipped into a member of its own.
    pub fn copy_pair(
        &mut self,
        request: &StoredRecord,
        response: &StoredRecord,
        url: &str,
    ) -> anyhow::Result<()> {
        self.ensure_storable(url)?;
        for record in [request, response] {
            match record {
                StoredRecord::Member(bytes) => self
                    .out
                    .write_all(bytes)
                    .with_context(|| format!("copy record: {url}"))?,
                StoredRecord::Plain(bytes) => self
                    .write_member(bytes)
                    .with_context(|| format!("copy record: {url}"))?,
            }
        }
        self.good_urls.insert(url.to_owned());
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.out.flush().context("flush warc file")
    }

    pub fn finish(mut self) -> anyhow::Result<PathBuf> {
        self.flush()?;
        self.out
            .get_ref()
            .sync_all()
            .with_context(|| format!("sync warc file: {}", self.path.display()))?;
        tracing::info!(
            path = %self.path.display(),
            urls = self.good_urls.len(),
            "closed warc file"
        );
        Ok(self.path)
    }

    fn ensure_storable(&self, url: &str) -> anyhow::Result<()> {
        if self.bad_urls.contains(url) {
            anyhow::bail!("refusing to store a known-bad url: {url}");
        }
        if self.good_urls.contains(url) {
            anyhow::bail!("url is already stored in {}: {url}", self.path.display());
        }
        Ok(())
    }

    fn write_member(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut encoder = GzEncoder::new(&mut self.out, Compression::default());
        encoder.write_all(bytes).context("compress record")?;
        encoder.finish().context("finish gzip member")?;
        Ok(())
    }
}

/// `name.warc.gz`, or the first free `name-N.warc.gz` when it already exists.
pub fn next_free_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, extension) = match file_name.split_once('.') {
        Some((stem, extension)) => (stem.to_owned(), format!(".{extension}")),
        None => (file_name.clone(), String::new()),
    };

    let mut counter = 1_u32;
    loop {
        let candidate = path.with_file_name(format!("{stem}-{counter}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
