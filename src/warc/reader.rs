use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek as _, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::encoding::decode_with_label;
use crate::error::ArchiveError;
use crate::warc::record::{DigestCheck, RecordKind, RecordLocation, StoredRecord, WarcRecord};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Fail on corruption and duplicate urls instead of logging them.
    pub strict: bool,
    pub check_digest: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            strict: true,
            check_digest: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub request: RecordLocation,
    pub response: RecordLocation,
}

/// Read-only view of one WARC file, indexed by target URL at open time.
#[derive(Debug)]
pub struct WarcReader {
    path: PathBuf,
    file: File,
    compressed: bool,
    options: ReaderOptions,
    info_block: Vec<u8>,
    index: HashMap<String, IndexEntry>,
}

impl WarcReader {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::open(&path).with_context(|| format!("open warc file: {}", path.display()))?;

        let mut reader = Self {
            path,
            file,
            compressed: false,
            options,
            info_block: Vec::new(),
            index: HashMap::new(),
        };
        reader.build_index()?;

        tracing::info!(
            path = %reader.path.display(),
            urls = reader.index.len(),
            "indexed warc file"
        );
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The warcinfo block exactly as stored.
    pub fn info_block(&self) -> &[u8] {
        &self.info_block
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn entry(&self, url: &str) -> Option<IndexEntry> {
        self.index.get(url).copied()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Re-reads and parses the record stored at `location`.
    pub fn get_record_at(&self, location: RecordLocation) -> anyhow::Result<WarcRecord> {
        let bytes = self.record_bytes(location)?;
        WarcRecord::parse(&bytes)
            .with_context(|| format!("parse record at offset {}", location.offset))
    }

    /// The bytes of one record in the form a byte-for-byte copy can use.
    pub fn get_stored_bytes(&self, location: RecordLocation) -> anyhow::Result<StoredRecord> {
        if self.compressed && location.within_member.is_none() {
            return self.read_stored(location).map(StoredRecord::Member);
        }
        self.record_bytes(location).map(StoredRecord::Plain)
    }

    fn read_stored(&self, location: RecordLocation) -> anyhow::Result<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(location.offset)).with_context(|| {
            format!("seek to offset {} in {}", location.offset, self.path.display())
        })?;
        let mut bytes = vec![0_u8; usize::try_from(location.length)?];
        file.read_exact(&mut bytes)
            .with_context(|| format!("read record bytes at offset {}", location.offset))?;
        Ok(bytes)
    }

    /// Uncompressed bytes of exactly one record.
    fn record_bytes(&self, location: RecordLocation) -> anyhow::Result<Vec<u8>> {
        let stored = self.read_stored(location)?;
        if !self.compressed {
            return Ok(stored);
        }
        let mut member = Vec::new();
        flate2::read::GzDecoder::new(stored.as_slice())
            .read_to_end(&mut member)
            .with_context(|| format!("decompress member at offset {}", location.offset))?;
        let Some((start, length)) = location.within_member else {
            return Ok(member);
        };
        let start = usize::try_from(start)?;
        let end = start + usize::try_from(length)?;
        member.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            anyhow::anyhow!(
                "record range {start}..{end} is outside the member at offset {}",
                location.offset
            )
        })
    }

    /// Decoded text of the cached response for `url`, `None` when it is not indexed.
    pub fn download_url(&self, url: &str) -> anyhow::Result<Option<String>> {
        let Some(entry) = self.index.get(url) else {
            return Ok(None);
        };
        let record = self.get_record_at(entry.response)?;

        if self.options.check_digest {
            match record.verify_payload_digest() {
                DigestCheck::Match => {}
                DigestCheck::Missing => {
                    tracing::debug!(%url, "cached response has no payload digest");
                }
                DigestCheck::Unsupported(algorithm) => {
                    tracing::warn!(%url, %algorithm, "unsupported payload digest; not verified");
                }
                DigestCheck::Mismatch { stored, computed } => {
                    if self.options.strict {
                        return Err(ArchiveError::DigestMismatch {
                            url: url.to_owned(),
                            stored,
                            computed,
                        }
                        .into());
                    }
                    tracing::warn!(%url, %stored, %computed, "payload digest mismatch");
                }
            }
        }

        let decoded = decode_with_label(record.payload(), record.detected_encoding());
        if decoded.lossy {
            tracing::warn!(
                %url,
                encoding = decoded.encoding,
                "cached payload is not valid in its recorded encoding; dropped undecodable bytes"
            );
        }
        Ok(Some(decoded.text))
    }

    fn build_index(&mut self) -> anyhow::Result<()> {
        let file = self.file.try_clone().context("clone warc file handle")?;
        let mut scanner = BufReader::new(file);
        self.compressed = scanner
            .fill_buf()
            .context("read warc file header")?
            .starts_with(&GZIP_MAGIC);

        let mut scan = ScanState::default();
        loop {
            let offset = scanner.stream_position().context("warc scan position")?;
            if scanner.fill_buf().context("read warc file")?.is_empty() {
                break;
            }

            let chunk = read_chunk(&mut scanner, self.compressed);
            let length = scanner.stream_position().context("warc scan position")? - offset;
            if chunk.records.is_empty() && chunk.failure.is_none() {
                break;
            }
            for (within_member, record) in chunk.records {
                let location = RecordLocation {
                    offset,
                    length,
                    within_member,
                };
                self.index_record(&mut scan, location, record)?;
            }
            if let Some(err) = chunk.failure {
                self.corruption(offset, format!("unreadable record: {err:#}"))?;
                break;
            }
        }

        if let Some((url, location)) = scan.pending_request.take() {
            self.corruption(location.offset, format!("request for {url} has no response"))?;
        }

        let mut duplicates = scan
            .url_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            duplicates.sort();
            if self.options.strict {
                return Err(ArchiveError::DuplicateUrls {
                    path: self.path.clone(),
                    duplicates,
                }
                .into());
            }
            for (url, count) in &duplicates {
                tracing::warn!(%url, count, "duplicate url in warc file; keeping the last pair");
            }
        }

        if scan.responses == 0 {
            return Err(ArchiveError::Empty(self.path.clone()).into());
        }

        Ok(())
    }

    fn index_record(
        &mut self,
        scan: &mut ScanState,
        location: RecordLocation,
        record: WarcRecord,
    ) -> anyhow::Result<()> {
        let offset = location.offset;
        if !scan.past_info {
            scan.past_info = true;
            if record.kind() == Some(RecordKind::WarcInfo) {
                self.info_block = record.block().to_vec();
                return Ok(());
            }
            if self.options.strict {
                return Err(ArchiveError::MissingInfoRecord(self.path.clone()).into());
            }
            tracing::warn!(path = %self.path.display(), "warc file has no warcinfo record");
        }

        match record.kind() {
            Some(RecordKind::Request) => {
                let Some(url) = record.target_uri() else {
                    return self.corruption(offset, "request record without target uri".to_owned());
                };
                if let Some((previous, _)) = scan.pending_request.take() {
                    self.corruption(
                        offset,
                        format!("request for {previous} is not followed by its response"),
                    )?;
                }
                scan.pending_request = Some((url.to_owned(), location));
            }
            Some(RecordKind::Response) => {
                let url = record.target_uri().unwrap_or_default();
                let Some((request_url, request)) = scan.pending_request.take() else {
                    return self.corruption(offset, format!("response for {url} without request"));
                };
                if request_url != url {
                    return self.corruption(
                        offset,
                        format!("request url {request_url} does not match response url {url}"),
                    );
                }
                scan.responses += 1;
                *scan.url_counts.entry(request_url.clone()).or_default() += 1;
                self.index.insert(
                    request_url,
                    IndexEntry {
                        request,
                        response: location,
                    },
                );
            }
            other => {
                let kind = other.map_or("unknown", RecordKind::as_str);
                self.corruption(offset, format!("unexpected {kind} record"))?;
            }
        }
        Ok(())
    }

    fn corruption(&self, offset: u64, reason: String) -> anyhow::Result<()> {
        if self.options.strict {
            return Err(ArchiveError::Corrupt {
                path: self.path.clone(),
                offset,
                reason,
            }
            .into());
        }
        tracing::warn!(path = %self.path.display(), offset, %reason, "skipping corrupt warc data");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScanState {
    past_info: bool,
    pending_request: Option<(String, RecordLocation)>,
    url_counts: HashMap<String, usize>,
    responses: usize,
}

/// Records read in one step of the scan, with whatever stopped it early.
struct Chunk {
    records: Vec<(Option<(u64, u64)>, WarcRecord)>,
    failure: Option<anyhow::Error>,
}

/// Reads the next plain record, or every record of the next gzip member. A member may
/// hold one record or a whole file compressed as a single stream.
fn read_chunk<R: BufRead>(scanner: &mut R, compressed: bool) -> Chunk {
    if !compressed {
        return match WarcRecord::read_from(scanner) {
            Ok(record) => Chunk {
                records: record.map(|record| (None, record)).into_iter().collect(),
                failure: None,
            },
            Err(err) => Chunk {
                records: Vec::new(),
                failure: Some(err),
            },
        };
    }

    let mut member = Vec::new();
    if let Err(err) = flate2::bufread::GzDecoder::new(&mut *scanner).read_to_end(&mut member) {
        return Chunk {
            records: Vec::new(),
            failure: Some(anyhow::Error::new(err).context("decompress gzip member")),
        };
    }

    let mut records = Vec::new();
    let mut rest = member.as_slice();
    let failure = loop {
        let start = member.len() - rest.len();
        match WarcRecord::read_from(&mut rest) {
            Ok(Some(record)) => {
                let end = member.len() - rest.len();
                records.push(((start as u64, (end - start) as u64), record));
            }
            Ok(None) => break None,
            Err(err) => break Some(err),
        }
    };

    let shared = records.len() > 1;
    Chunk {
        records: records
            .into_iter()
            .map(|(span, record)| (shared.then_some(span), record))
            .collect(),
        failure,
    }
}
