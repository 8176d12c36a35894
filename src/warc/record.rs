use std::io::{BufRead, Read as _};
use std::net::IpAddr;

use anyhow::Context as _;
use sha2::{Digest as _, Sha256};

pub const WARC_VERSION: &str = "WARC/1.0";

pub const HEADER_TYPE: &str = "WARC-Type";
pub const HEADER_RECORD_ID: &str = "WARC-Record-ID";
pub const HEADER_DATE: &str = "WARC-Date";
pub const HEADER_TARGET_URI: &str = "WARC-Target-URI";
pub const HEADER_CONCURRENT_TO: &str = "WARC-Concurrent-To";
pub const HEADER_IP_ADDRESS: &str = "WARC-IP-Address";
pub const HEADER_DETECTED_ENCODING: &str = "WARC-X-Detected-Encoding";
pub const HEADER_PAYLOAD_DIGEST: &str = "WARC-Payload-Digest";
pub const HEADER_BLOCK_DIGEST: &str = "WARC-Block-Digest";
pub const HEADER_FILENAME: &str = "WARC-Filename";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    WarcInfo,
    Request,
    Response,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WarcInfo => "warcinfo",
            Self::Request => "request",
            Self::Response => "response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warcinfo" => Some(Self::WarcInfo),
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one record is stored. `offset` and `length` cover its gzip member (or the plain
/// record bytes). `within_member` is the record's byte range inside the decompressed member
/// when that member holds more than one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub offset: u64,
    pub length: u64,
    pub within_member: Option<(u64, u64)>,
}

/// Record bytes ready to be copied into another archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRecord {
    /// A gzip member holding only this record; copied verbatim.
    Member(Vec<u8>),
    /// The uncompressed record; compressed into its own member on write.
    Plain(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestCheck {
    Match,
    Missing,
    Unsupported(String),
    Mismatch { stored: String, computed: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    version: String,
    headers: Vec<(String, String)>,
    block: Vec<u8>,
}

impl WarcRecord {
    pub fn warcinfo(filename: &str, fields: Vec<u8>) -> Self {
        let headers = vec![
            (HEADER_TYPE.to_owned(), RecordKind::WarcInfo.as_str().to_owned()),
            (HEADER_RECORD_ID.to_owned(), new_record_id()),
            (HEADER_DATE.to_owned(), warc_date_now()),
            (HEADER_FILENAME.to_owned(), filename.to_owned()),
            (
                HEADER_CONTENT_TYPE.to_owned(),
                "application/warc-fields".to_owned(),
            ),
        ];
        Self::with_block(headers, fields)
    }

    pub fn request(url: &str, head: &HttpHead) -> Self {
        let headers = vec![
            (HEADER_TYPE.to_owned(), RecordKind::Request.as_str().to_owned()),
            (HEADER_RECORD_ID.to_owned(), new_record_id()),
            (HEADER_DATE.to_owned(), warc_date_now()),
            (HEADER_TARGET_URI.to_owned(), url.to_owned()),
            (
                HEADER_CONTENT_TYPE.to_owned(),
                "application/http; msgtype=request".to_owned(),
            ),
        ];
        Self::with_block(headers, head.to_bytes())
    }

    pub fn response(
        url: &str,
        head: &HttpHead,
        payload: &[u8],
        ip: Option<IpAddr>,
        encoding: &str,
        concurrent_to: Option<&str>,
    ) -> Self {
        let mut headers = vec![
            (HEADER_TYPE.to_owned(), RecordKind::Response.as_str().to_owned()),
            (HEADER_RECORD_ID.to_owned(), new_record_id()),
            (HEADER_DATE.to_owned(), warc_date_now()),
            (HEADER_TARGET_URI.to_owned(), url.to_owned()),
        ];
        if let Some(concurrent_to) = concurrent_to {
            headers.push((HEADER_CONCURRENT_TO.to_owned(), concurrent_to.to_owned()));
        }
        if let Some(ip) = ip {
            headers.push((HEADER_IP_ADDRESS.to_owned(), ip.to_string()));
        }
        headers.push((HEADER_DETECTED_ENCODING.to_owned(), encoding.to_owned()));
        headers.push((HEADER_PAYLOAD_DIGEST.to_owned(), sha256_digest(payload)));
        headers.push((
            HEADER_CONTENT_TYPE.to_owned(),
            "application/http; msgtype=response".to_owned(),
        ));

        let mut block = head.to_bytes();
        block.extend_from_slice(payload);
        Self::with_block(headers, block)
    }

    fn with_block(mut headers: Vec<(String, String)>, block: Vec<u8>) -> Self {
        headers.push((HEADER_BLOCK_DIGEST.to_owned(), sha256_digest(&block)));
        headers.push((HEADER_CONTENT_LENGTH.to_owned(), block.len().to_string()));
        Self {
            version: WARC_VERSION.to_owned(),
            headers,
            block,
        }
    }

    /// Reads the next record from `reader`. `Ok(None)` on a clean end of input.
    pub fn read_from<R: BufRead>(reader: &mut R) -> anyhow::Result<Option<Self>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).context("read warc version line")?;
            if n == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        let version = line.trim_end_matches(['\r', '\n']).to_owned();
        if !version.starts_with("WARC/") {
            anyhow::bail!("expected warc version line, found {version:?}");
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).context("read warc header line")?;
            if n == 0 {
                anyhow::bail!("truncated warc header block");
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if trimmed.starts_with([' ', '\t']) {
                let Some((_, value)) = headers.last_mut() else {
                    anyhow::bail!("header continuation without a header: {trimmed:?}");
                };
                value.push(' ');
                value.push_str(trimmed.trim());
                continue;
            }
            let (name, value) = trimmed
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("malformed warc header: {trimmed:?}"))?;
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        let length = find_header(&headers, HEADER_CONTENT_LENGTH)
            .ok_or_else(|| anyhow::anyhow!("warc record without Content-Length"))?
            .parse::<usize>()
            .context("parse Content-Length")?;

        let mut block = vec![0_u8; length];
        reader
            .read_exact(&mut block)
            .context("read warc content block")?;

        let mut trailer = [0_u8; 4];
        reader
            .read_exact(&mut trailer)
            .context("read warc record trailer")?;
        if &trailer != b"\r\n\r\n" {
            anyhow::bail!("warc record is not terminated by CRLF CRLF");
        }

        Ok(Some(Self {
            version,
            headers,
            block,
        }))
    }

    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = bytes;
        Self::read_from(&mut cursor)?.ok_or_else(|| anyhow::anyhow!("empty warc record"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.block.len() + 512);
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn kind(&self) -> Option<RecordKind> {
        self.header(HEADER_TYPE).and_then(RecordKind::parse)
    }

    pub fn record_id(&self) -> Option<&str> {
        self.header(HEADER_RECORD_ID)
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header(HEADER_TARGET_URI)
    }

    pub fn detected_encoding(&self) -> Option<&str> {
        self.header(HEADER_DETECTED_ENCODING)
    }

    pub fn block(&self) -> &[u8] {
        &self.block
    }

    /// The HTTP message head of a request/response block.
    pub fn http_head(&self) -> anyhow::Result<HttpHead> {
        let (head, _) = split_http_block(&self.block);
        HttpHead::parse(head)
    }

    /// The HTTP payload of a response block (empty for requests).
    pub fn payload(&self) -> &[u8] {
        split_http_block(&self.block).1
    }

    pub fn verify_payload_digest(&self) -> DigestCheck {
        let Some(stored) = self.header(HEADER_PAYLOAD_DIGEST) else {
            return DigestCheck::Missing;
        };
        let Some((algorithm, value)) = stored.split_once(':') else {
            return DigestCheck::Unsupported(stored.to_owned());
        };
        let value = value.trim();
        if !algorithm.eq_ignore_ascii_case("sha256") {
            return DigestCheck::Unsupported(algorithm.to_owned());
        }
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return DigestCheck::Unsupported(format!("{algorithm} (not hex encoded)"));
        }

        let computed = sha256_digest(self.payload());
        if computed[7..].eq_ignore_ascii_case(value) {
            DigestCheck::Match
        } else {
            DigestCheck::Mismatch {
                stored: stored.to_owned(),
                computed,
            }
        }
    }
}

/// Start line and header fields of an HTTP message, as stored in a record block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn new(start_line: impl Into<String>) -> Self {
        Self {
            start_line: start_line.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Status code of a response head (`HTTP/1.1 200 OK`).
    pub fn status_code(&self) -> Option<u16> {
        self.start_line.split_whitespace().nth(1)?.parse().ok()
    }

    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
        let start_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| anyhow::anyhow!("http block without start line"))?
            .to_owned();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_owned(), value.trim().to_owned()));
            }
        }

        Ok(Self {
            start_line,
            headers,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.start_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Builds the warcinfo block: `key: value` lines joined by CRLF.
pub fn warc_fields(fields: &[(&str, String)]) -> Vec<u8> {
    fields
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\r\n")
        .into_bytes()
}

pub fn sha256_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("sha256:{}", hex::encode(digest))
}

fn split_http_block(block: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = block.windows(4).position(|w| w == b"\r\n\r\n") {
        return (&block[..pos + 4], &block[pos + 4..]);
    }
    if let Some(pos) = block.windows(2).position(|w| w == b"\n\n") {
        return (&block[..pos + 2], &block[pos + 2..]);
    }
    (block, &[])
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn new_record_id() -> String {
    format!("<urn:uuid:{}>", uuid::Uuid::new_v4())
}

fn warc_date_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
