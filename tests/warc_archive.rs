mod portal_stub;

use std::io::Write as _;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use portalcrawl::error::ArchiveError;
use portalcrawl::warc::{ReaderOptions, WarcReader, WarcRecord};
use portal_stub::{open_cache, pair};

const LENIENT: ReaderOptions = ReaderOptions {
    strict: false,
    check_digest: false,
};

fn info() -> WarcRecord {
    WarcRecord::warcinfo("test.warc.gz", b"software: test\r\n".to_vec())
}

fn write_records(path: &Path, records: &[WarcRecord], gzip: bool) -> anyhow::Result<()> {
    let blocks = records.iter().map(WarcRecord::to_bytes).collect::<Vec<_>>();
    write_blocks(path, &blocks, gzip)
}

fn write_blocks(path: &Path, blocks: &[Vec<u8>], gzip: bool) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for block in blocks {
        if gzip {
            let mut encoder = GzEncoder::new(&mut file, Compression::default());
            encoder.write_all(block)?;
            encoder.finish()?;
        } else {
            file.write_all(block)?;
        }
    }
    Ok(())
}

/// The whole file as one gzip stream instead of a member per record.
fn write_single_stream(path: &Path, records: &[WarcRecord]) -> anyhow::Result<()> {
    let mut encoder = GzEncoder::new(std::fs::File::create(path)?, Compression::default());
    for record in records {
        encoder.write_all(&record.to_bytes())?;
    }
    encoder.finish()?;
    Ok(())
}

fn replace_once(bytes: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let at = bytes
        .windows(from.len())
        .position(|window| window == from)
        .expect("pattern present");
    [&bytes[..at], to, &bytes[at + from.len()..]].concat()
}

#[test]
fn duplicate_urls_fail_strict_and_keep_the_last_when_lenient() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("dup.warc.gz");
    let (req1, resp1) = pair("https://x/a", "first");
    let (req2, resp2) = pair("https://x/a", "second");
    write_records(&path, &[info(), req1, resp1, req2, resp2], true)?;

    let err = WarcReader::open(&path, ReaderOptions::default()).expect_err("duplicates");
    match err.downcast_ref::<ArchiveError>() {
        Some(ArchiveError::DuplicateUrls { duplicates, .. }) => {
            assert_eq!(duplicates, &[("https://x/a".to_owned(), 2)]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let reader = WarcReader::open(&path, LENIENT)?;
    assert_eq!(reader.download_url("https://x/a")?.as_deref(), Some("second"));
    Ok(())
}

#[test]
fn unpaired_request_is_corruption() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("broken.warc.gz");
    let (req1, _) = pair("https://x/a", "lost");
    let (req2, resp2) = pair("https://x/b", "kept");
    write_records(&path, &[info(), req1, req2, resp2], true)?;

    let err = WarcReader::open(&path, ReaderOptions::default()).expect_err("corrupt");
    assert!(matches!(
        err.downcast_ref::<ArchiveError>(),
        Some(ArchiveError::Corrupt { .. })
    ));

    let reader = WarcReader::open(&path, LENIENT)?;
    assert!(!reader.contains("https://x/a"));
    assert_eq!(reader.download_url("https://x/b")?.as_deref(), Some("kept"));
    Ok(())
}

#[test]
fn archive_without_responses_is_empty_in_both_modes() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("empty.warc.gz");
    write_records(&path, &[info()], true)?;

    for options in [ReaderOptions::default(), LENIENT] {
        let err = WarcReader::open(&path, options).expect_err("empty");
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::Empty(_))
        ));
    }
    Ok(())
}

#[test]
fn uncompressed_archives_are_readable() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("plain.warc");
    let (request, response) = pair("https://x/a", "plain text");
    write_records(&path, &[info(), request, response], false)?;

    let reader = WarcReader::open(&path, ReaderOptions::default())?;
    assert!(!reader.is_compressed());
    assert_eq!(reader.info_block(), b"software: test\r\n");
    assert_eq!(reader.download_url("https://x/a")?.as_deref(), Some("plain text"));
    Ok(())
}

#[test]
fn single_stream_gzip_archives_are_indexed_and_copied_forward() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("whole.warc.gz");
    let (req_a, resp_a) = pair("https://x/a", "page a");
    let (req_b, resp_b) = pair("https://x/b", "page b");
    write_single_stream(&path, &[info(), req_a, resp_a, req_b, resp_b])?;

    let reader = WarcReader::open(&path, ReaderOptions::default())?;
    assert!(reader.is_compressed());
    assert_eq!(reader.len(), 2);
    assert_eq!(reader.info_block(), b"software: test\r\n");
    assert_eq!(reader.download_url("https://x/b")?.as_deref(), Some("page b"));
    let entry = reader.entry("https://x/a").expect("indexed url");
    assert!(entry.response.within_member.is_some());
    assert_eq!(reader.get_record_at(entry.request)?.target_uri(), Some("https://x/a"));

    let mut cache = open_cache(&[&path], &temp.path().join("new.warc.gz"), None)?;
    assert_eq!(cache.fetch("https://x/a", false)?.as_deref(), Some("page a"));
    let copied = WarcReader::open(cache.finish()?, ReaderOptions::default())?;
    assert_eq!(copied.urls().collect::<Vec<_>>(), ["https://x/a"]);
    assert_eq!(copied.download_url("https://x/a")?.as_deref(), Some("page a"));
    assert_eq!(copied.entry("https://x/a").expect("copied").response.within_member, None);
    Ok(())
}

#[test]
fn tampered_payload_fails_strict_and_is_served_when_lenient() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("tampered.warc.gz");
    let (request, response) = pair("https://x/a", "original");
    let response = replace_once(&response.to_bytes(), b"original", b"modified");
    write_blocks(&path, &[info().to_bytes(), request.to_bytes(), response], true)?;

    let strict = WarcReader::open(
        &path,
        ReaderOptions {
            strict: true,
            check_digest: true,
        },
    )?;
    let err = strict.download_url("https://x/a").expect_err("digest mismatch");
    assert!(matches!(
        err.downcast_ref::<ArchiveError>(),
        Some(ArchiveError::DigestMismatch { .. })
    ));

    let lenient = WarcReader::open(
        &path,
        ReaderOptions {
            strict: false,
            check_digest: true,
        },
    )?;
    assert_eq!(lenient.download_url("https://x/a")?.as_deref(), Some("modified"));

    let unchecked = WarcReader::open(&path, ReaderOptions::default())?;
    assert_eq!(unchecked.download_url("https://x/a")?.as_deref(), Some("modified"));
    Ok(())
}

#[test]
fn archive_must_start_with_warcinfo_when_strict() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("headless.warc.gz");
    let (request, response) = pair("https://x/a", "no info");
    write_records(&path, &[request, response], true)?;

    let err = WarcReader::open(&path, ReaderOptions::default()).expect_err("missing warcinfo");
    assert!(matches!(
        err.downcast_ref::<ArchiveError>(),
        Some(ArchiveError::MissingInfoRecord(_))
    ));

    let reader = WarcReader::open(&path, LENIENT)?;
    assert!(reader.info_block().is_empty());
    assert_eq!(reader.download_url("https://x/a")?.as_deref(), Some("no info"));
    Ok(())
}
