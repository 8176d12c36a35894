use std::io::Write as _;

use anyhow::Context as _;

use crate::cli::{CatArgs, ListArgs};
use crate::warc::{ReaderOptions, WarcReader};

fn open(path: &std::path::Path, lenient: bool) -> anyhow::Result<WarcReader> {
    WarcReader::open(
        path,
        ReaderOptions {
            strict: !lenient,
            ..ReaderOptions::default()
        },
    )
}

pub fn cat(args: CatArgs) -> anyhow::Result<()> {
    let reader = open(&args.warc, args.lenient)?;
    let text = reader
        .download_url(&args.url)?
        .ok_or_else(|| anyhow::anyhow!("url not found in {}: {}", args.warc.display(), args.url))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes()).context("write page")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

pub fn list(args: ListArgs) -> anyhow::Result<()> {
    let reader = open(&args.warc, args.lenient)?;
    let mut urls = reader.urls().collect::<Vec<_>>();
    urls.sort_unstable();

    let mut stdout = std::io::stdout().lock();
    for url in urls {
        writeln!(stdout, "{url}").context("write url")?;
    }
    stdout.flush().context("flush stdout")?;
    Ok(())
}
