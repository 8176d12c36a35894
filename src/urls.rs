use std::collections::{BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead as _, BufReader, BufWriter, Write as _};
use std::path::Path;

use anyhow::Context as _;

/// Reads a one-url-per-line side file. Blank lines and `#` comments are skipped.
pub fn read_url_file(path: &Path) -> anyhow::Result<HashSet<String>> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open url file: {}", path.display()))?;

    let mut urls = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read url file: {}", path.display()))?;
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        urls.insert(url.to_owned());
    }

    tracing::debug!(path = %path.display(), count = urls.len(), "loaded url file");
    Ok(urls)
}

pub fn read_optional_url_file(path: Option<&Path>) -> anyhow::Result<HashSet<String>> {
    match path {
        Some(path) => read_url_file(path),
        None => Ok(HashSet::new()),
    }
}

/// Writes `urls` sorted, one per line, replacing any previous content.
pub fn write_url_file<'a>(
    path: &Path,
    urls: impl IntoIterator<Item = &'a String>,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create url file dir: {}", parent.display()))?;
    }

    let sorted = urls.into_iter().collect::<BTreeSet<_>>();
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("create url file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for url in &sorted {
        writeln!(out, "{url}").with_context(|| format!("write url file: {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush url file: {}", path.display()))?;

    tracing::info!(path = %path.display(), count = sorted.len(), "wrote url file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_file_round_trips_sorted_and_skips_comments() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("nested").join("urls.txt");

        let urls: HashSet<String> = ["https://b.example/2", "https://a.example/1"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        write_url_file(&path, &urls)?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "https://a.example/1\nhttps://b.example/2\n"
        );

        std::fs::write(&path, "# known bad\n\n  https://a.example/1  \n")?;
        let loaded = read_url_file(&path)?;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("https://a.example/1"));
        Ok(())
    }

    #[test]
    fn missing_optional_file_is_empty() -> anyhow::Result<()> {
        assert!(read_optional_url_file(None)?.is_empty());
        Ok(())
    }
}
