mod portal_stub;

use std::collections::HashSet;
use std::sync::Arc;

use portalcrawl::archive_crawler::ArchiveCrawler;
use portalcrawl::article_crawler::{ArticleCrawler, ArticleOutputs};
use portalcrawl::error::FetchError;
use portal_stub::{MapFetcher, SharedSink, config, open_cache, set, stub_extractor};

const STATIC_SITE: &str = r#"
site_name: stub
extractor: stub
base_url: https://x/
columns:
  - name: all
    url: https://x/archive
"#;

fn ok_urls(urls: &[&str]) -> Vec<anyhow::Result<String>> {
    urls.iter().map(|url| Ok((*url).to_owned())).collect()
}

#[test]
fn followed_links_are_not_requeued_once_good() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let live = MapFetcher::new(
        &[
            ("https://x/a", "follow https://x/b\n"),
            ("https://x/b", "follow https://x/a\nfollow https://x/c\n"),
            ("https://x/c", "follow https://x/b\n"),
        ],
        5,
    );
    let sink = SharedSink::default();
    let cache = open_cache(&[], &temp.path().join("articles.warc.gz"), live.boxed())?;
    let mut crawler = ArticleCrawler::new(
        config(STATIC_SITE),
        stub_extractor(),
        cache,
        Arc::new(HashSet::new()),
        Box::new(sink.clone()),
    );

    crawler.run(ok_urls(&["https://x/a", "https://x/b"]))?;
    assert_eq!(crawler.queued_len(), 0);
    assert_eq!(live.calls(), ["https://x/a", "https://x/b", "https://x/c"]);
    assert_eq!(
        sink.lines(),
        ["stub https://x/a", "stub https://x/b", "stub https://x/c"]
    );
    let stats = crawler.stats();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.followed, 2);
    crawler.finish()?;
    Ok(())
}

#[test]
fn known_and_bad_urls_are_skipped() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let live = MapFetcher::new(&[("https://x/new", "hello\n")], 5);
    let sink = SharedSink::default();
    let cache = open_cache(&[], &temp.path().join("articles.warc.gz"), live.boxed())?;
    let mut crawler = ArticleCrawler::new(
        config(STATIC_SITE),
        stub_extractor(),
        cache,
        Arc::new(set(&["https://x/known"])),
        Box::new(sink.clone()),
    );

    crawler.run(ok_urls(&["https://x/known", "https://x/new", "https://x/new"]))?;
    assert_eq!(live.calls(), ["https://x/new"]);
    assert_eq!(crawler.stats().skipped, 2);
    crawler.finish()?;
    Ok(())
}

#[test]
fn date_filter_drops_articles_outside_the_range() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let live = MapFetcher::new(
        &[
            ("https://x/in", "date 2024-01-15\n"),
            ("https://x/out", "date 2023-12-31\n"),
            ("https://x/undated", "no date\n"),
            ("https://x/other", "noscheme\n"),
        ],
        5,
    );
    let sink = SharedSink::default();
    let config = config(
        r#"
site_name: stub
extractor: stub
base_url: https://x/
columns:
  - name: all
    url: https://x/#year/#month
archive_page_urls_by_date: true
filter_articles_by_date: true
date_from: 2024-01-01
date_until: 2024-02-01
"#,
    );
    let cache = open_cache(&[], &temp.path().join("articles.warc.gz"), live.boxed())?;
    let mut crawler = ArticleCrawler::new(
        config,
        stub_extractor(),
        cache,
        Arc::new(HashSet::new()),
        Box::new(sink.clone()),
    );

    crawler.run(ok_urls(&[
        "https://x/in",
        "https://x/out",
        "https://x/undated",
        "https://x/other",
    ]))?;
    assert_eq!(sink.lines(), ["stub https://x/in", "stub https://x/undated"]);
    let stats = crawler.stats();
    assert_eq!(stats.out_of_range, 1);
    assert_eq!(stats.unknown_scheme, 1);
    crawler.finish()?;
    Ok(())
}

#[test]
fn error_threshold_aborts_after_two_problematic_articles() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let archive_live = MapFetcher::new(
        &[(
            "https://x/archive",
            "article https://x/1\narticle https://x/2\narticle https://x/3\narticle https://x/4\n",
        )],
        2,
    );
    let article_live = MapFetcher::new(&[("https://x/4", "fine\n")], 2);
    let config = config(STATIC_SITE);
    let known = Arc::new(HashSet::new());

    let archive_cache = open_cache(&[], &temp.path().join("archive.warc.gz"), archive_live.boxed())?;
    let mut archive = ArchiveCrawler::new(
        Arc::clone(&config),
        stub_extractor(),
        archive_cache,
        Arc::clone(&known),
    );
    let problematic_file = temp.path().join("problematic.txt");
    let good_file = temp.path().join("good.txt");
    let article_cache = open_cache(&[], &temp.path().join("articles.warc.gz"), article_live.boxed())?;
    let mut articles = ArticleCrawler::new(
        config,
        stub_extractor(),
        article_cache,
        known,
        Box::new(SharedSink::default()),
    )
    .with_outputs(ArticleOutputs {
        new_good_urls: Some(good_file.clone()),
        new_problematic_urls: Some(problematic_file.clone()),
    });

    let err = articles
        .run(archive.url_iterator())
        .expect_err("third failure exceeds the budget");
    assert!(matches!(
        err.downcast_ref::<FetchError>(),
        Some(FetchError::ErrorBudgetExceeded { count: 3, limit: 2 })
    ));
    assert_eq!(articles.problematic_urls().len(), 2);
    assert_eq!(article_live.call_count("https://x/4"), 0);

    archive.finish()?;
    articles.finish()?;
    assert_eq!(
        std::fs::read_to_string(problematic_file)?,
        "https://x/1\nhttps://x/2\n"
    );
    assert_eq!(std::fs::read_to_string(good_file)?, "");
    Ok(())
}
