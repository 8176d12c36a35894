#![forbid(unsafe_code)]

pub mod archive_crawler;
pub mod article_crawler;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod encoding;
pub mod error;
pub mod fetch;
pub mod inspect;
pub mod logging;
pub mod pagination;
pub mod portal;
pub mod urls;
pub mod warc;
