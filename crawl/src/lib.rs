use regex::Regex;
use url::Url;
use webarchive_common::HttpRequest;
use webarchive_warc::CdxjRecord;

pub mod exporter;
pub mod replay;

pub use exporter::WaczExporter;
pub use replay::{ReplayOutcome, SkipReason, WaczReplayMiddleware};

/// What the engine needs to know about the crawl it is embedded in.
#[derive(Clone, Debug)]
pub struct SpiderProfile {
    /// Doubles as the collection name on the export side.
    pub name: String,
    /// Hosts considered on-site for archive-driven crawls; empty allows all.
    pub allowed_domains: Vec<String>,
    /// Optional allow-filter applied to archived URLs.
    pub archive_filter: Option<Regex>,
    /// Recorded into the warcinfo `robots` field.
    pub robots_obey: bool,
}

impl SpiderProfile {
    pub fn new(name: impl Into<String>) -> SpiderProfile {
        SpiderProfile {
            name: name.into(),
            allowed_domains: Vec::new(),
            archive_filter: None,
            robots_obey: true,
        }
    }
}

/// A request travelling through the replay path, optionally carrying the
/// index entry it was synthesized from and a skip flag set during
/// archive-driven iteration.
#[derive(Clone, Debug)]
pub struct CrawlRequest {
    pub request: HttpRequest,
    pub cdxj: Option<CdxjRecord>,
    pub skip: Option<SkipReason>,
}

impl CrawlRequest {
    pub fn get(url: Url) -> CrawlRequest {
        CrawlRequest {
            request: HttpRequest::get(url),
            cdxj: None,
            skip: None,
        }
    }
}
