use time::OffsetDateTime;
use url::Url;
use webarchive_common::{Error, HttpResponse, Result, Settings, Stats};
use webarchive_wacz::selector::{resolve_source, StrategyRegistry};
use webarchive_wacz::uri::is_uri_directory;
use webarchive_wacz::{open_wacz, MultiWaczFile};
use webarchive_warc::transform::{request_from_cdxj, response_from_warc};

use crate::{CrawlRequest, SpiderProfile};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    OffSite,
    Disallowed,
}

/// What the host should do with a replayed request.
pub enum ReplayOutcome {
    /// Serve this response instead of fetching.
    Response(HttpResponse),
    /// Nothing archived for the URL; serve the synthesized 404.
    NotFound(HttpResponse),
    /// Drop the request without a response.
    Skipped,
}

/// Read-path middleware: opens the configured archives once, then answers
/// requests out of them instead of the live web. A single archive miss never
/// aborts the crawl.
pub struct WaczReplayMiddleware {
    settings: Settings,
    stats: Stats,
    spider: SpiderProfile,
    registry: StrategyRegistry,
    wacz: Option<MultiWaczFile>,
}

impl WaczReplayMiddleware {
    /// Not-configured when `wacz_source_uri` is absent.
    pub fn from_settings(
        settings: &Settings,
        stats: Stats,
        spider: SpiderProfile,
    ) -> Result<WaczReplayMiddleware> {
        if settings.wacz_source_uri.is_none() {
            return Err(Error::NotConfigured);
        }

        Ok(WaczReplayMiddleware {
            settings: settings.clone(),
            stats,
            spider,
            registry: StrategyRegistry::with_defaults(),
            wacz: None,
        })
    }

    /// Swaps in a registry carrying host-registered lookup strategies.
    pub fn with_registry(mut self, registry: StrategyRegistry) -> WaczReplayMiddleware {
        self.registry = registry;
        self
    }

    /// Resolves and opens every configured source. Unopenable archives are
    /// logged and dropped; the middleware carries on with the valid ones.
    pub fn spider_opened(&mut self) -> Result<()> {
        let uris = self.settings.source_uris();
        tracing::info!("found {} WACZ URI(s) to open", uris.len());

        let mut waczs = Vec::new();
        for uri in &uris {
            let resolved = if uri.contains('{') || is_uri_directory(uri) {
                let target = self
                    .settings
                    .wacz_lookup_target
                    .unwrap_or_else(OffsetDateTime::now_utc);

                match resolve_source(
                    uri,
                    &self.spider.name,
                    target,
                    &self.settings.wacz_lookup_strategy,
                    &self.registry,
                    &self.settings,
                )? {
                    Some(resolved) => resolved,
                    None => {
                        tracing::warn!("no archive matched pattern {uri}");
                        continue;
                    }
                }
            } else {
                uri.clone()
            };

            tracing::info!("opening WACZ {resolved}");
            match open_wacz(&resolved, &self.settings) {
                Ok(wacz) => waczs.push(wacz),
                Err(err) => tracing::error!("could not open WACZ {resolved}: {err}"),
            }
        }

        tracing::info!(
            "continuing with {}/{} valid WACZ files",
            waczs.len(),
            uris.len()
        );
        self.wacz = Some(MultiWaczFile::new(waczs));

        Ok(())
    }

    fn wacz(&self) -> Result<&MultiWaczFile> {
        self.wacz.as_ref().ok_or(Error::NotConfigured)
    }

    /// Answers one request from the archive. Requests flagged during
    /// archive-driven iteration are counted and dropped here so the
    /// downloader path filters uniformly.
    pub fn process_request(&self, request: &CrawlRequest) -> Result<ReplayOutcome> {
        if let Some(reason) = request.skip {
            if self.settings.wacz_crawl {
                self.stats.inc("webarchive/crawl_skip");
                self.stats.inc(match reason {
                    SkipReason::OffSite => "webarchive/crawl_skip/off_site",
                    SkipReason::Disallowed => "webarchive/crawl_skip/disallowed",
                });
                return Ok(ReplayOutcome::Skipped);
            }
        }

        let wacz = self.wacz()?;
        let record = match &request.cdxj {
            Some(entry) => wacz.fetch(entry)?,
            None => wacz.record_for_url(request.request.url.as_str())?,
        };

        let Some(record) = record else {
            self.stats.inc("webarchive/response_not_found");
            return Ok(ReplayOutcome::NotFound(HttpResponse::not_found(
                request.request.url.clone(),
            )));
        };

        match response_from_warc(&record) {
            Ok(Some(response)) => {
                self.stats.inc("webarchive/hit");
                Ok(ReplayOutcome::Response(response))
            }
            Ok(None)
            | Err(Error::UnsupportedRecordType(_))
            | Err(Error::UnsupportedContentType(_)) => {
                self.stats.inc("webarchive/response_not_recognized");
                Ok(ReplayOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }

    /// Archive-driven crawl: one request per index entry, each carrying its
    /// CDXJ record. Off-site and filtered entries are yielded flagged rather
    /// than silently dropped, so the request path observes every skip.
    pub fn iter_start_requests(&self) -> Result<impl Iterator<Item = CrawlRequest> + '_> {
        let wacz = self.wacz()?;

        Ok(wacz.iter_index().filter_map(move |entry| {
            let request = match request_from_cdxj(entry) {
                Ok(request) => request,
                Err(err) => {
                    tracing::warn!("skipping index entry: {err}");
                    return None;
                }
            };

            self.stats.inc("webarchive/start_request_count");
            let skip = self.skip_reason(&request.url);

            Some(CrawlRequest {
                request,
                cdxj: Some(entry.clone()),
                skip,
            })
        }))
    }

    fn skip_reason(&self, url: &Url) -> Option<SkipReason> {
        let host = url.host_str().unwrap_or_default();
        if !self.spider.allowed_domains.is_empty()
            && !self.spider.allowed_domains.iter().any(|domain| domain == host)
        {
            return Some(SkipReason::OffSite);
        }

        if let Some(filter) = &self.spider.archive_filter {
            if !filter.is_match(url.as_str()) {
                return Some(SkipReason::Disallowed);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WaczExporter;
    use http::{HeaderMap, HeaderValue, StatusCode, Version};
    use regex::Regex;
    use webarchive_common::HttpRequest;

    /// Crawls two pages into a packaged WACZ, returning its URI.
    fn exported_wacz(dir: &std::path::Path, stats: &Stats) -> String {
        let settings = Settings {
            export_uri: Some(format!("{}/wacz/", dir.display())),
            ..Settings::default()
        };

        let mut exporter =
            WaczExporter::from_settings(&settings, stats.clone(), &SpiderProfile::new("quotes"))
                .unwrap();
        exporter.spider_opened().unwrap();

        for (url, body) in [
            ("https://quotes.toscrape.com/tag/love/", "<html>love</html>"),
            ("https://quotes.toscrape.com/tag/life/", "<html>life</html>"),
        ] {
            let url = Url::parse(url).unwrap();
            let mut headers = HeaderMap::new();
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/html"),
            );
            let response = HttpResponse {
                url: url.clone(),
                status: StatusCode::OK,
                version: Version::HTTP_11,
                headers,
                body: body.as_bytes().to_vec(),
            };
            exporter
                .response_received(&HttpRequest::get(url), &response)
                .unwrap();
        }

        exporter.spider_closed().unwrap()
    }

    fn open_middleware(
        uri: &str,
        stats: Stats,
        spider: SpiderProfile,
        wacz_crawl: bool,
    ) -> WaczReplayMiddleware {
        let settings = Settings {
            wacz_source_uri: Some(uri.to_owned()),
            wacz_crawl,
            ..Settings::default()
        };
        let mut middleware =
            WaczReplayMiddleware::from_settings(&settings, stats, spider).unwrap();
        middleware.spider_opened().unwrap();
        middleware
    }

    #[test]
    fn missing_source_uri_is_not_configured() {
        let result = WaczReplayMiddleware::from_settings(
            &Settings::default(),
            Stats::new(),
            SpiderProfile::new("quotes"),
        );
        assert!(matches!(result, Err(Error::NotConfigured)));
    }

    #[test]
    fn replay_hit_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Stats::new();
        let uri = exported_wacz(dir.path(), &stats);

        let middleware = open_middleware(&uri, stats.clone(), SpiderProfile::new("quotes"), false);

        let hit = middleware
            .process_request(&CrawlRequest::get(
                Url::parse("https://quotes.toscrape.com/tag/love/").unwrap(),
            ))
            .unwrap();
        match hit {
            ReplayOutcome::Response(response) => {
                assert_eq!(response.status, StatusCode::OK);
                assert_eq!(response.body, b"<html>love</html>");
            }
            _ => panic!("expected an archived response"),
        }

        let miss = middleware
            .process_request(&CrawlRequest::get(
                Url::parse("http://www.example.com/").unwrap(),
            ))
            .unwrap();
        match miss {
            ReplayOutcome::NotFound(response) => {
                assert_eq!(response.status, StatusCode::NOT_FOUND)
            }
            _ => panic!("expected a synthesized 404"),
        }

        assert_eq!(stats.get("webarchive/hit"), 1);
        assert_eq!(stats.get("webarchive/response_not_found"), 1);
    }

    #[test]
    fn archive_driven_crawl_flags_and_counts_skips() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Stats::new();
        let uri = exported_wacz(dir.path(), &stats);

        let mut spider = SpiderProfile::new("quotes");
        spider.allowed_domains = vec!["quotes.toscrape.com".to_owned()];
        spider.archive_filter = Some(Regex::new(r"/tag/love/").unwrap());

        let middleware = open_middleware(&uri, stats.clone(), spider, true);

        let requests: Vec<CrawlRequest> =
            middleware.iter_start_requests().unwrap().collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(stats.get("webarchive/start_request_count"), 2);

        let love = requests
            .iter()
            .find(|request| request.request.url.path() == "/tag/love/")
            .unwrap();
        assert!(love.skip.is_none());
        assert!(love.cdxj.is_some());

        let life = requests
            .iter()
            .find(|request| request.request.url.path() == "/tag/life/")
            .unwrap();
        assert_eq!(life.skip, Some(SkipReason::Disallowed));

        // Flagged entries drop at the request path with skip accounting.
        match middleware.process_request(life).unwrap() {
            ReplayOutcome::Skipped => {}
            _ => panic!("flagged request should be skipped"),
        }
        assert_eq!(stats.get("webarchive/crawl_skip"), 1);
        assert_eq!(stats.get("webarchive/crawl_skip/disallowed"), 1);

        // Unflagged entries replay through their attached index entry.
        match middleware.process_request(love).unwrap() {
            ReplayOutcome::Response(response) => {
                assert_eq!(response.body, b"<html>love</html>")
            }
            _ => panic!("expected an archived response"),
        }
    }
}
