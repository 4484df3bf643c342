use tempfile::TempDir;
use time::OffsetDateTime;
use webarchive_common::{Error, HttpRequest, HttpResponse, Result, Settings, Stats};
use webarchive_wacz::{store_for_uri, FileStore, WaczPackager};
use webarchive_warc::WarcWriter;

const SOFTWARE: &str = concat!("webarchive/", env!("CARGO_PKG_VERSION"));

const RESPONSE_WRITTEN: &str = "webarchive/exporter/response_written";
const REQUEST_WRITTEN: &str = "webarchive/exporter/request_written";
const STATUS_COUNT_PREFIX: &str = "webarchive/exporter/writer_status_count/";

/// Write-path middleware: observes each downloaded response, records the
/// response/request pair into the crawl's WARC, and packages everything as a
/// WACZ when the spider closes.
pub struct WaczExporter {
    stats: Stats,
    collection: String,
    robots_obey: bool,
    title: Option<String>,
    description: Option<String>,
    store: Box<dyn FileStore>,
    explicit_fname: Option<String>,
    scratch: TempDir,
    writer: Option<WarcWriter>,
}

impl WaczExporter {
    /// Not-configured when `export_uri` is absent, so the host can suppress
    /// this middleware entirely.
    pub fn from_settings(
        settings: &Settings,
        stats: Stats,
        spider: &crate::SpiderProfile,
    ) -> Result<WaczExporter> {
        let export_uri = settings.export_uri.as_deref().ok_or(Error::NotConfigured)?;
        let (store, explicit_fname) = store_for_uri(export_uri, settings)?;

        Ok(WaczExporter {
            stats,
            collection: spider.name.clone(),
            robots_obey: spider.robots_obey,
            title: settings.wacz_title.clone(),
            description: settings.wacz_description.clone(),
            store,
            explicit_fname,
            scratch: tempfile::tempdir()?,
            writer: None,
        })
    }

    /// Opens the crawl's WARC and stamps the leading warcinfo record.
    pub fn spider_opened(&mut self) -> Result<()> {
        let mut writer = WarcWriter::create(self.scratch.path(), &self.collection)?;
        writer.write_warcinfo(SOFTWARE, self.robots_obey)?;

        tracing::info!(warc = writer.filename(), "opened WARC for crawl");
        self.writer = Some(writer);

        Ok(())
    }

    /// Records one downloaded pair: the response first, then the request
    /// carrying `WARC-Concurrent-To`, both under one date.
    pub fn response_received(
        &mut self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConfigured)?;
        let date = OffsetDateTime::now_utc();

        let response_id = writer.write_response(response, date)?;
        self.stats.inc(RESPONSE_WRITTEN);
        self.stats
            .inc(&format!("{STATUS_COUNT_PREFIX}{}", response.status.as_u16()));

        writer.write_request(request, date, &response_id)?;
        self.stats.inc(REQUEST_WRITTEN);

        Ok(())
    }

    /// Packages the WARC into a WACZ and persists it; returns the stored URI.
    pub fn spider_closed(&mut self) -> Result<String> {
        let writer = self.writer.take().ok_or(Error::NotConfigured)?;

        WaczPackager::new(
            self.store.as_ref(),
            writer.path(),
            &self.collection,
            self.title.clone(),
            self.description.clone(),
            self.explicit_fname.clone(),
        )
        .create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpiderProfile;
    use http::{HeaderMap, StatusCode, Version};
    use url::Url;

    fn pair(url: &str) -> (HttpRequest, HttpResponse) {
        let url = Url::parse(url).unwrap();
        (
            HttpRequest::get(url.clone()),
            HttpResponse {
                url,
                status: StatusCode::OK,
                version: Version::HTTP_11,
                headers: HeaderMap::new(),
                body: b"<html>hello</html>".to_vec(),
            },
        )
    }

    #[test]
    fn missing_export_uri_is_not_configured() {
        let result = WaczExporter::from_settings(
            &Settings::default(),
            Stats::new(),
            &SpiderProfile::new("quotes"),
        );
        assert!(matches!(result, Err(Error::NotConfigured)));
    }

    #[test]
    fn full_export_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            export_uri: Some(format!("{}/wacz/", dir.path().display())),
            ..Settings::default()
        };
        let stats = Stats::new();

        let mut exporter =
            WaczExporter::from_settings(&settings, stats.clone(), &SpiderProfile::new("quotes"))
                .unwrap();
        exporter.spider_opened().unwrap();

        let (request, response) = pair("https://quotes.toscrape.com/");
        exporter.response_received(&request, &response).unwrap();

        let uri = exporter.spider_closed().unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(".wacz"));

        assert_eq!(stats.get("webarchive/exporter/response_written"), 1);
        assert_eq!(stats.get("webarchive/exporter/request_written"), 1);
        assert_eq!(stats.get("webarchive/exporter/writer_status_count/200"), 1);

        // The persisted package replays.
        let wacz = webarchive_wacz::open_wacz(&uri, &settings).unwrap();
        let record = wacz
            .record_for_url("https://quotes.toscrape.com/")
            .unwrap()
            .expect("exported URL should be indexed");
        let replayed = webarchive_warc::transform::response_from_warc(&record)
            .unwrap()
            .unwrap();
        assert_eq!(replayed.status, StatusCode::OK);
        assert_eq!(replayed.body, b"<html>hello</html>");
    }
}
