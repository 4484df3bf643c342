use std::io::Cursor;
use std::sync::Mutex;

use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use time::macros::datetime;
use url::Url;
use webarchive_common::{Error, HttpRequest, HttpResponse, Result};
use webarchive_wacz::{
    FileStore, LocalZipStorage, MultiWaczFile, RangeFetcher, RemoteZipStorage, WaczFile,
    WaczPackager,
};
use webarchive_warc::transform::response_from_warc;
use webarchive_warc::WarcWriter;

/// Captures whatever the packager persists.
#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Option<(String, Vec<u8>)>>,
}

impl RecordingStore {
    fn take(&self) -> (String, Vec<u8>) {
        self.saved
            .lock()
            .unwrap()
            .take()
            .expect("nothing was persisted")
    }
}

impl FileStore for RecordingStore {
    fn persist_file(&self, name: &str, bytes: &[u8]) -> Result<String> {
        *self.saved.lock().unwrap() = Some((name.to_owned(), bytes.to_vec()));
        Ok(format!("mem://{name}"))
    }
}

struct MemFetcher(Vec<u8>);

impl RangeFetcher for MemFetcher {
    fn content_length(&self) -> Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn fetch(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let end = (end + 1).min(self.0.len() as u64);
        if start >= end {
            return Err(Error::ZipCorruption("range out of bounds".to_owned()));
        }
        Ok(self.0[start as usize..end as usize].to_vec())
    }
}

fn crawl_pair(path: &str, body: &str) -> (HttpRequest, HttpResponse) {
    let url = Url::parse(&format!("https://quotes.toscrape.com{path}")).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );

    let response = HttpResponse {
        url: url.clone(),
        status: StatusCode::OK,
        version: Version::HTTP_11,
        headers,
        body: body.as_bytes().to_vec(),
    };
    let request = HttpRequest {
        url,
        method: Method::GET,
        headers: HeaderMap::new(),
        body: Vec::new(),
    };

    (request, response)
}

/// Writes a small crawl and packages it, returning the WACZ bytes.
fn build_wacz(dir: &std::path::Path) -> (String, Vec<u8>) {
    let mut writer = WarcWriter::create(dir, "example").unwrap();
    writer.write_warcinfo("webarchive/0.1.0", true).unwrap();

    let pages = [
        ("/tag/love/", "<html>love quotes</html>"),
        ("/tag/life/", "<html>life quotes</html>"),
    ];
    for (at, (path, body)) in pages.iter().enumerate() {
        let (request, response) = crawl_pair(path, body);
        let date = datetime!(2024-10-07 09:58:44 UTC) + time::Duration::seconds(at as i64);
        let response_id = writer.write_response(&response, date).unwrap();
        writer.write_request(&request, date, &response_id).unwrap();
    }

    let store = RecordingStore::default();
    let packager = WaczPackager::new(
        &store,
        writer.path(),
        "example",
        Some("Testing".to_owned()),
        Some("WACZ generated during a test".to_owned()),
        None,
    );
    packager.create().unwrap();

    store.take()
}

#[test]
fn package_layout_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let (name, bytes) = build_wacz(dir.path());

    assert!(name.starts_with("example-"));
    assert!(name.ends_with(".wacz"));
    assert_eq!(name.len(), "example-".len() + 14 + ".wacz".len());

    let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
    let members: Vec<String> = archive.file_names().map(str::to_owned).collect();
    assert!(members.contains(&"indexes/index.cdxj".to_owned()));
    assert!(members.contains(&"datapackage.json".to_owned()));
    assert!(members
        .iter()
        .any(|member| member.starts_with("archive/") && member.ends_with(".warc.gz")));

    // Every member is STORED, so ranged readers can slice it.
    for at in 0..archive.len() {
        let member = archive.by_index(at).unwrap();
        assert_eq!(member.compression(), zip::CompressionMethod::Stored);
    }

    let manifest: serde_json::Value = {
        let member = archive.by_name("datapackage.json").unwrap();
        serde_json::from_reader(member).unwrap()
    };

    assert_eq!(manifest["profile"], "data-package");
    assert_eq!(manifest["wacz_version"], "1.1.1");
    assert_eq!(manifest["title"], "Testing");
    assert_eq!(
        manifest["mainPageUrl"],
        "https://quotes.toscrape.com/tag/love/"
    );
    assert_eq!(manifest["mainPageDate"], "2024-10-07T09:58:44Z");

    let resources = manifest["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 2);
    for resource in resources {
        let hash = resource["hash"].as_str().unwrap();
        assert!(hash.starts_with("sha256:"));
        assert!(resource["bytes"].as_u64().unwrap() > 0);
    }
}

#[test]
fn replay_lookup_hit_and_miss() {
    let dir = tempfile::tempdir().unwrap();
    let (name, bytes) = build_wacz(dir.path());

    let path = dir.path().join(name);
    std::fs::write(&path, &bytes).unwrap();

    let wacz = WaczFile::open(Box::new(LocalZipStorage::open(&path).unwrap())).unwrap();
    assert_eq!(wacz.index_len(), 2);

    let record = wacz
        .record_for_url("https://quotes.toscrape.com/tag/love/")
        .unwrap()
        .expect("archived URL should resolve");
    let response = response_from_warc(&record).unwrap().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"<html>love quotes</html>");

    assert!(wacz.lookup("http://www.example.com/").is_none());

    let multi = MultiWaczFile::new(vec![wacz]);
    let entry = multi
        .lookup("https://quotes.toscrape.com/tag/life/")
        .unwrap();
    let record = multi.fetch(entry).unwrap().unwrap();
    let response = response_from_warc(&record).unwrap().unwrap();
    assert_eq!(response.body, b"<html>life quotes</html>");
}

#[test]
fn ranged_reader_equals_local_reader() {
    let dir = tempfile::tempdir().unwrap();
    let (name, bytes) = build_wacz(dir.path());

    let path = dir.path().join(name);
    std::fs::write(&path, &bytes).unwrap();

    let local = LocalZipStorage::open(&path).unwrap();
    let remote = RemoteZipStorage::open(MemFetcher(bytes)).unwrap();

    let local_wacz = WaczFile::open(Box::new(local)).unwrap();
    let remote_wacz = WaczFile::open(Box::new(remote)).unwrap();

    for entry in local_wacz.iter_index() {
        let from_local = local_wacz.fetch(entry).unwrap().unwrap();
        let matching = remote_wacz.lookup(entry.url()).unwrap();
        let from_remote = remote_wacz.fetch(matching).unwrap().unwrap();

        assert_eq!(from_local.body, from_remote.body);
        assert_eq!(from_local.record_id(), from_remote.record_id());
    }
}
