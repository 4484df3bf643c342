use std::cmp::Ordering;

use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

/// An HTTP request as the crawler host hands it to us, or as we synthesize it
/// from an index entry when replaying.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: Url) -> HttpRequest {
        HttpRequest {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// An HTTP response, either downloaded by the host or decoded back out of a
/// WARC record.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub url: Url,
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// The stand-in for a URL that has no record in any open archive.
    pub fn not_found(url: Url) -> HttpResponse {
        HttpResponse {
            url,
            status: StatusCode::NOT_FOUND,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// A candidate archive file surfaced by a resolver, ordered by modification
/// time so lookup strategies can pick the closest one to a target instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub uri: String,
    /// Unix epoch seconds.
    pub last_modified: i64,
}

impl FileInfo {
    pub fn new(uri: impl Into<String>, last_modified: i64) -> FileInfo {
        FileInfo {
            uri: uri.into(),
            last_modified,
        }
    }
}

impl Ord for FileInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.last_modified, &self.uri).cmp(&(other.last_modified, &other.uri))
    }
}

impl PartialOrd for FileInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
