use std::io;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use url::Url;
use webarchive_common::{Error, Result, S3Settings};

use crate::storage::RangeFetcher;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// One retry with a short pause, then the transport error propagates.
fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!("retrying after transport error: {first}");
            std::thread::sleep(RETRY_BACKOFF);
            op().map_err(|_second| first)
        }
    }
}

fn transport_failure(message: String) -> Error {
    Error::transport(io::Error::new(io::ErrorKind::Other, message))
}

/// Ranged GETs over plain HTTP(S).
pub struct HttpRangeFetcher {
    client: Client,
    url: Url,
}

impl HttpRangeFetcher {
    pub fn new(url: &str, timeout: Duration) -> Result<HttpRangeFetcher> {
        let url = Url::parse(url).map_err(|_| Error::UnsupportedUri(url.to_owned()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::transport)?;

        Ok(HttpRangeFetcher { client, url })
    }
}

impl RangeFetcher for HttpRangeFetcher {
    fn content_length(&self) -> Result<u64> {
        with_retry(|| {
            let response = self
                .client
                .head(self.url.clone())
                .send()
                .map_err(Error::transport)?;

            if !response.status().is_success() {
                return Err(transport_failure(format!(
                    "HEAD {} returned {}",
                    self.url,
                    response.status()
                )));
            }

            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| {
                    transport_failure(format!("HEAD {} returned no content length", self.url))
                })
        })
    }

    fn fetch(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        with_retry(|| {
            let response = self
                .client
                .get(self.url.clone())
                .header(RANGE, format!("bytes={start}-{end}"))
                .send()
                .map_err(Error::transport)?;

            if !response.status().is_success() {
                return Err(transport_failure(format!(
                    "GET {} bytes={start}-{end} returned {}",
                    self.url,
                    response.status()
                )));
            }

            Ok(response.bytes().map_err(Error::transport)?.to_vec())
        })
    }
}

/// Ranged object reads against S3 (or any S3-compatible endpoint).
pub struct S3RangeFetcher {
    bucket: s3::Bucket,
    key: String,
}

impl S3RangeFetcher {
    pub fn new(uri: &str, settings: &S3Settings, timeout: Duration) -> Result<S3RangeFetcher> {
        let parsed = Url::parse(uri).map_err(|_| Error::UnsupportedUri(uri.to_owned()))?;
        if parsed.scheme() != "s3" {
            return Err(Error::UnsupportedUri(uri.to_owned()));
        }

        let bucket_name = parsed
            .host_str()
            .ok_or_else(|| Error::UnsupportedUri(uri.to_owned()))?;
        let key = parsed.path().trim_start_matches('/').to_owned();

        Ok(S3RangeFetcher {
            bucket: build_bucket(bucket_name, settings, timeout)?,
            key,
        })
    }
}

impl RangeFetcher for S3RangeFetcher {
    fn content_length(&self) -> Result<u64> {
        with_retry(|| {
            let (head, code) = self
                .bucket
                .head_object_blocking(&self.key)
                .map_err(Error::transport)?;

            if code != 200 {
                return Err(transport_failure(format!(
                    "HEAD s3://{}/{} returned {code}",
                    self.bucket.name(),
                    self.key
                )));
            }

            head.content_length
                .and_then(|length| u64::try_from(length).ok())
                .ok_or_else(|| {
                    transport_failure(format!(
                        "HEAD s3://{}/{} returned no content length",
                        self.bucket.name(),
                        self.key
                    ))
                })
        })
    }

    fn fetch(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        with_retry(|| {
            let response = self
                .bucket
                .get_object_range_blocking(&self.key, start, Some(end))
                .map_err(Error::transport)?;

            if response.status_code() != 206 && response.status_code() != 200 {
                return Err(transport_failure(format!(
                    "ranged GET s3://{}/{} returned {}",
                    self.bucket.name(),
                    self.key,
                    response.status_code()
                )));
            }

            Ok(response.bytes().to_vec())
        })
    }
}

/// Shared bucket construction for fetchers, resolvers and stores.
pub(crate) fn build_bucket(
    name: &str,
    settings: &S3Settings,
    timeout: Duration,
) -> Result<s3::Bucket> {
    let region = match (&settings.endpoint, &settings.region) {
        (Some(endpoint), region) => s3::Region::Custom {
            region: region.clone().unwrap_or_default(),
            endpoint: endpoint.clone(),
        },
        (None, Some(region)) => s3::Region::Custom {
            region: region.clone(),
            endpoint: format!("https://s3.{region}.amazonaws.com"),
        },
        (None, None) => s3::Region::UsEast1,
    };

    let credentials = s3::creds::Credentials {
        access_key: settings.access_key.clone(),
        secret_key: settings.secret_key.clone(),
        security_token: None,
        session_token: settings.session_token.clone(),
        expiration: None,
    };

    let bucket = s3::Bucket::new(name, region, credentials).map_err(Error::transport)?;
    let bucket = if settings.endpoint.is_some() {
        bucket.with_path_style()
    } else {
        bucket
    };

    bucket.with_request_timeout(timeout).map_err(Error::transport)
}
