use std::fs;
use std::path::{Path, PathBuf};

use url::Url;
use webarchive_common::{Error, Result, Settings};

use crate::fetch::build_bucket;
use crate::uri::{file_uri_to_path, is_uri_directory};

/// The only capability the packager needs from its destination.
pub trait FileStore: Send + Sync {
    /// Persists `bytes` under `name`, returning the resulting URI.
    fn persist_file(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Writes into a directory via a temp sibling + rename, so a crash never
/// leaves a half-written WACZ under the final name.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<LocalFileStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(LocalFileStore { dir })
    }
}

impl FileStore for LocalFileStore {
    fn persist_file(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let target = self.dir.join(name);
        let scratch = self.dir.join(format!(".{name}.tmp"));

        fs::write(&scratch, bytes)?;
        if let Err(err) = fs::rename(&scratch, &target) {
            let _ = fs::remove_file(&scratch);
            return Err(err.into());
        }

        Ok(format!("file://{}", target.display()))
    }
}

pub struct S3FileStore {
    bucket: s3::Bucket,
    bucket_name: String,
    prefix: String,
}

impl S3FileStore {
    pub fn new(bucket_name: &str, prefix: &str, settings: &Settings) -> Result<S3FileStore> {
        Ok(S3FileStore {
            bucket: build_bucket(bucket_name, &settings.s3, settings.wacz_timeout)?,
            bucket_name: bucket_name.to_owned(),
            prefix: prefix.trim_matches('/').to_owned(),
        })
    }
}

impl FileStore for S3FileStore {
    fn persist_file(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let key = if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{name}", self.prefix)
        };

        let response = self
            .bucket
            .put_object_blocking(&key, bytes)
            .map_err(Error::transport)?;

        if response.status_code() != 200 {
            return Err(Error::transport(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "PUT s3://{}/{key} returned {}",
                    self.bucket_name,
                    response.status_code()
                ),
            )));
        }

        Ok(format!("s3://{}/{key}", self.bucket_name))
    }
}

/// Resolves an `export_uri` into a store plus, when the URI names a file
/// rather than a directory, the explicit output filename that wins over the
/// generated `<collection>-<timestamp>.wacz` one.
pub fn store_for_uri(
    uri: &str,
    settings: &Settings,
) -> Result<(Box<dyn FileStore>, Option<String>)> {
    if uri.starts_with("s3://") {
        let parsed =
            Url::parse(uri).map_err(|_| Error::UnsupportedUri(uri.to_owned()))?;
        let bucket = parsed
            .host_str()
            .ok_or_else(|| Error::UnsupportedUri(uri.to_owned()))?;
        let path = parsed.path().trim_matches('/');

        let (prefix, explicit) = split_target(path, uri);
        return Ok((
            Box::new(S3FileStore::new(bucket, &prefix, settings)?),
            explicit,
        ));
    }

    if uri.starts_with("gs://") || uri.starts_with("ftp://") {
        return Err(Error::UnsupportedUri(uri.to_owned()));
    }

    let path = file_uri_to_path(uri);
    if is_uri_directory(uri) {
        return Ok((Box::new(LocalFileStore::new(path)?), None));
    }

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned);
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok((Box::new(LocalFileStore::new(dir)?), name))
}

fn split_target(path: &str, uri: &str) -> (String, Option<String>) {
    if is_uri_directory(uri) {
        (path.to_owned(), None)
    } else {
        match path.rsplit_once('/') {
            Some((prefix, name)) => (prefix.to_owned(), Some(name.to_owned())),
            None => (String::new(), Some(path.to_owned())),
        }
    }
}
