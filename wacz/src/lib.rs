use webarchive_common::{Error, Result, Settings};

pub mod fetch;
pub mod reader;
pub mod selector;
pub mod storage;
pub mod store;
pub mod uri;
pub mod writer;
pub mod zip_utils;

pub use reader::{MultiWaczFile, WaczFile};
pub use storage::{LocalZipStorage, RangeFetcher, RemoteZipStorage, ZipStorage};
pub use store::{store_for_uri, FileStore, LocalFileStore, S3FileStore};
pub use writer::{DataPackage, DataPackageEntry, WaczPackager};

pub const WACZ_VERSION: &str = "1.1.1";

/// Opens a WACZ behind whichever storage backend its URI calls for: ranged
/// reads for `s3`/`http(s)`, the local ZIP parser for paths and `file://`.
pub fn open_wacz(source: &str, settings: &Settings) -> Result<WaczFile> {
    let storage: Box<dyn ZipStorage> = if source.starts_with("s3://") {
        let fetcher = fetch::S3RangeFetcher::new(source, &settings.s3, settings.wacz_timeout)?;
        Box::new(RemoteZipStorage::open(fetcher)?)
    } else if source.starts_with("http://") || source.starts_with("https://") {
        let fetcher = fetch::HttpRangeFetcher::new(source, settings.wacz_timeout)?;
        Box::new(RemoteZipStorage::open(fetcher)?)
    } else if source.starts_with("gs://") || source.starts_with("ftp://") {
        return Err(Error::UnsupportedUri(source.to_owned()));
    } else {
        Box::new(LocalZipStorage::open(uri::file_uri_to_path(source))?)
    };

    WaczFile::open(storage)
}
