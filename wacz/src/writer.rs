use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use webarchive_common::digest::sha256_as_string;
use webarchive_common::{Error, Result};
use webarchive_warc::cdxj::write_cdxj_index;
use webarchive_warc::record::WarcRecordType;
use webarchive_warc::{WarcReader, TIMESTAMP_FMT};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::store::FileStore;
use crate::WACZ_VERSION;

const CDXJ_FNAME: &str = "index.cdxj";
const DATAPACKAGE_FNAME: &str = "datapackage.json";

#[derive(Serialize)]
pub struct DataPackage {
    pub profile: &'static str,
    pub title: String,
    pub description: String,
    pub created: String,
    pub modified: String,
    pub wacz_version: &'static str,
    pub software: String,
    #[serde(rename = "mainPageUrl", skip_serializing_if = "Option::is_none")]
    pub main_page_url: Option<String>,
    #[serde(rename = "mainPageDate", skip_serializing_if = "Option::is_none")]
    pub main_page_date: Option<String>,
    pub resources: Vec<DataPackageEntry>,
}

#[derive(Serialize, Clone, Debug)]
pub struct DataPackageEntry {
    pub name: String,
    pub path: String,
    pub hash: String,
    pub bytes: u64,
}

/// Assembles a WACZ out of one finished WARC: generates the CDXJ index,
/// streams both into a STORED/ZIP64-capable ZIP, hashes every member, writes
/// the datapackage manifest and hands the result to the file store.
pub struct WaczPackager<'a> {
    store: &'a dyn FileStore,
    warc_path: PathBuf,
    collection: String,
    title: Option<String>,
    description: Option<String>,
    wacz_fname: Option<String>,
}

impl<'a> WaczPackager<'a> {
    pub fn new(
        store: &'a dyn FileStore,
        warc_path: impl AsRef<Path>,
        collection: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        wacz_fname: Option<String>,
    ) -> WaczPackager<'a> {
        WaczPackager {
            store,
            warc_path: warc_path.as_ref().to_path_buf(),
            collection: collection.into(),
            title,
            description,
            wacz_fname,
        }
    }

    /// Packages and persists, returning the stored URI. The scratch WARC is
    /// removed afterwards whether packaging succeeded or not.
    pub fn create(&self) -> Result<String> {
        let result = self.package();

        if let Err(err) = std::fs::remove_file(&self.warc_path) {
            tracing::warn!("could not remove scratch WARC: {err}");
        }

        result
    }

    fn package(&self) -> Result<String> {
        let warc_fname = self
            .warc_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a WARC file path: {}", self.warc_path.display()),
                ))
            })?
            .to_owned();

        let mut cdxj = Vec::new();
        let entries = write_cdxj_index(&mut cdxj, &self.warc_path)?;
        tracing::info!(entries, warc = %warc_fname, "generated CDXJ index");

        let stored = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut package = ZipWriter::new(&mut cursor);

            package
                .start_file(format!("indexes/{CDXJ_FNAME}"), stored)
                .map_err(zip_err)?;
            package.write_all(&cdxj)?;

            package
                .start_file(format!("archive/{warc_fname}"), stored)
                .map_err(zip_err)?;
            let mut warc = File::open(&self.warc_path)?;
            io::copy(&mut warc, &mut package)?;

            package.finish().map_err(zip_err)?;
        }

        // Resources are collected before the manifest member exists, so the
        // manifest lists exactly the index and archive members.
        let resources = collect_resources(cursor.get_ref())?;
        let (main_page_url, main_page_date) = find_main_page(&self.warc_path)?;

        let now = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
            .format(&Rfc3339)
            .expect("UTC datetime formats as RFC3339");

        let package_meta = DataPackage {
            profile: "data-package",
            title: self
                .title
                .clone()
                .unwrap_or_else(|| self.collection.clone()),
            description: self.description.clone().unwrap_or_else(|| {
                format!(
                    "Web archive generated for the {} crawl. It is meant for \
                     scraping-style replay and carries no js/css rendering data.",
                    self.collection
                )
            }),
            created: now.clone(),
            modified: now,
            wacz_version: WACZ_VERSION,
            software: format!("webarchive/{}", env!("CARGO_PKG_VERSION")),
            main_page_url,
            main_page_date,
            resources,
        };

        let mut package = ZipWriter::new_append(cursor).map_err(zip_err)?;
        package
            .start_file(DATAPACKAGE_FNAME, stored)
            .map_err(zip_err)?;
        package.write_all(&serde_json::to_vec_pretty(&package_meta)?)?;
        let cursor = package.finish().map_err(zip_err)?;

        let out_name = self
            .wacz_fname
            .clone()
            .unwrap_or_else(|| wacz_fname(&self.collection));
        let uri = self.store.persist_file(&out_name, &cursor.into_inner())?;
        tracing::info!(%uri, "persisted WACZ");

        Ok(uri)
    }
}

/// `<collection>-<YYYYMMDDhhmmss>.wacz`
pub fn wacz_fname(collection: &str) -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(TIMESTAMP_FMT)
        .expect("timestamp format");
    format!("{collection}-{timestamp}.wacz")
}

fn zip_err(err: zip::result::ZipError) -> Error {
    Error::ZipCorruption(err.to_string())
}

/// SHA-256 and byte count for every member currently in the package.
fn collect_resources(zip_bytes: &[u8]) -> Result<Vec<DataPackageEntry>> {
    use sha2::{Digest, Sha256};

    let mut archive = ZipArchive::new(Cursor::new(zip_bytes)).map_err(zip_err)?;
    let mut resources = Vec::with_capacity(archive.len());

    for at in 0..archive.len() {
        let mut member = archive.by_index(at).map_err(zip_err)?;
        if member.is_dir() {
            continue;
        }

        let path = member.name().to_owned();
        let name = path
            .rsplit('/')
            .next()
            .unwrap_or(path.as_str())
            .to_lowercase();

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        let mut bytes = 0u64;
        loop {
            let n = member.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            bytes += n as u64;
            hasher.update(&buffer[..n]);
        }

        let digest: [u8; 32] = hasher.finalize().into();
        resources.push(DataPackageEntry {
            name,
            path,
            hash: sha256_as_string(&digest),
            bytes,
        });
    }

    Ok(resources)
}

/// The first `request` record names the crawl's entry page.
fn find_main_page(warc_path: &Path) -> Result<(Option<String>, Option<String>)> {
    for record in WarcReader::open(warc_path)? {
        let record = record?;
        if record.record_type().ok() == Some(WarcRecordType::Request) {
            return Ok((
                record.target_uri().map(str::to_owned),
                record.date().map(str::to_owned),
            ));
        }
    }

    Ok((None, None))
}
