use webarchive_common::{Error, Result};
use webarchive_warc::cdxj::{CdxjIndex, CdxjRecord};
use webarchive_warc::{read_record_from_slice, WarcRecord};

use crate::storage::ZipStorage;

/// Index member candidates, probed in order.
const INDEX_PATHS: [&str; 4] = [
    "indexes/index.cdxj",
    "indexes/index.cdxj.gz",
    "indexes/index.cdx",
    "indexes/index.cdx.gz",
];

const ARCHIVE_DIR: &str = "archive/";

/// One open WACZ: a storage backend plus its parsed index. Lookups hit the
/// in-memory index; record bytes are pulled lazily, so large remote archives
/// stay cheap to open.
pub struct WaczFile {
    storage: Box<dyn ZipStorage>,
    index: CdxjIndex,
}

impl WaczFile {
    pub fn open(storage: Box<dyn ZipStorage>) -> Result<WaczFile> {
        let index = Self::load_index(storage.as_ref())?;
        tracing::info!(entries = index.len(), "opened WACZ index");

        Ok(WaczFile { storage, index })
    }

    fn load_index(storage: &dyn ZipStorage) -> Result<CdxjIndex> {
        for path in INDEX_PATHS {
            match storage.read_all(path) {
                Ok(bytes) => return CdxjIndex::parse_bytes(&bytes),
                Err(Error::MissingMember(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(Error::MissingMember(
            "no index member found in WACZ".to_owned(),
        ))
    }

    /// Most recent index entry for the URL, if any.
    pub fn lookup(&self, url: &str) -> Option<&CdxjRecord> {
        self.index.lookup(url)
    }

    /// Pulls the record a CDXJ entry points at out of the archive member.
    /// A missing member maps to `None` so replay can degrade to a 404.
    pub fn fetch(&self, record: &CdxjRecord) -> Result<Option<WarcRecord>> {
        let member = format!("{ARCHIVE_DIR}{}", record.filename()?);
        let offset = record.offset()?;
        let length = record.length()?;

        match self.storage.read_part(&member, offset, length) {
            Ok(bytes) => read_record_from_slice(&bytes).map(Some),
            Err(Error::MissingMember(member)) => {
                tracing::warn!("WARC member missing from WACZ: {member}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Convenience: lookup + fetch in one step.
    pub fn record_for_url(&self, url: &str) -> Result<Option<WarcRecord>> {
        match self.lookup(url) {
            Some(record) => self.fetch(record),
            None => Ok(None),
        }
    }

    pub fn iter_index(&self) -> impl Iterator<Item = &CdxjRecord> {
        self.index.iter()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    fn set_source(&mut self, source: usize) {
        self.index.set_source(source);
    }
}

/// An ordered set of open WACZ files behaving like one archive: lookups probe
/// in order (first hit wins) and fetches route back to the archive a record
/// came from via its source id.
pub struct MultiWaczFile {
    waczs: Vec<WaczFile>,
}

impl MultiWaczFile {
    pub fn new(mut waczs: Vec<WaczFile>) -> MultiWaczFile {
        for (source, wacz) in waczs.iter_mut().enumerate() {
            wacz.set_source(source);
        }
        MultiWaczFile { waczs }
    }

    pub fn is_empty(&self) -> bool {
        self.waczs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waczs.len()
    }

    pub fn lookup(&self, url: &str) -> Option<&CdxjRecord> {
        self.waczs.iter().find_map(|wacz| wacz.lookup(url))
    }

    pub fn fetch(&self, record: &CdxjRecord) -> Result<Option<WarcRecord>> {
        match self.waczs.get(record.source) {
            Some(wacz) => wacz.fetch(record),
            None => Ok(None),
        }
    }

    pub fn record_for_url(&self, url: &str) -> Result<Option<WarcRecord>> {
        match self.lookup(url) {
            Some(record) => self.fetch(record),
            None => Ok(None),
        }
    }

    pub fn iter_index(&self) -> impl Iterator<Item = &CdxjRecord> {
        self.waczs.iter().flat_map(|wacz| wacz.iter_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::stored_zip;
    use crate::storage::LocalZipStorage;

    fn wacz_with_index(dir: &std::path::Path, name: &str, index: &str) -> WaczFile {
        let zip_bytes = stored_zip(&[("indexes/index.cdxj", index.as_bytes())]);
        let path = dir.join(name);
        std::fs::write(&path, zip_bytes).unwrap();
        WaczFile::open(Box::new(LocalZipStorage::open(&path).unwrap())).unwrap()
    }

    #[test]
    fn missing_index_member_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wacz");
        std::fs::write(&path, stored_zip(&[("datapackage.json", b"{}")])).unwrap();

        let result = WaczFile::open(Box::new(LocalZipStorage::open(&path).unwrap()));
        assert!(matches!(result, Err(Error::MissingMember(_))));
    }

    #[test]
    fn gzipped_index_member_is_probed() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let index = "com,example)/ 20240101000000 {\"url\":\"http://example.com/\"}\n";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(index.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gz.wacz");
        std::fs::write(
            &path,
            stored_zip(&[("indexes/index.cdxj.gz", gz.as_slice())]),
        )
        .unwrap();

        let wacz = WaczFile::open(Box::new(LocalZipStorage::open(&path).unwrap())).unwrap();
        assert!(wacz.lookup("http://example.com/").is_some());
    }

    #[test]
    fn multi_probes_in_order_and_routes_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let first = wacz_with_index(
            dir.path(),
            "a.wacz",
            "com,example)/ 20240101000000 {\"url\":\"http://example.com/\",\"offset\":0,\"length\":1,\"filename\":\"a.warc.gz\"}\n",
        );
        let second = wacz_with_index(
            dir.path(),
            "b.wacz",
            "com,example)/ 20250101000000 {\"url\":\"http://example.com/\",\"offset\":0,\"length\":1,\"filename\":\"b.warc.gz\"}\ncom,example)/only 20250101000000 {\"url\":\"http://example.com/only\",\"offset\":0,\"length\":1,\"filename\":\"b.warc.gz\"}\n",
        );

        let multi = MultiWaczFile::new(vec![first, second]);
        assert_eq!(multi.len(), 2);

        // First archive wins for a shared URL.
        let shared = multi.lookup("http://example.com/").unwrap();
        assert_eq!(shared.source, 0);
        assert_eq!(shared.datetime, "20240101000000");

        let only = multi.lookup("http://example.com/only").unwrap();
        assert_eq!(only.source, 1);

        assert_eq!(multi.iter_index().count(), 3);

        // The referenced member does not exist, which degrades to None.
        assert!(multi.fetch(shared).unwrap().is_none());
    }
}
