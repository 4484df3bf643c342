use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::MultiGzDecoder;
use webarchive_common::{Error, Result};
use zip::ZipArchive;

use crate::zip_utils::{
    self, local_header_data_offset, CdEntry, EOCD_RECORD_SIZE, LOCAL_HEADER_PREFIX_SIZE,
    ZIP64_EOCD_LOCATOR_SIZE, ZIP64_EOCD_RECORD_SIZE,
};

/// How far from the end of the container the EOCD is searched for.
const EOCD_SEARCH_WINDOW: u64 = 65536;

/// Byte-level access to the members of one WACZ container.
///
/// `read_part` addresses the member's stored (compressed) stream; members
/// named `*.gz` come back gunzipped, everything else raw.
pub trait ZipStorage: Send + Sync {
    fn exists(&self) -> bool;
    fn read_all(&self, member: &str) -> Result<Vec<u8>>;
    fn read_part(&self, member: &str, offset: u64, length: u64) -> Result<Vec<u8>>;
}

fn maybe_gunzip(member: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
    if !member.ends_with(".gz") {
        return Ok(bytes);
    }

    let mut decoder = MultiGzDecoder::new(&bytes[..]);
    let mut plain = Vec::new();
    decoder.read_to_end(&mut plain)?;
    Ok(plain)
}

/// Local containers go through the `zip` crate's directory parsing.
pub struct LocalZipStorage {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl LocalZipStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<LocalZipStorage> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file)
            .map_err(|err| Error::ZipCorruption(err.to_string()))?;

        Ok(LocalZipStorage {
            path,
            archive: Mutex::new(archive),
        })
    }
}

impl ZipStorage for LocalZipStorage {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read_all(&self, member: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().expect("zip archive lock poisoned");
        let mut entry = match archive.by_name(member) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(Error::MissingMember(member.to_owned()))
            }
            Err(err) => return Err(Error::ZipCorruption(err.to_string())),
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        maybe_gunzip(member, bytes)
    }

    fn read_part(&self, member: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().expect("zip archive lock poisoned");
        let entry = match archive.by_name(member) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(Error::MissingMember(member.to_owned()))
            }
            Err(err) => return Err(Error::ZipCorruption(err.to_string())),
        };

        // The member stream is not seekable, so skip up to the slice start.
        let mut entry = entry;
        io::copy(&mut (&mut entry).take(offset), &mut io::sink())?;

        let mut bytes = Vec::with_capacity(length as usize);
        (&mut entry).take(length).read_to_end(&mut bytes)?;
        maybe_gunzip(member, bytes)
    }
}

/// Issues byte-range reads against a remote object. Implementations retry a
/// failed request once before giving up.
pub trait RangeFetcher: Send + Sync {
    fn content_length(&self) -> Result<u64>;
    /// Fetches `start..=end`, both bounds inclusive.
    fn fetch(&self, start: u64, end: u64) -> Result<Vec<u8>>;

    fn exists(&self) -> bool {
        self.content_length().is_ok()
    }
}

/// Ranged reader over a remote container: resolves the central directory once
/// at open, then serves member slices with precise range requests. The whole
/// archive is never downloaded.
pub struct RemoteZipStorage<F: RangeFetcher> {
    fetcher: F,
    entries: BTreeMap<String, CdEntry>,
    data_offsets: Mutex<HashMap<String, u64>>,
}

impl<F: RangeFetcher> RemoteZipStorage<F> {
    pub fn open(fetcher: F) -> Result<RemoteZipStorage<F>> {
        let size = fetcher.content_length()?;
        if size < EOCD_RECORD_SIZE as u64 {
            return Err(Error::ZipCorruption("container too small".to_owned()));
        }

        let tail_start = size.saturating_sub(EOCD_SEARCH_WINDOW);
        let tail = fetcher.fetch(tail_start, size - 1)?;
        let eocd_offset = tail_start + zip_utils::find_eocd(&tail)? as u64;

        let eocd = fetcher.fetch(eocd_offset, eocd_offset + EOCD_RECORD_SIZE as u64 - 1)?;

        let (cd_start, cd_size) = if zip_utils::is_zip64(&eocd)? {
            let locator_offset = eocd_offset
                .checked_sub(ZIP64_EOCD_LOCATOR_SIZE as u64)
                .ok_or_else(|| Error::ZipCorruption("missing ZIP64 locator".to_owned()))?;
            let locator = fetcher.fetch(locator_offset, eocd_offset - 1)?;
            let zip64_offset = zip_utils::parse_zip64_locator(&locator)?;

            let zip64_eocd =
                fetcher.fetch(zip64_offset, zip64_offset + ZIP64_EOCD_RECORD_SIZE as u64 - 1)?;
            zip_utils::parse_zip64_eocd(&zip64_eocd)?
        } else {
            zip_utils::parse_eocd(&eocd)?
        };

        if cd_size == 0 {
            return Err(Error::ZipCorruption("empty central directory".to_owned()));
        }

        let cd = fetcher.fetch(cd_start, cd_start + cd_size - 1)?;
        let entries = zip_utils::parse_central_directory(&cd)?;

        tracing::debug!(members = entries.len(), "parsed remote central directory");

        Ok(RemoteZipStorage {
            fetcher,
            entries,
            data_offsets: Mutex::new(HashMap::new()),
        })
    }

    fn entry(&self, member: &str) -> Result<&CdEntry> {
        self.entries
            .get(member)
            .ok_or_else(|| Error::MissingMember(member.to_owned()))
    }

    /// Where the member's data starts inside the container. Resolved lazily
    /// from the local file header, then cached.
    fn data_start(&self, member: &str) -> Result<u64> {
        if let Some(cached) = self
            .data_offsets
            .lock()
            .expect("data offset lock poisoned")
            .get(member)
        {
            return Ok(*cached);
        }

        let entry = self.entry(member)?;
        let header = self.fetcher.fetch(
            entry.header_offset,
            entry.header_offset + LOCAL_HEADER_PREFIX_SIZE as u64 - 1,
        )?;
        let start = entry.header_offset + local_header_data_offset(&header)?;

        self.data_offsets
            .lock()
            .expect("data offset lock poisoned")
            .insert(member.to_owned(), start);

        Ok(start)
    }
}

impl<F: RangeFetcher> ZipStorage for RemoteZipStorage<F> {
    fn exists(&self) -> bool {
        self.fetcher.exists()
    }

    fn read_all(&self, member: &str) -> Result<Vec<u8>> {
        let size = self.entry(member)?.compressed_size;
        self.read_part(member, 0, size)
    }

    fn read_part(&self, member: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let start = self.data_start(member)? + offset;
        let bytes = self.fetcher.fetch(start, start + length - 1)?;
        maybe_gunzip(member, bytes)
    }
}
