use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;
use webarchive_common::digest::sha1_base32_of;
use webarchive_common::{HttpRequest, HttpResponse, Result};

use crate::TIMESTAMP_FMT;

const WARC_VERSION: &str = "WARC/1.1";
const CONFORMS_TO: &str =
    "https://iipc.github.io/warc-specifications/specifications/warc-format/warc-1.1/";

pub(crate) trait RecordWriter: Write {
    fn line_end(&mut self) -> io::Result<()> {
        self.write_all(b"\r\n")
    }

    fn line(&mut self, line: impl AsRef<[u8]>) -> io::Result<()> {
        self.write_all(line.as_ref())?;
        self.line_end()
    }

    fn header(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> io::Result<()> {
        self.write_all(name.as_ref())?;
        self.write_all(b": ")?;
        self.write_all(value.as_ref())?;
        self.line_end()
    }
}

impl<T> RecordWriter for T where T: Write {}

/// Appends records to a single WARC file, one gzip member per record so any
/// record can later be extracted and decompressed in isolation.
pub struct WarcWriter {
    file: File,
    path: PathBuf,
    collection: String,
}

impl WarcWriter {
    /// Creates `<collection>-<timestamp>-00000-<host>.warc.gz` inside `dir`.
    /// Refuses to reuse an existing file.
    pub fn create(dir: &Path, collection: &str) -> Result<WarcWriter> {
        let name = generate_warc_fname(collection, OffsetDateTime::now_utc(), &crawl_host());
        let path = dir.join(name);

        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;

        Ok(WarcWriter {
            file,
            path,
            collection: collection.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// The leading `warcinfo` record describing this capture.
    pub fn write_warcinfo(&mut self, software: &str, robots_obey: bool) -> Result<String> {
        let record_id = record_id();

        let mut fields = Vec::with_capacity(256);
        fields.header("software", software)?;
        fields.header("format", "WARC file version 1.1")?;
        fields.header("conformsTo", CONFORMS_TO)?;
        fields.header("isPartOf", &self.collection)?;
        fields.header("robots", if robots_obey { "obey" } else { "ignore" })?;

        let filename = self.filename().to_owned();
        self.write_record(
            &[
                ("WARC-Type", "warcinfo".to_owned()),
                ("WARC-Date", warc_date(OffsetDateTime::now_utc())),
                ("WARC-Filename", filename),
                ("WARC-Record-ID", record_id.clone()),
                ("Content-Type", "application/warc-fields".to_owned()),
            ],
            &fields,
        )?;

        Ok(record_id)
    }

    /// Writes a `response` record and returns its id, so the paired request
    /// can point back at it via `WARC-Concurrent-To`.
    pub fn write_response(
        &mut self,
        response: &HttpResponse,
        date: OffsetDateTime,
    ) -> Result<String> {
        let record_id = record_id();
        let payload = http_response_block(response)?;

        self.write_record(
            &[
                ("WARC-Type", "response".to_owned()),
                ("WARC-Target-URI", response.url.to_string()),
                ("WARC-Date", warc_date(date)),
                ("WARC-Record-ID", record_id.clone()),
                ("WARC-Payload-Digest", sha1_base32_of(&response.body)),
                (
                    "Content-Type",
                    "application/http; msgtype=response".to_owned(),
                ),
            ],
            &payload,
        )?;

        Ok(record_id)
    }

    /// Writes the `request` record for a previously written response. The
    /// date must be the exact date stamped on that response.
    pub fn write_request(
        &mut self,
        request: &HttpRequest,
        date: OffsetDateTime,
        concurrent_to: &str,
    ) -> Result<String> {
        let record_id = record_id();
        let payload = http_request_block(request)?;

        self.write_record(
            &[
                ("WARC-Type", "request".to_owned()),
                ("WARC-Target-URI", request.url.to_string()),
                ("WARC-Date", warc_date(date)),
                ("WARC-Record-ID", record_id.clone()),
                ("WARC-Concurrent-To", concurrent_to.to_owned()),
                (
                    "Content-Type",
                    "application/http; msgtype=request".to_owned(),
                ),
            ],
            &payload,
        )?;

        Ok(record_id)
    }

    fn write_record(&mut self, warc_headers: &[(&str, String)], payload: &[u8]) -> Result<()> {
        let mut member = GzEncoder::new(&mut self.file, Compression::new(5));

        member.line(WARC_VERSION)?;
        for (name, value) in warc_headers {
            member.header(name, value)?;
        }
        member.header("Content-Length", payload.len().to_string())?;
        member.line("")?;

        member.write_all(payload)?;
        member.line_end()?;
        member.line_end()?;

        member.finish()?;
        self.file.flush()?;

        Ok(())
    }
}

fn http_response_block(response: &HttpResponse) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(response.body.len() + 256);

    block.line(format!(
        "{:?} {} {}",
        response.version,
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("Unknown")
    ))?;

    for (name, value) in response.headers.iter() {
        block.header(name.as_str(), value.as_bytes())?;
    }

    block.line("")?;
    block.write_all(&response.body)?;

    Ok(block)
}

fn http_request_block(request: &HttpRequest) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(request.body.len() + 256);

    block.line(format!("{} {} HTTP/1.1", request.method, request.url.path()))?;

    for (name, value) in request.headers.iter() {
        block.header(name.as_str(), value.as_bytes())?;
    }

    block.line("")?;
    block.write_all(&request.body)?;

    Ok(block)
}

/// RFC3339 at second precision, as `WARC-Date` requires.
pub fn warc_date(date: OffsetDateTime) -> String {
    date.replace_nanosecond(0)
        .unwrap_or(date)
        .format(&Rfc3339)
        .expect("UTC datetime formats as RFC3339")
}

fn record_id() -> String {
    format!("<urn:uuid:{}>", Uuid::now_v1(&node_id()).hyphenated())
}

// A stable pseudo-node for the v1 uuids; hosts rarely expose a MAC address
// worth leaking into archives anyway.
fn node_id() -> [u8; 6] {
    let mut node = [0x57, 0x41, 0x52, 0x43, 0x30, 0x30];
    for (i, b) in crawl_host().bytes().enumerate() {
        node[i % 6] ^= b;
    }
    node[0] |= 0x01;
    node
}

fn crawl_host() -> String {
    whoami::hostname()
}

/// WARC filename following the warc-format naming recommendation:
/// `{prefix}-{timestamp}-{serial}-{crawlhost}.warc.gz`. A single file per
/// crawl keeps the serial fixed at 00000.
pub fn generate_warc_fname(prefix: &str, now: OffsetDateTime, hostname: &str) -> String {
    let timestamp = now.format(TIMESTAMP_FMT).expect("timestamp format");
    let host_label = hostname.split('.').next().unwrap_or(hostname);

    format!("{prefix}-{timestamp}-00000-{host_label}.warc.gz")
}
