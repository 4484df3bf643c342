use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

use flate2::bufread::GzDecoder;
use lazy_regex::regex;
use neo_mime::MediaType;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;
use webarchive_common::digest::sha256_of;
use webarchive_common::{surt, Error, Result};

use crate::reader::parse_record;
use crate::record::{WarcRecord, WarcRecordType};
use crate::TIMESTAMP_FMT;

/// One line of a CDXJ index: a SURT key, a 14-digit timestamp (optionally
/// with milliseconds) and a JSON block describing where the record lives.
#[derive(Clone, Debug)]
pub struct CdxjRecord {
    pub surt: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub datetime: String,
    pub data: Map<String, Value>,
    /// Which open WACZ this record came from; assigned by the reader so a
    /// multi-archive lookup can route `fetch` back to the right container.
    pub source: usize,
}

impl CdxjRecord {
    pub fn parse(line: &str) -> Result<CdxjRecord> {
        let line = line.trim();
        let caps = regex!(
            r"^(?P<surt>(?P<host>[^\)\s]+)\)(?P<path>[^\?\s]+)?(?:\?(?P<query>\S+))?)\s(?P<datetime>\d{14}(?:\d{3})?)\s(?P<data>\{.*\})$"
        )
        .captures(line)
        .ok_or_else(|| Error::InvalidCdxjLine(line.to_owned()))?;

        let data: Map<String, Value> = serde_json::from_str(&caps["data"])
            .map_err(|_| Error::InvalidCdxjLine(line.to_owned()))?;

        if !data.get("url").is_some_and(Value::is_string) {
            return Err(Error::InvalidCdxjLine(line.to_owned()));
        }

        Ok(CdxjRecord {
            surt: caps["surt"].to_owned(),
            host: caps["host"].to_owned(),
            path: caps.name("path").map(|m| m.as_str()).unwrap_or("").to_owned(),
            query: caps.name("query").map(|m| m.as_str()).unwrap_or("").to_owned(),
            datetime: caps["datetime"].to_owned(),
            data,
            source: 0,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.surt,
            self.datetime,
            serde_json::to_string(&Value::Object(self.data.clone())).expect("JSON map serializes")
        )
    }

    pub fn year(&self) -> &str {
        &self.datetime[0..4]
    }

    pub fn month(&self) -> &str {
        &self.datetime[4..6]
    }

    pub fn day(&self) -> &str {
        &self.datetime[6..8]
    }

    pub fn hour(&self) -> &str {
        &self.datetime[8..10]
    }

    pub fn minute(&self) -> &str {
        &self.datetime[10..12]
    }

    pub fn second(&self) -> &str {
        &self.datetime[12..14]
    }

    pub fn url(&self) -> &str {
        self.data
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn method(&self) -> &str {
        self.data
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
    }

    pub fn filename(&self) -> Result<&str> {
        self.data
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidCdxjLine(format!("missing filename: {}", self.surt)))
    }

    pub fn offset(&self) -> Result<u64> {
        self.u64_field("offset")
    }

    pub fn length(&self) -> Result<u64> {
        self.u64_field("length")
    }

    pub fn status(&self) -> Option<u16> {
        match self.data.get("status") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    // Index producers disagree on whether offsets are numbers or strings, so
    // accept both.
    fn u64_field(&self, key: &str) -> Result<u64> {
        let parsed = match self.data.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            Error::InvalidCdxjLine(format!("missing numeric field `{key}`: {}", self.surt))
        })
    }
}

/// Streaming iterator over CDXJ lines for index-driven crawls.
pub fn parse_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<CdxjRecord>> {
    reader.lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(CdxjRecord::parse(&line)),
        Err(err) => Some(Err(err.into())),
    })
}

/// In-memory URL index over a parsed CDXJ file. The most recent entry for a
/// URL wins on lookup; the full history stays available on the entry list.
#[derive(Default)]
pub struct CdxjIndex {
    by_url: BTreeMap<String, Vec<CdxjRecord>>,
    len: usize,
}

impl CdxjIndex {
    /// Parses a whole index. Isolated bad lines are logged and skipped;
    /// when 0.1% or more of the lines fail the whole open is aborted.
    pub fn parse<R: BufRead>(reader: R) -> Result<CdxjIndex> {
        let mut index = CdxjIndex::default();
        let mut total = 0usize;
        let mut failed = 0usize;
        let mut first_error = None;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            total += 1;

            match CdxjRecord::parse(&line) {
                Ok(record) => index.insert(record),
                Err(err) => {
                    tracing::warn!("skipping invalid CDXJ line: {err}");
                    failed += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        if failed > 0 && failed * 1000 >= total {
            return Err(first_error.expect("failed lines imply a recorded error"));
        }

        Ok(index)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<CdxjIndex> {
        CdxjIndex::parse(bytes)
    }

    pub fn insert(&mut self, record: CdxjRecord) {
        self.len += 1;
        self.by_url
            .entry(record.url().to_owned())
            .or_default()
            .push(record);
    }

    pub fn lookup(&self, url: &str) -> Option<&CdxjRecord> {
        self.by_url.get(url)?.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CdxjRecord> {
        self.by_url.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_source(&mut self, source: usize) {
        for records in self.by_url.values_mut() {
            for record in records {
                record.source = source;
            }
        }
    }
}

/// Generates CDXJ records for every `response` record of a WARC file,
/// tracking the compressed byte extent of each gzip member so the entries
/// point at independently extractable slices.
pub fn build_cdxj_records(warc_path: &Path) -> Result<Vec<CdxjRecord>> {
    let filename = warc_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(warc_path)?;

    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let (record, consumed) = if bytes[pos..].starts_with(&[0x1f, 0x8b]) {
            let mut decoder = GzDecoder::new(&bytes[pos..]);
            let mut plain = Vec::new();
            decoder.read_to_end(&mut plain)?;
            let consumed = bytes.len() - pos - decoder.get_ref().len();

            let mut plain_slice = &plain[..];
            (parse_record(&mut plain_slice)?, consumed)
        } else {
            let mut rest = &bytes[pos..];
            let before = rest.len();
            (parse_record(&mut rest)?, before - rest.len())
        };

        let Some(record) = record else { break };
        if consumed == 0 {
            break;
        }

        if record.record_type().ok() == Some(WarcRecordType::Response) {
            match index_entry(&record, pos as u64, consumed as u64, &filename) {
                Ok(Some(entry)) => records.push(entry),
                Ok(None) => {}
                Err(err) => tracing::warn!("skipping unindexable response record: {err}"),
            }
        }

        pos += consumed;
    }

    records.sort_by(|a, b| {
        (a.surt.as_str(), a.datetime.as_str()).cmp(&(b.surt.as_str(), b.datetime.as_str()))
    });

    Ok(records)
}

/// Writes the sorted index for one WARC; returns the number of lines.
pub fn write_cdxj_index<W: Write>(out: &mut W, warc_path: &Path) -> Result<usize> {
    let records = build_cdxj_records(warc_path)?;

    for record in &records {
        writeln!(out, "{}", record.to_line())?;
    }

    Ok(records.len())
}

fn index_entry(
    record: &WarcRecord,
    offset: u64,
    length: u64,
    filename: &str,
) -> Result<Option<CdxjRecord>> {
    let Some(target) = record.target_uri() else {
        return Ok(None);
    };
    let Ok(url) = Url::parse(target) else {
        return Ok(None);
    };

    let date = record
        .date()
        .ok_or_else(|| Error::MalformedWarcRecord("response missing WARC-Date".to_owned()))?;
    let datetime = OffsetDateTime::parse(date, &Rfc3339)
        .map_err(|_| Error::MalformedWarcRecord(format!("invalid WARC-Date: {date}")))?
        .format(TIMESTAMP_FMT)
        .expect("timestamp format");

    let digest = record
        .header("WARC-Payload-Digest")
        .map(str::to_owned)
        .unwrap_or_else(|| sha256_of(payload_body(&record.body)));

    let mut data = Map::new();
    data.insert("url".to_owned(), Value::String(target.to_owned()));
    if let Some(mime) = payload_mime(&record.body) {
        data.insert("mime".to_owned(), mime);
    }
    if let Some(status) = payload_status(&record.body) {
        data.insert("status".to_owned(), Value::Number(status.into()));
    }
    data.insert("digest".to_owned(), Value::String(digest));
    data.insert("length".to_owned(), Value::Number(length.into()));
    data.insert("offset".to_owned(), Value::Number(offset.into()));
    data.insert("filename".to_owned(), Value::String(filename.to_owned()));

    let line = format!(
        "{} {} {}",
        surt(url),
        datetime,
        Value::Object(data)
    );

    CdxjRecord::parse(&line).map(Some)
}

fn payload_body(payload: &[u8]) -> &[u8] {
    split_http_payload(payload)
        .map(|(_, body)| body)
        .unwrap_or(payload)
}

fn payload_status(payload: &[u8]) -> Option<u16> {
    let (head, _) = split_http_payload(payload)?;
    let first_line = head.split(|b| *b == b'\n').next()?;
    let text = String::from_utf8_lossy(first_line);
    text.split_whitespace().nth(1)?.parse().ok()
}

fn payload_mime(payload: &[u8]) -> Option<Value> {
    let (head, _) = split_http_payload(payload)?;
    let text = String::from_utf8_lossy(head);

    let content_type = text.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_owned())
    })?;

    let media_type = MediaType::parse(&content_type).ok()?.without_params();
    serde_json::to_value(media_type).ok()
}

pub(crate) fn split_http_payload(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    payload
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|at| (&payload[..at], &payload[at + 4..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_LINE: &str = r#"com,example)/index 20241003000000 {"url":"http://example.com/index","status":"200"}"#;

    #[test]
    fn parses_valid_line() {
        let record = CdxjRecord::parse(VALID_LINE).unwrap();
        assert_eq!(record.surt, "com,example)/index");
        assert_eq!(record.host, "com,example");
        assert_eq!(record.path, "/index");
        assert_eq!(record.query, "");
        assert_eq!(record.datetime, "20241003000000");
        assert_eq!(record.year(), "2024");
        assert_eq!(record.month(), "10");
        assert_eq!(record.day(), "03");
        assert_eq!(record.url(), "http://example.com/index");
        assert_eq!(record.status(), Some(200));
    }

    #[test]
    fn parses_query_and_millis() {
        let line = r#"com,example)/path?q=1 20241003000000123 {"url":"http://example.com/path?q=1"}"#;
        let record = CdxjRecord::parse(line).unwrap();
        assert_eq!(record.query, "q=1");
        assert_eq!(record.datetime, "20241003000000123");
        assert_eq!(record.second(), "00");
    }

    #[test]
    fn rejects_missing_datetime() {
        let line = r#"com,example)/index {"url":"http://example.com/index"}"#;
        assert!(matches!(
            CdxjRecord::parse(line),
            Err(Error::InvalidCdxjLine(_))
        ));
    }

    #[test]
    fn rejects_bad_json_and_empty_lines() {
        let unterminated =
            r#"com,example)/index 20241003000000 {"url":"http://example.com/index""#;
        assert!(CdxjRecord::parse(unterminated).is_err());
        assert!(CdxjRecord::parse("").is_err());
        assert!(CdxjRecord::parse("com,example)/index 20241003000000").is_err());
    }

    #[test]
    fn line_roundtrip_preserves_fields() {
        let record = CdxjRecord::parse(VALID_LINE).unwrap();
        let reparsed = CdxjRecord::parse(&record.to_line()).unwrap();
        assert_eq!(reparsed.surt, record.surt);
        assert_eq!(reparsed.datetime, record.datetime);
        assert_eq!(reparsed.data, record.data);
    }

    #[test]
    fn lookup_returns_most_recent_entry() {
        let mut index = CdxjIndex::default();
        index.insert(
            CdxjRecord::parse(
                r#"com,example)/ 20240101000000 {"url":"http://example.com/","offset":0}"#,
            )
            .unwrap(),
        );
        index.insert(
            CdxjRecord::parse(
                r#"com,example)/ 20240601000000 {"url":"http://example.com/","offset":100}"#,
            )
            .unwrap(),
        );

        let hit = index.lookup("http://example.com/").unwrap();
        assert_eq!(hit.datetime, "20240601000000");
        assert_eq!(hit.offset().unwrap(), 100);
        assert_eq!(index.len(), 2);
        assert!(index.lookup("http://other.example/").is_none());
    }

    #[test]
    fn tolerates_isolated_bad_lines_in_large_index() {
        let mut input = String::new();
        for i in 0..2000 {
            input.push_str(&format!(
                "com,example)/p{i} 20240101000000 {{\"url\":\"http://example.com/p{i}\"}}\n"
            ));
        }
        input.push_str("garbage line\n");

        let index = CdxjIndex::parse(input.as_bytes()).unwrap();
        assert_eq!(index.len(), 2000);
    }

    #[test]
    fn aborts_when_too_many_lines_fail() {
        let input = "com,example)/a 20240101000000 {\"url\":\"http://example.com/a\"}\nnot a cdxj line\n";
        assert!(matches!(
            CdxjIndex::parse(input.as_bytes()),
            Err(Error::InvalidCdxjLine(_))
        ));
    }

    #[test]
    fn indexes_written_warc_with_extractable_slices() {
        use crate::reader::read_record_from_slice;
        use crate::writer::WarcWriter;
        use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
        use time::macros::datetime;
        use url::Url;
        use webarchive_common::{HttpRequest, HttpResponse};

        let dir = tempfile::tempdir().unwrap();
        let mut writer = WarcWriter::create(dir.path(), "quotes").unwrap();
        writer.write_warcinfo("webarchive/0.1.0", true).unwrap();

        for (path, when) in [
            ("/tag/love/", datetime!(2024-10-07 09:58:44 UTC)),
            ("/", datetime!(2024-10-07 09:58:45 UTC)),
        ] {
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
                body: format!("<html>{path}</html>").into_bytes(),
            };
            let request = HttpRequest {
                url,
                method: Method::GET,
                headers: HeaderMap::new(),
                body: Vec::new(),
            };
            let id = writer.write_response(&response, when).unwrap();
            writer.write_request(&request, when, &id).unwrap();
        }

        let records = build_cdxj_records(writer.path()).unwrap();
        assert_eq!(records.len(), 2, "only responses are indexed");

        // Sorted by surt: "/" before "/tag/love/".
        assert_eq!(records[0].url(), "https://quotes.toscrape.com/");
        assert_eq!(records[0].datetime, "20241007095845");
        assert_eq!(records[0].status(), Some(200));
        assert_eq!(records[0].filename().unwrap(), writer.filename());

        let bytes = std::fs::read(writer.path()).unwrap();
        for record in &records {
            let start = record.offset().unwrap() as usize;
            let end = start + record.length().unwrap() as usize;
            let warc = read_record_from_slice(&bytes[start..end]).unwrap();
            assert_eq!(
                warc.record_type().unwrap(),
                crate::record::WarcRecordType::Response
            );
            assert_eq!(warc.target_uri(), Some(record.url()));
        }
    }

    #[test]
    fn streaming_lines_drive_iteration() {
        let input = "com,example)/a 20240101000000 {\"url\":\"http://example.com/a\"}\n\ncom,example)/b 20240101000001 {\"url\":\"http://example.com/b\"}\n";
        let records: Vec<_> = parse_lines(input.as_bytes())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].url(), "http://example.com/b");
    }
}
