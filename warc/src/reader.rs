use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::bufread::GzDecoder;
use flate2::read::MultiGzDecoder;
use webarchive_common::{Error, Result};

use crate::record::{WarcRecord, WarcVersion};

/// Sequential reader over a WARC file: one record per gzip member for `.gz`
/// files, plain concatenated records otherwise.
pub struct WarcReader<R: BufRead> {
    reader: R,
}

impl WarcReader<Box<dyn BufRead>> {
    pub fn open(path: &Path) -> Result<WarcReader<Box<dyn BufRead>>> {
        let file = File::open(path)?;
        let is_gzip = path.extension().is_some_and(|ext| ext == "gz");

        let reader: Box<dyn BufRead> = if is_gzip {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(WarcReader { reader })
    }
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(reader: R) -> WarcReader<R> {
        WarcReader { reader }
    }

    /// Returns the next record, or `None` at end of stream.
    pub fn read_record(&mut self) -> Result<Option<WarcRecord>> {
        parse_record(&mut self.reader)
    }
}

impl<R: BufRead> Iterator for WarcReader<R> {
    type Item = Result<WarcRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Decodes exactly one record from a byte slice extracted out of storage,
/// gunzipping first when the slice is a gzip member.
pub fn read_record_from_slice(bytes: &[u8]) -> Result<WarcRecord> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(bytes);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain)?;
        parse_single(&plain)
    } else {
        parse_single(bytes)
    }
}

fn parse_single(bytes: &[u8]) -> Result<WarcRecord> {
    let mut reader = bytes;
    parse_record(&mut reader)?
        .ok_or_else(|| Error::MalformedWarcRecord("empty record slice".to_owned()))
}

/// Shared record grammar: version line, folded headers up to a blank line, a
/// body bounded by `Content-Length`, and the `\r\n\r\n` terminator. Anything
/// after the terminator is left in the stream for the next record.
pub(crate) fn parse_record<R: BufRead>(reader: &mut R) -> Result<Option<WarcRecord>> {
    let mut line = Vec::new();

    // Skip stray blank lines between members.
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if !line.iter().all(|b| matches!(b, b'\r' | b'\n')) {
            break;
        }
    }

    let version = WarcVersion::parse(String::from_utf8_lossy(&line).trim())?;

    let mut headers = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Err(Error::MalformedWarcRecord(
                "truncated record header".to_owned(),
            ));
        }
        if line == b"\r\n" || line == b"\n" {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        match text.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_owned(), value.trim().to_owned()))
            }
            None => {
                return Err(Error::MalformedWarcRecord(format!(
                    "invalid header line: {text}"
                )))
            }
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            Error::MalformedWarcRecord("missing or invalid Content-Length".to_owned())
        })? as usize;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    // Consume the two CRLFs ending the record. A partial member at the tail of
    // an interrupted write may be missing them; the body above is already
    // bounded, so tolerate that.
    for _ in 0..2 {
        line.clear();
        reader.read_until(b'\n', &mut line)?;
    }

    Ok(Some(WarcRecord::new(version, headers, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::WarcRecordType;

    fn sample(version: &str) -> Vec<u8> {
        let body = b"hello archive";
        let mut raw = Vec::new();
        raw.extend_from_slice(version.as_bytes());
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(b"WARC-Type: response\r\n");
        raw.extend_from_slice(b"WARC-Target-URI: http://example.com/\r\n");
        raw.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(body);
        raw.extend_from_slice(b"\r\n\r\n");
        raw
    }

    #[test]
    fn parses_plain_record() {
        let record = read_record_from_slice(&sample("WARC/1.1")).unwrap();
        assert_eq!(record.version, WarcVersion::V1_1);
        assert_eq!(record.record_type().unwrap(), WarcRecordType::Response);
        assert_eq!(record.body, b"hello archive");
    }

    #[test]
    fn parses_gzipped_member() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&sample("WARC/1.0")).unwrap();
        let member = encoder.finish().unwrap();

        let record = read_record_from_slice(&member).unwrap();
        assert_eq!(record.version, WarcVersion::V1_0);
        assert_eq!(record.body, b"hello archive");
    }

    #[test]
    fn rejects_unknown_version() {
        assert!(matches!(
            read_record_from_slice(&sample("WARC/2.0")),
            Err(Error::UnsupportedWarcVersion(_))
        ));
    }

    #[test]
    fn bounds_body_to_content_length() {
        let mut raw = sample("WARC/1.1");
        raw.extend_from_slice(b"trailing junk from an interrupted write");
        let record = read_record_from_slice(&raw).unwrap();
        assert_eq!(record.body, b"hello archive");
    }

    #[test]
    fn iterates_consecutive_records() {
        let mut raw = sample("WARC/1.1");
        raw.extend_from_slice(&sample("WARC/1.1"));

        let records: Vec<_> = WarcReader::new(&raw[..])
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }
}
