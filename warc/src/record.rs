use webarchive_common::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarcVersion {
    V1_0,
    V1_1,
}

impl WarcVersion {
    /// Parses a record's leading version line. Anything other than WARC/1.0
    /// or WARC/1.1 is rejected.
    pub fn parse(line: &str) -> Result<WarcVersion> {
        match line.trim() {
            "WARC/1.0" => Ok(WarcVersion::V1_0),
            "WARC/1.1" => Ok(WarcVersion::V1_1),
            other => Err(Error::UnsupportedWarcVersion(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarcVersion::V1_0 => "WARC/1.0",
            WarcVersion::V1_1 => "WARC/1.1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarcRecordType {
    Warcinfo,
    Response,
    Request,
    Metadata,
    Resource,
    Revisit,
    Conversion,
    Continuation,
}

impl WarcRecordType {
    pub fn parse(value: &str) -> Result<WarcRecordType> {
        match value.trim() {
            "warcinfo" => Ok(WarcRecordType::Warcinfo),
            "response" => Ok(WarcRecordType::Response),
            "request" => Ok(WarcRecordType::Request),
            "metadata" => Ok(WarcRecordType::Metadata),
            "resource" => Ok(WarcRecordType::Resource),
            "revisit" => Ok(WarcRecordType::Revisit),
            "conversion" => Ok(WarcRecordType::Conversion),
            "continuation" => Ok(WarcRecordType::Continuation),
            other => Err(Error::UnsupportedRecordType(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarcRecordType::Warcinfo => "warcinfo",
            WarcRecordType::Response => "response",
            WarcRecordType::Request => "request",
            WarcRecordType::Metadata => "metadata",
            WarcRecordType::Resource => "resource",
            WarcRecordType::Revisit => "revisit",
            WarcRecordType::Conversion => "conversion",
            WarcRecordType::Continuation => "continuation",
        }
    }
}

/// One decoded WARC record: version line, named fields and the record block.
#[derive(Clone, Debug)]
pub struct WarcRecord {
    pub version: WarcVersion,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WarcRecord {
    pub fn new(version: WarcVersion, headers: Vec<(String, String)>, body: Vec<u8>) -> WarcRecord {
        WarcRecord {
            version,
            headers,
            body,
        }
    }

    /// Case-insensitive field lookup; the first occurrence wins, matching the
    /// fold applied when the record was read.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn record_type(&self) -> Result<WarcRecordType> {
        let value = self
            .header("WARC-Type")
            .ok_or_else(|| Error::MalformedWarcRecord("missing WARC-Type".to_owned()))?;
        WarcRecordType::parse(value)
    }

    pub fn record_id(&self) -> Option<&str> {
        self.header("WARC-Record-ID")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header("WARC-Target-URI")
    }

    pub fn date(&self) -> Option<&str> {
        self.header("WARC-Date")
    }

    pub fn concurrent_to(&self) -> Option<&str> {
        self.header("WARC-Concurrent-To")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|value| value.trim().parse().ok())
    }
}
