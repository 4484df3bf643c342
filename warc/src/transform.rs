use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use url::Url;
use webarchive_common::{Error, HttpRequest, HttpResponse, Result};

use crate::cdxj::{split_http_payload, CdxjRecord};
use crate::record::{WarcRecord, WarcRecordType};

/// Synthesizes the request to replay for an index entry. The index carries no
/// body or headers, so this is a bare method + URL.
pub fn request_from_cdxj(record: &CdxjRecord) -> Result<HttpRequest> {
    let url = Url::parse(record.url())
        .map_err(|_| Error::InvalidCdxjLine(format!("unparseable url: {}", record.url())))?;
    let method = record
        .method()
        .parse::<Method>()
        .unwrap_or(Method::GET);

    Ok(HttpRequest {
        url,
        method,
        headers: HeaderMap::new(),
        body: Vec::new(),
    })
}

/// Decodes a stored `response` record back into an HTTP response.
///
/// Returns `Ok(None)` when the payload's status line cannot be understood;
/// record types other than `response` and payloads that are not
/// `application/http` are typed errors.
pub fn response_from_warc(record: &WarcRecord) -> Result<Option<HttpResponse>> {
    if record.record_type()? != WarcRecordType::Response {
        return Err(Error::UnsupportedRecordType(
            record
                .header("WARC-Type")
                .unwrap_or_default()
                .to_owned(),
        ));
    }

    let content_type = record.content_type().unwrap_or_default();
    let family = content_type.split(';').next().unwrap_or_default().trim();
    if family != "application/http" {
        return Err(Error::UnsupportedContentType(family.to_owned()));
    }

    let Some(target) = record.target_uri() else {
        return Ok(None);
    };
    let Ok(url) = Url::parse(target) else {
        return Ok(None);
    };

    let (head, body) = match split_http_payload(&record.body) {
        Some((head, body)) => (head, body),
        None => (&record.body[..], &[][..]),
    };

    let head_text = String::from_utf8_lossy(head);
    let mut lines = head_text.lines();

    let Some((version, status)) = lines.next().and_then(parse_status_line) else {
        return Ok(None);
    };

    // Repeated headers flatten last-wins; the index format has the same
    // limitation and replay only needs one value per name.
    let mut headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(name) = name.trim().parse::<HeaderName>() else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value.trim()) else {
            continue;
        };
        headers.insert(name, value);
    }

    Ok(Some(HttpResponse {
        url,
        status,
        version,
        headers,
        body: body.to_vec(),
    }))
}

fn parse_status_line(line: &str) -> Option<(Version, StatusCode)> {
    let mut parts = line.split_whitespace();

    let version = match parts.next()? {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/2" | "HTTP/2.0" => Version::HTTP_2,
        "HTTP/3" | "HTTP/3.0" => Version::HTTP_3,
        _ => return None,
    };
    let status = StatusCode::from_u16(parts.next()?.parse().ok()?).ok()?;

    Some((version, status))
}
