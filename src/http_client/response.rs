//! HTTP response types.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Header accessors shared by every response type.
///
/// Header names are stored lowercase.
pub trait ResponseHeaders {
    fn header_map(&self) -> &HashMap<String, String>;

    /// Get a header by (case-insensitive) name.
    fn header(&self, name: &str) -> Option<&str> {
        self.header_map()
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Get the ETag header.
    fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// Get the Last-Modified header.
    fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    /// Get the Content-Type header.
    fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the Content-Length header.
    fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|s| s.trim().parse().ok())
    }

    /// Get the filename from Content-Disposition header.
    fn content_disposition_filename(&self) -> Option<String> {
        self.header("content-disposition")
            .and_then(parse_content_disposition_filename)
    }
}

/// Buffered response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: Option<String>,
    /// URL after redirects.
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response is 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Get response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Get response body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

impl ResponseHeaders for HttpResponse {
    fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

/// HEAD response (no body, just headers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl HeadResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response is 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

impl ResponseHeaders for HeadResponse {
    fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

/// Response body streamed to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub status: u16,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub path: PathBuf,
    pub size: u64,
    /// Hex-encoded SHA-256 of the stored bytes.
    pub sha256: String,
}

impl Download {
    /// Filename suggested by the server, if any.
    pub fn suggested_filename(&self) -> Option<String> {
        self.content_disposition_filename()
    }
}

impl ResponseHeaders for Download {
    fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

/// Parse filename from Content-Disposition header value.
/// Parses both `filename="name.pdf"` and `filename*=UTF-8''name.pdf` formats.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    // RFC 5987 form takes precedence
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    if let Some(start) = header.find("filename=") {
        let rest = &header[start + 9..];
        let filename = if let Some(quoted) = rest.strip_prefix('"') {
            quoted.split('"').next()
        } else {
            rest.split([';', ' ']).next()
        };

        if let Some(name) = filename {
            let name = name.trim().to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }

    None
}
