//! Serializable request/response envelopes.
//!
//! Envelopes are the flat representation of an HTTP exchange that crosses
//! process and machine boundaries. They support three encodings:
//!
//! - **Wire JSON**: `{method, url, data, headers}` / `{status, data, headers}`
//!   with the body carried as UTF-8 text. Used for file exchange with
//!   workers. Binary bodies are not representable in this encoding and
//!   fail with [`WireError::NonUtf8Body`].
//! - **Files**: the wire JSON persisted to disk, used by the script
//!   channel and the worker-side relay runner.
//! - **Raw HTTP**: a minimal status-line-plus-headers-plus-body byte
//!   stream, used by the tunnel channel. Bodies stay binary here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// An HTTP-like request envelope.
///
/// Immutable once handed to the dispatch queue; the URL carries the
/// pool's mount base until a channel (or the worker-side relay runner)
/// substitutes the worker-local base at delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Absolute URL including scheme and authority.
    pub url: String,
    /// Header mapping; duplicate keys collapse to the last write.
    pub headers: BTreeMap<String, String>,
    /// Body bytes, possibly empty.
    pub body: Vec<u8>,
}

/// Wire representation of a request. The `data` field is UTF-8 text.
#[derive(Serialize, Deserialize)]
struct WireRequest {
    method: String,
    url: String,
    data: String,
    headers: BTreeMap<String, String>,
}

impl Request {
    /// Creates a new request with no headers and an empty body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Creates a POST request with the given body.
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", url).with_body(body)
    }

    /// Sets a header, overwriting any previous value for the key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the scheme + authority part of the URL, without the path.
    ///
    /// `http://host:8080/a/b?x=1` yields `http://host:8080`.
    pub fn base_url(&self) -> &str {
        base_of(&self.url)
    }

    /// Returns the path (and query) part of the URL, or `/` when absent.
    pub fn path(&self) -> &str {
        let rest = &self.url[self.base_url().len()..];
        if rest.is_empty() {
            "/"
        } else {
            rest
        }
    }

    /// Substitutes the URL's base with `new_base`.
    ///
    /// Only the first occurrence is replaced; a trailing `/` on
    /// `new_base` is stripped. Fails if `new_base` has no scheme.
    pub fn replace_base_url(&mut self, new_base: &str) -> Result<(), WireError> {
        if !new_base.contains("://") {
            return Err(WireError::MissingScheme(new_base.to_string()));
        }
        let new_base = new_base.trim_end_matches('/');
        let old_base = self.base_url().to_string();
        self.url = self.url.replacen(&old_base, new_base, 1);
        Ok(())
    }

    /// Encodes the request into wire JSON.
    pub fn to_wire_json(&self) -> Result<String, WireError> {
        let data = String::from_utf8(self.body.clone()).map_err(|_| WireError::NonUtf8Body)?;
        let wire = WireRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            data,
            headers: self.headers.clone(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decodes a request from wire JSON.
    pub fn from_wire_json(json: &str) -> Result<Self, WireError> {
        let wire: WireRequest = serde_json::from_str(json)?;
        Ok(Self {
            method: wire.method,
            url: wire.url,
            headers: wire.headers,
            body: wire.data.into_bytes(),
        })
    }

    /// Writes the wire JSON encoding to a file.
    pub fn to_file(&self, path: &Path) -> Result<(), WireError> {
        std::fs::write(path, self.to_wire_json()?)?;
        Ok(())
    }

    /// Reads a request from a wire JSON file.
    pub fn from_file(path: &Path) -> Result<Self, WireError> {
        Self::from_wire_json(&std::fs::read_to_string(path)?)
    }

    /// Serializes the request as a minimal raw HTTP byte stream:
    /// status line, header lines, blank line, body.
    pub fn to_raw_http(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path()).into_bytes();
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// An HTTP-like response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Header mapping; duplicate keys collapse to the last write.
    pub headers: BTreeMap<String, String>,
    /// Body bytes, possibly empty.
    pub body: Vec<u8>,
}

/// Wire representation of a response. The `data` field is UTF-8 text.
#[derive(Serialize, Deserialize)]
struct WireResponse {
    status: u16,
    data: String,
    headers: BTreeMap<String, String>,
}

impl Response {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Sets a header, overwriting any previous value for the key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Encodes the response into wire JSON.
    pub fn to_wire_json(&self) -> Result<String, WireError> {
        let data = String::from_utf8(self.body.clone()).map_err(|_| WireError::NonUtf8Body)?;
        let wire = WireResponse {
            status: self.status,
            data,
            headers: self.headers.clone(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decodes a response from wire JSON.
    pub fn from_wire_json(json: &str) -> Result<Self, WireError> {
        let wire: WireResponse = serde_json::from_str(json)?;
        Ok(Self {
            status: wire.status,
            headers: wire.headers,
            body: wire.data.into_bytes(),
        })
    }

    /// Decodes a response from wire JSON bytes.
    pub fn from_wire_json_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let wire: WireResponse = serde_json::from_slice(bytes)?;
        Ok(Self {
            status: wire.status,
            headers: wire.headers,
            body: wire.data.into_bytes(),
        })
    }

    /// Writes the wire JSON encoding to a file.
    pub fn to_file(&self, path: &Path) -> Result<(), WireError> {
        std::fs::write(path, self.to_wire_json()?)?;
        Ok(())
    }

    /// Reads a response from a wire JSON file.
    pub fn from_file(path: &Path) -> Result<Self, WireError> {
        Self::from_wire_json(&std::fs::read_to_string(path)?)
    }

    /// Reassembles a response from the tunnel channel's two frames:
    /// a headers frame (`HTTP/1.1 <code> ...` plus header lines) and a
    /// content frame carrying the raw body.
    pub fn from_frames(headers_frame: &[u8], content: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(headers_frame)
            .map_err(|_| WireError::MalformedStatusLine("headers frame is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .ok_or_else(|| WireError::MalformedStatusLine("empty headers frame".into()))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| WireError::MalformedStatusLine(status_line.to_string()))?;

        let mut headers = BTreeMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| WireError::MalformedHeader(line.to_string()))?;
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self {
            status,
            headers,
            body: content.to_vec(),
        })
    }

    /// Produces the (headers, content) frame pair read back by the
    /// tunnel channel. The inverse of [`Response::from_frames`].
    pub fn to_frames(&self) -> (Vec<u8>, Vec<u8>) {
        let mut head = format!("HTTP/1.1 {} \r\n", self.status);
        for (key, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        (head.into_bytes(), self.body.clone())
    }
}

/// Returns the scheme + authority prefix of an absolute URL.
fn base_of(url: &str) -> &str {
    let authority_start = match url.find("://") {
        Some(idx) => idx + 3,
        None => return url,
    };
    match url[authority_start..].find(|c| matches!(c, '/' | '?' | '#')) {
        Some(idx) => &url[..authority_start + idx],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let req = Request::get("http://calc:8080/add/1/2?x=1");
        assert_eq!(req.base_url(), "http://calc:8080");
        assert_eq!(req.path(), "/add/1/2?x=1");

        let req = Request::get("http://calc");
        assert_eq!(req.base_url(), "http://calc");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_replace_base_url() {
        let mut req = Request::get("http://calc/add/7/8");
        req.replace_base_url("http://10.0.0.3:80/")
            .expect("should replace");
        assert_eq!(req.url, "http://10.0.0.3:80/add/7/8");
    }

    #[test]
    fn test_replace_base_url_requires_scheme() {
        let mut req = Request::get("http://calc/add/1/2");
        let err = req.replace_base_url("10.0.0.3:80");
        assert!(matches!(err, Err(WireError::MissingScheme(_))));
    }

    #[test]
    fn test_request_wire_roundtrip() {
        let req = Request::post("http://svc/items?a=11", "x=77&y=88")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_header("X-Trace", "abc");

        let json = req.to_wire_json().expect("should encode");
        let parsed = Request::from_wire_json(&json).expect("should decode");

        assert_eq!(parsed, req);
    }

    #[test]
    fn test_request_wire_roundtrip_empty() {
        let req = Request::get("http://svc");
        let parsed = Request::from_wire_json(&req.to_wire_json().expect("encode"))
            .expect("decode");
        assert!(parsed.headers.is_empty());
        assert!(parsed.body.is_empty());
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_request_header_case_preserved() {
        let req = Request::get("http://svc").with_header("User-Agent", "my-app/0.0.1");
        let parsed = Request::from_wire_json(&req.to_wire_json().expect("encode"))
            .expect("decode");
        assert_eq!(parsed.headers.get("User-Agent").map(String::as_str), Some("my-app/0.0.1"));
    }

    #[test]
    fn test_request_binary_body_rejected() {
        let req = Request::post("http://svc", vec![0xff, 0xfe, 0x80]);
        assert!(matches!(req.to_wire_json(), Err(WireError::NonUtf8Body)));
    }

    #[test]
    fn test_request_duplicate_header_last_write_wins() {
        let req = Request::get("http://svc")
            .with_header("accept-encoding", "gzip")
            .with_header("accept-encoding", "identity");
        assert_eq!(
            req.headers.get("accept-encoding").map(String::as_str),
            Some("identity")
        );
    }

    #[test]
    fn test_raw_http_serialization() {
        let req = Request::post("http://calc/add/1/2", "payload")
            .with_header("Host", "calc");
        let raw = req.to_raw_http();
        let text = String::from_utf8(raw).expect("raw stream is ascii here");
        assert!(text.starts_with("POST /add/1/2 HTTP/1.1\r\n"));
        assert!(text.contains("Host: calc\r\n"));
        assert!(text.ends_with("\r\n\r\npayload"));
    }

    #[test]
    fn test_response_wire_roundtrip() {
        let res = Response::new(200)
            .with_header("Content-Type", "text/plain")
            .with_body("15");
        let parsed = Response::from_wire_json(&res.to_wire_json().expect("encode"))
            .expect("decode");
        assert_eq!(parsed, res);
        assert_eq!(parsed.text(), "15");
    }

    #[test]
    fn test_response_frames_roundtrip() {
        let res = Response::new(404)
            .with_header("Content-Length", "9")
            .with_body("not found");
        let (head, content) = res.to_frames();
        let parsed = Response::from_frames(&head, &content).expect("should parse");
        assert_eq!(parsed, res);
    }

    #[test]
    fn test_response_from_frames_reason_phrase() {
        let head = b"HTTP/1.1 200 OK\r\nServer: gunicorn\r\n";
        let res = Response::from_frames(head, b"3").expect("should parse");
        assert_eq!(res.status, 200);
        assert_eq!(res.headers.get("Server").map(String::as_str), Some("gunicorn"));
        assert_eq!(res.body, b"3");
    }

    #[test]
    fn test_response_from_frames_bad_status_line() {
        let err = Response::from_frames(b"garbage", b"");
        assert!(matches!(err, Err(WireError::MalformedStatusLine(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let req_path = dir.path().join("req.json");
        let res_path = dir.path().join("res.json");

        let req = Request::get("http://svc/a").with_header("X", "1");
        req.to_file(&req_path).expect("write");
        assert_eq!(Request::from_file(&req_path).expect("read"), req);

        let res = Response::new(201).with_body("ok");
        res.to_file(&res_path).expect("write");
        assert_eq!(Response::from_file(&res_path).expect("read"), res);
    }
}
