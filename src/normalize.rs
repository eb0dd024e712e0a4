//! Framework-agnostic request descriptors

use std::collections::BTreeMap;

use hyper::body::Bytes;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::http::request::Parts;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Host used when a request carries no host information at all
pub const FALLBACK_HOST: &str = "localhost";

/// Header map as recorded: lowercase names, repeated values joined with `, `
pub type HeaderFields = BTreeMap<String, String>;

/// Canonical request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// Uppercase HTTP method
    pub method: String,
    /// Absolute URL including query string
    pub endpoint: String,
    /// Request headers
    pub headers: HeaderFields,
    /// Decoded query parameters
    pub query_params: BTreeMap<String, String>,
    /// Request body in its native shape
    pub body: Value,
}

/// Request shape the normalizer consumes
///
/// Every accessor may come back empty; the normalizer falls through to the
/// next source instead of failing.
pub trait RawRequest {
    /// HTTP method
    fn method(&self) -> Option<&str> {
        None
    }

    /// Explicit protocol (`http` / `https`)
    fn protocol(&self) -> Option<&str> {
        None
    }

    /// Framework-level secure connection flag
    fn secure(&self) -> Option<bool> {
        None
    }

    /// Encryption flag of the underlying transport
    fn transport_encrypted(&self) -> Option<bool> {
        None
    }

    /// Host accessor (may include port)
    fn host(&self) -> Option<&str> {
        None
    }

    /// Single header value by lowercase name
    fn header(&self, name: &str) -> Option<&str>;

    /// All headers
    fn headers(&self) -> HeaderFields;

    /// URL as originally received, before any router rewriting
    fn original_url(&self) -> Option<&str> {
        None
    }

    /// Current URL (path and query)
    fn url(&self) -> Option<&str> {
        None
    }

    /// Already-parsed query parameters
    fn query(&self) -> Option<BTreeMap<String, String>> {
        None
    }

    /// Body in its native shape
    fn body(&self) -> Value {
        Value::Null
    }
}

/// Convert a framework request into a `RequestDescriptor`
pub fn normalize<R: RawRequest + ?Sized>(raw: &R) -> RequestDescriptor {
    let endpoint = resolve_endpoint(raw);
    let path = request_path(raw);

    let query_params = raw.query().unwrap_or_else(|| {
        path.split_once('?')
            .map(|(_, qs)| parse_query(qs))
            .unwrap_or_default()
    });

    let descriptor = RequestDescriptor {
        method: raw.method().unwrap_or("GET").to_ascii_uppercase(),
        endpoint,
        headers: raw.headers(),
        query_params,
        body: raw.body(),
    };

    debug!(method = %descriptor.method, endpoint = %descriptor.endpoint, "Normalized request");
    descriptor
}

/// Resolve `{protocol}://{host}{path}` through the fallback chains
pub fn resolve_endpoint<R: RawRequest + ?Sized>(raw: &R) -> String {
    let protocol = raw
        .protocol()
        .filter(|p| !p.is_empty())
        .map(|p| p.trim_end_matches(':').to_string())
        .unwrap_or_else(|| {
            if raw.secure() == Some(true) || raw.transport_encrypted() == Some(true) {
                "https".to_string()
            } else {
                "http".to_string()
            }
        });

    let host = non_empty(raw.header("x-forwarded-host"))
        .or_else(|| non_empty(raw.host()))
        .or_else(|| non_empty(raw.header("host")))
        .unwrap_or(FALLBACK_HOST);

    let path = request_path(raw);

    if path.starts_with('/') {
        format!("{protocol}://{host}{path}")
    } else {
        format!("{protocol}://{host}/{path}")
    }
}

fn request_path<R: RawRequest + ?Sized>(raw: &R) -> &str {
    non_empty(raw.original_url())
        .or_else(|| non_empty(raw.url()))
        .unwrap_or("/")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Decode an `a=1&b=2` query string; later keys overwrite earlier ones
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| spaced.clone())
}

/// Flatten a `HeaderMap` into recorded header fields
pub fn header_fields(headers: &HeaderMap) -> HeaderFields {
    let mut fields = HeaderFields::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        fields
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    fields
}

/// Interpret raw body bytes the way a framework body parser would
///
/// JSON bodies become JSON values, form bodies become objects, anything
/// else is kept as text. An empty body is `null`.
pub fn body_value(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }

    let content_type = content_type.map(str::to_ascii_lowercase);
    let text = String::from_utf8_lossy(bytes);

    match content_type.as_deref() {
        Some(ct) if ct.contains("application/x-www-form-urlencoded") => Value::Object(
            parse_query(&text)
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        ),
        Some(ct) if !ct.contains("json") => Value::String(text.into_owned()),
        _ => serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(text.into_owned())),
    }
}

/// Plain request fields for adapters that do not hand over an `http` request
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    /// HTTP method
    pub method: Option<String>,
    /// Explicit protocol
    pub protocol: Option<String>,
    /// Secure connection flag
    pub secure: Option<bool>,
    /// Transport encryption flag
    pub encrypted: Option<bool>,
    /// Host accessor
    pub host: Option<String>,
    /// Headers keyed by lowercase name
    pub headers: HeaderFields,
    /// URL before router rewriting
    pub original_url: Option<String>,
    /// Current URL
    pub url: Option<String>,
    /// Parsed query
    pub query: Option<BTreeMap<String, String>>,
    /// Parsed body
    pub body: Value,
}

impl RequestParts {
    /// Request with a method and URL
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Add a header (name is lowercased)
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

impl RawRequest for RequestParts {
    fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    fn secure(&self) -> Option<bool> {
        self.secure
    }

    fn transport_encrypted(&self) -> Option<bool> {
        self.encrypted
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn headers(&self) -> HeaderFields {
        self.headers.clone()
    }

    fn original_url(&self) -> Option<&str> {
        self.original_url.as_deref()
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn query(&self) -> Option<BTreeMap<String, String>> {
        self.query.clone()
    }

    fn body(&self) -> Value {
        self.body.clone()
    }
}

/// View over the head of an `http` request, optionally with a buffered body
pub struct HttpRequestView<'a> {
    parts: &'a Parts,
    body: Option<&'a Bytes>,
    encrypted: Option<bool>,
}

impl<'a> HttpRequestView<'a> {
    /// Wrap request parts; the body reads as `null` until one is attached
    pub fn new(parts: &'a Parts) -> Self {
        Self {
            parts,
            body: None,
            encrypted: None,
        }
    }

    /// Attach a buffered body
    #[must_use]
    pub fn with_body(mut self, body: &'a Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark whether the listener terminated TLS
    #[must_use]
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = Some(encrypted);
        self
    }
}

impl RawRequest for HttpRequestView<'_> {
    fn method(&self) -> Option<&str> {
        Some(self.parts.method.as_str())
    }

    fn protocol(&self) -> Option<&str> {
        self.parts.uri.scheme_str()
    }

    fn transport_encrypted(&self) -> Option<bool> {
        self.encrypted
    }

    fn host(&self) -> Option<&str> {
        self.parts.uri.authority().map(hyper::http::uri::Authority::as_str)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn headers(&self) -> HeaderFields {
        header_fields(&self.parts.headers)
    }

    fn url(&self) -> Option<&str> {
        self.parts.uri.path_and_query().map(hyper::http::uri::PathAndQuery::as_str)
    }

    fn body(&self) -> Value {
        let Some(body) = self.body else {
            return Value::Null;
        };
        let content_type = self
            .parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        body_value(body, content_type)
    }
}
