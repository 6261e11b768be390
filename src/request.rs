//! Inbound request snapshot.
//!
//! The transport layer builds a [`RequestContext`] once per request; matchers
//! only ever read from it.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Read-only process-wide configuration values.
pub type Globals = Map<String, Value>;

/// Mutable key/value store scoped to one server or scenario.
pub type State = Map<String, Value>;

/// Parsed request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(BTreeMap<String, Vec<String>>),
    Text(String),
    Binary(Vec<u8>),
}

impl RequestBody {
    /// Parse raw bytes according to the declared content type. Without a
    /// content type, JSON is attempted before falling back to text.
    pub fn parse(content_type: Option<&str>, raw: &[u8]) -> Self {
        if raw.is_empty() {
            return RequestBody::Empty;
        }
        let content_type = content_type.map(|ct| ct.to_ascii_lowercase());
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => return RequestBody::Binary(raw.to_vec()),
        };

        match content_type.as_deref() {
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                RequestBody::Form(parse_query_string(text))
            }
            Some(ct) if ct.contains("json") => serde_json::from_str(text)
                .map(RequestBody::Json)
                .unwrap_or_else(|_| RequestBody::Text(text.to_string())),
            Some(_) => RequestBody::Text(text.to_string()),
            None => serde_json::from_str(text)
                .map(RequestBody::Json)
                .unwrap_or_else(|_| RequestBody::Text(text.to_string())),
        }
    }

    /// Projection used by body matchers. Form fields with a single value
    /// project to a string, repeated fields to an array.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(value.clone()),
            RequestBody::Form(fields) => Some(multi_map_to_value(fields)),
            RequestBody::Text(text) => Some(Value::String(text.clone())),
            RequestBody::Binary(bytes) => {
                Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
            }
        }
    }
}

/// Immutable snapshot of an inbound request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    /// Upper-cased HTTP method
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Raw query string, as received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    /// Decoded query parameters (repeated keys keep every value)
    pub query: BTreeMap<String, Vec<String>>,
    /// Headers keyed by lower-cased name
    pub headers: BTreeMap<String, Vec<String>>,
    /// Cookies from the `Cookie` header(s)
    pub cookies: BTreeMap<String, String>,
    /// Parsed body
    pub body: RequestBody,
    /// Raw body bytes
    #[serde(skip)]
    pub raw_body: Vec<u8>,
}

impl RequestContext {
    /// Create a request for `method` and `url` (path plus optional query).
    pub fn new(method: &str, url: &str) -> Self {
        let (path, query_string) = match url.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (url.to_string(), None),
        };
        let query = parse_query_string(query_string.as_deref().unwrap_or(""));

        Self {
            method: method.to_uppercase(),
            path,
            query_string,
            query,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            body: RequestBody::Empty,
            raw_body: Vec::new(),
        }
    }

    /// Add a header value. `Cookie` headers are also parsed into cookies.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "cookie" {
            for (key, val) in parse_cookie_header(value) {
                self.cookies.insert(key, val);
            }
        }
        self.headers.entry(name).or_default().push(value.to_string());
        self
    }

    /// Attach a body, parsed with the `Content-Type` header set so far.
    pub fn with_body(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw_body = raw.into();
        self.body = RequestBody::parse(self.header("content-type"), &self.raw_body);
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Path plus the raw query string, exactly as received.
    pub fn url(&self) -> String {
        match &self.query_string {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn query_value(&self, name: &str) -> Option<Value> {
        self.query.get(name).map(|values| multi_value(values))
    }

    pub fn header_value(&self, name: &str) -> Option<Value> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|values| multi_value(values))
    }

    pub fn cookie_value(&self, name: &str) -> Option<Value> {
        self.cookies.get(name).map(|v| Value::String(v.clone()))
    }

    /// Raw body as text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.raw_body).into_owned()
    }
}

fn multi_value(values: &[String]) -> Value {
    match values {
        [single] => Value::String(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::String).collect()),
    }
}

fn multi_map_to_value(map: &BTreeMap<String, Vec<String>>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, values)| (k.clone(), multi_value(values)))
            .collect(),
    )
}

/// Parse a query string into key-value pairs, keeping repeated keys.
pub fn parse_query_string(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (urlencoding_decode(key), urlencoding_decode(value)),
            None => (urlencoding_decode(part), String::new()),
        };
        params.entry(key).or_default().push(value);
    }

    params
}

fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), urlencoding_decode(value.trim().trim_matches('"'))))
        })
        .collect()
}

/// Form/query decoding: `+` is a space.
fn urlencoding_decode(s: &str) -> String {
    decode(s, true)
}

/// Path segment decoding: `+` is kept as is.
pub(crate) fn percent_decode(s: &str) -> String {
    decode(s, false)
}

/// Percent-escapes are decoded as UTF-8 bytes; malformed escapes stay literal.
fn decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
