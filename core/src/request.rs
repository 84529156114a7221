//! Request assembly: URI validation, URL encoding, body encoding and headers.
//!
//! # Design
//! `RequestBuilder` collects the caller's intent and `build` turns it into a
//! `RequestSpec`, failing fast with `InvalidArgument` before anything touches
//! the network. A spec is transport-agnostic; the executor resolves it
//! against a base URL with [`RequestSpec::to_http_request`] on each attempt.
//!
//! The unencoded body is kept next to its encoded form so the executor can
//! log a redacted copy while sending the untouched bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest};
use crate::redact;

pub const APPLICATION_JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

static URI_SAFE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[-a-zA-Z0-9()@:%_$,.~#?&|'"+/=\s]*$"#).expect("URI_SAFE should compile")
});

/// A fully validated request, ready to be resolved against a base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    /// The URI after URL encoding.
    pub uri: String,
    pub accept: String,
    pub content_type: String,
    /// The caller's body, kept for redacted logging.
    pub body: Option<Value>,
    /// The bytes sent over the wire.
    pub encoded_body: Option<String>,
    /// Ordered, unique by case-insensitive name.
    pub headers: Vec<(String, String)>,
    /// Never empty.
    pub expected_status: Vec<u16>,
}

impl RequestSpec {
    /// Join `uri` onto `base_url`. Absolute URIs are used as they are.
    pub fn resolve_url(&self, base_url: &str) -> String {
        join_url(base_url, &self.uri)
    }

    pub fn to_http_request(&self, base_url: &str) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.resolve_url(base_url),
            headers: self.headers.clone(),
            body: self.encoded_body.clone(),
        }
    }

    /// The body as it may appear in logs.
    pub fn redacted_body(&self) -> String {
        redact::redact_optional(self.body.as_ref())
    }

    pub fn expects(&self, status: u16) -> bool {
        self.expected_status.contains(&status)
    }
}

/// Collects the parts of a request. See the module docs.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    uri: String,
    accept: Option<String>,
    content_type: Option<String>,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    expected_status: Vec<u16>,
}

impl RequestBuilder {
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            accept: None,
            content_type: None,
            body: None,
            headers: Vec::new(),
            expected_status: Vec::new(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Media type sent as `Accept`. Defaults to `application/json`.
    pub fn accept(mut self, media_type: impl Into<String>) -> Self {
        self.accept = Some(media_type.into());
        self
    }

    /// Media type of the body. Defaults to the accept type.
    pub fn content_type(mut self, media_type: impl Into<String>) -> Self {
        self.content_type = Some(media_type.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` and use it as the request body.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::InvalidArgument(format!("body is not serializable: {e}")))?;
        Ok(self.body(value))
    }

    /// Add a header. A later header with the same name replaces the value of
    /// an earlier one, keeping its position.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Replace the expected status set. An empty set falls back to the
    /// method's default.
    pub fn expect_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expected_status = codes.into_iter().collect();
        self
    }

    /// Accept `code` in addition to the current (or default) expected set.
    pub fn also_expect(mut self, code: u16) -> Self {
        if self.expected_status.is_empty() {
            self.expected_status
                .push(self.method.default_expected_status());
        }
        if !self.expected_status.contains(&code) {
            self.expected_status.push(code);
        }
        self
    }

    pub fn build(self) -> Result<RequestSpec> {
        validate_uri(&self.uri)?;

        let accept = non_empty(self.accept).unwrap_or_else(|| APPLICATION_JSON.to_string());
        let content_type = non_empty(self.content_type).unwrap_or_else(|| accept.clone());
        let form = is_form_urlencoded(&content_type);

        let uri = if form {
            debug!("form-url-encoded content, URI left as given");
            self.uri
        } else if self.uri.contains('%') {
            debug!(uri = %self.uri, "possible encoding detected in URI, encoder not used");
            self.uri
        } else {
            let encoded = encode_uri(&self.uri);
            debug!(uri = %encoded, "encoded URI");
            encoded
        };

        let encoded_body = match &self.body {
            None => None,
            Some(body) if form => Some(encode_form(body)?),
            Some(body) => Some(body.to_string()),
        };

        let mut headers = Vec::with_capacity(self.headers.len() + 2);
        set_header(&mut headers, "Accept", &accept);
        set_header(&mut headers, "Content-Type", &content_type);
        for (name, value) in &self.headers {
            if name.trim().is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "header name must not be empty (value '{value}')"
                )));
            }
            set_header(&mut headers, name, value);
        }

        let mut expected_status = self.expected_status;
        if expected_status.is_empty() {
            expected_status.push(self.method.default_expected_status());
        }

        Ok(RequestSpec {
            method: self.method,
            uri,
            accept,
            content_type,
            body: self.body,
            encoded_body,
            headers,
            expected_status,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate_uri(uri: &str) -> Result<()> {
    if uri.is_empty() {
        return Err(Error::InvalidArgument("uri is required".to_string()));
    }
    if !URI_SAFE.is_match(uri) {
        return Err(Error::InvalidArgument(format!("uri '{uri}' is not a valid URI")));
    }
    Ok(())
}

fn is_form_urlencoded(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(FORM_URLENCODED))
        .unwrap_or(false)
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(existing) => *existing = (name.to_string(), value.to_string()),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

/// Characters a whole URI keeps as-is: unreserved plus the reserved
/// delimiters and `#`.
fn keep_in_uri(c: char) -> bool {
    c.is_ascii_alphanumeric() || ";,/?:@&=+$-_.!~*'()#".contains(c)
}

/// Characters a single URI component keeps as-is.
fn keep_in_component(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_.!~*'()".contains(c)
}

fn encode_keeping(input: &str, keep: fn(char) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut buf = [0u8; 4];
    for c in input.chars() {
        if keep(c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

/// Percent-encode everything in `uri` that cannot appear in a URI literally,
/// leaving its structure (`/`, `?`, `&`, `=`, ...) intact.
pub fn encode_uri(uri: &str) -> String {
    encode_keeping(uri, keep_in_uri)
}

/// Percent-encode one key or value, keeping only unreserved characters.
pub fn encode_component(component: &str) -> String {
    encode_keeping(component, keep_in_component)
}

/// Encode an object body as `key=value&key=value`.
///
/// Keys are always percent-encoded. Values are too, except for fields named
/// `password` or `secret`, which are sent verbatim.
pub fn encode_form(body: &Value) -> Result<String> {
    let Value::Object(fields) = body else {
        return Err(Error::InvalidArgument(
            "form-url-encoded body must be an object".to_string(),
        ));
    };

    let pairs: Vec<String> = fields
        .iter()
        .map(|(key, value)| {
            let raw = form_value(value);
            let lowered = key.to_ascii_lowercase();
            let value = if lowered == "password" || lowered == "secret" {
                raw
            } else {
                encode_component(&raw)
            };
            format!("{}={}", encode_component(key), value)
        })
        .collect();
    Ok(pairs.join("&"))
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join_url(base_url: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") || base_url.is_empty() {
        return uri.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if uri.starts_with('/') {
        format!("{base}{uri}")
    } else {
        format!("{base}/{uri}")
    }
}

/// Append `query` to `uri`, choosing `?` or `&` depending on whether the
/// URI already carries parameters.
pub fn append_query(uri: &str, query: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_accept_and_content_type_to_json() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/groups").build().unwrap();
        assert_eq!(spec.accept, APPLICATION_JSON);
        assert_eq!(spec.content_type, APPLICATION_JSON);
        assert_eq!(
            spec.headers,
            vec![
                ("Accept".to_string(), APPLICATION_JSON.to_string()),
                ("Content-Type".to_string(), APPLICATION_JSON.to_string()),
            ]
        );
        assert_eq!(spec.expected_status, vec![200]);
        assert!(spec.encoded_body.is_none());
    }

    #[test]
    fn content_type_follows_accept() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/report")
            .accept("text/csv")
            .build()
            .unwrap();
        assert_eq!(spec.content_type, "text/csv");
    }

    #[test]
    fn rejects_empty_and_unsafe_uris() {
        let err = RequestBuilder::new(HttpMethod::Get, "").build().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = RequestBuilder::new(HttpMethod::Get, "/groups/{id}")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn encodes_spaces_and_pipes_but_keeps_structure() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/groups?search=web servers|db")
            .build()
            .unwrap();
        assert_eq!(spec.uri, "/groups?search=web%20servers%7Cdb");
    }

    #[test]
    fn leaves_already_encoded_uri_alone() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/groups?search=a%20b c")
            .build()
            .unwrap();
        assert_eq!(spec.uri, "/groups?search=a%20b c");
    }

    #[test]
    fn form_content_skips_uri_encoding() {
        let spec = RequestBuilder::new(HttpMethod::Post, "/oauth/token?scope=read write")
            .content_type(FORM_URLENCODED)
            .body(json!({"grant_type": "client_credentials"}))
            .build()
            .unwrap();
        assert_eq!(spec.uri, "/oauth/token?scope=read write");
        assert_eq!(spec.accept, APPLICATION_JSON);
        assert_eq!(spec.content_type, FORM_URLENCODED);
    }

    #[test]
    fn json_body_is_serialized_in_field_order() {
        let spec = RequestBuilder::new(HttpMethod::Post, "/groups")
            .body(json!({"name": "ops", "path": "ops", "visibility": "private"}))
            .build()
            .unwrap();
        assert_eq!(
            spec.encoded_body.as_deref(),
            Some(r#"{"name":"ops","path":"ops","visibility":"private"}"#)
        );
        assert_eq!(spec.expected_status, vec![201]);
    }

    #[test]
    fn form_body_leaves_password_and_secret_unencoded() {
        let body = json!({
            "user name": "a b",
            "password": "p&ss=word",
            "Secret": "s/t",
            "scope": "read write",
            "count": 3
        });
        let encoded = encode_form(&body).unwrap();
        assert_eq!(
            encoded,
            "user%20name=a%20b&password=p&ss=word&Secret=s/t&scope=read%20write&count=3"
        );
    }

    #[test]
    fn form_values_keep_unreserved_punctuation() {
        let body = json!({"note": "a!b*(c)'~", "path": "x/y?z", "rate": "50%"});
        assert_eq!(
            encode_form(&body).unwrap(),
            "note=a!b*(c)'~&path=x%2Fy%3Fz&rate=50%25"
        );
        assert_eq!(encode_component("é ü"), "%C3%A9%20%C3%BC");
    }

    #[test]
    fn form_body_must_be_an_object() {
        let err = RequestBuilder::new(HttpMethod::Post, "/token")
            .content_type(FORM_URLENCODED)
            .body(json!(["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn caller_headers_add_and_override_but_never_remove_defaults() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/projects")
            .header("Authorization", "Bearer t")
            .header("accept", "application/xml")
            .header("Authorization", "Bearer u")
            .build()
            .unwrap();
        assert_eq!(
            spec.headers,
            vec![
                ("accept".to_string(), "application/xml".to_string()),
                ("Content-Type".to_string(), APPLICATION_JSON.to_string()),
                ("Authorization".to_string(), "Bearer u".to_string()),
            ]
        );
    }

    #[test]
    fn also_expect_extends_the_default_set() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/groups/9")
            .also_expect(404)
            .build()
            .unwrap();
        assert_eq!(spec.expected_status, vec![200, 404]);

        let spec = RequestBuilder::new(HttpMethod::Post, "/jobs/1/launch")
            .expect_status([202])
            .also_expect(404)
            .build()
            .unwrap();
        assert_eq!(spec.expected_status, vec![202, 404]);
    }

    #[test]
    fn empty_expected_set_falls_back_to_method_default() {
        let spec = RequestBuilder::new(HttpMethod::Delete, "/groups/1")
            .expect_status([])
            .build()
            .unwrap();
        assert_eq!(spec.expected_status, vec![204]);
    }

    #[test]
    fn resolves_against_base_url() {
        let spec = RequestBuilder::new(HttpMethod::Get, "/api/v4/groups").build().unwrap();
        assert_eq!(
            spec.resolve_url("https://gitlab.test/"),
            "https://gitlab.test/api/v4/groups"
        );

        let spec = RequestBuilder::new(HttpMethod::Get, "jobs").build().unwrap();
        assert_eq!(spec.resolve_url("https://awx.test"), "https://awx.test/jobs");

        let spec = RequestBuilder::new(HttpMethod::Get, "https://other.test/x")
            .build()
            .unwrap();
        assert_eq!(spec.resolve_url("https://awx.test"), "https://other.test/x");
    }

    #[test]
    fn append_query_picks_separator() {
        assert_eq!(append_query("/groups", "page=2"), "/groups?page=2");
        assert_eq!(append_query("/groups?search=x", "page=2"), "/groups?search=x&page=2");
    }
}
