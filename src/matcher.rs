//! Context matchers.
//!
//! Each [`ContextMatcher`] projects one part of the request context (path,
//! query parameter, state entry, ...) and delegates to a [`ValueMatcher`].
//! The matchers given to one `when(...)` call are ANDed in order; path
//! matchers run first in that order and populate the captured path params.

use crate::error::{MockError, Result};
use crate::request::{percent_decode, Globals, RequestContext, State};
use crate::response::ResponseSpec;
use crate::value::ValueMatcher;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything a context matcher can look at.
pub struct MatchContext<'a> {
    pub req: &'a RequestContext,
    /// Path parameters captured so far
    pub params: BTreeMap<String, String>,
    pub globals: &'a Globals,
    pub state: &'a State,
    /// Remaining count of the expectation being evaluated (`None` = unlimited)
    pub times: Option<u32>,
    /// The finished response, only present for verify matchers
    pub res: Option<&'a ResponseSpec>,
}

impl<'a> MatchContext<'a> {
    pub fn new(req: &'a RequestContext, globals: &'a Globals, state: &'a State) -> Self {
        Self {
            req,
            params: BTreeMap::new(),
            globals,
            state,
            times: None,
            res: None,
        }
    }
}

/// Why a context matcher rejected a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchFailure {
    pub kind: &'static str,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.kind, self.expected, self.actual
        )
    }
}

/// Path template with `:name` (or `{name}`) segments.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':').filter(|n| !n.is_empty()) {
                    TemplateSegment::Param(name.to_string())
                } else if let Some(name) = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .filter(|n| !n.is_empty())
                {
                    TemplateSegment::Param(name.to_string())
                } else {
                    TemplateSegment::Literal(segment.to_string())
                }
            })
            .collect();

        Self {
            source: template.to_string(),
            segments,
        }
    }

    /// Match the full path, returning captured params (percent-decoded).
    /// One trailing slash on the request path is ignored.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() && !self.source.ends_with('/') => trimmed,
            _ => path,
        };
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode(part));
                }
            }
        }
        Some(params)
    }
}

/// How a path is matched.
#[derive(Clone)]
pub enum PathPattern {
    /// Literal path, optionally with named segments
    Template(PathTemplate),
    /// Regex search; capture groups become params "0", "1", ... plus named groups
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Prefix(String),
    /// Any value matcher over the path string
    Value(ValueMatcher),
}

impl PathPattern {
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(PathPattern::Regex)
            .map_err(|e| MockError::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub fn glob(pattern: &str) -> Result<Self> {
        globset::Glob::new(pattern)
            .map(|g| PathPattern::Glob(g.compile_matcher()))
            .map_err(|e| MockError::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub fn prefix(prefix: &str) -> Self {
        PathPattern::Prefix(prefix.to_string())
    }

    fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        match self {
            PathPattern::Template(template) => template.matches(path),
            PathPattern::Regex(regex) => {
                let captures = regex.captures(path)?;
                let mut params = BTreeMap::new();
                for (i, cap) in captures.iter().enumerate().skip(1) {
                    if let Some(m) = cap {
                        params.insert((i - 1).to_string(), m.as_str().to_string());
                    }
                }
                for name in regex.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        params.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                Some(params)
            }
            PathPattern::Glob(glob) => glob.is_match(path).then(BTreeMap::new),
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()).then(BTreeMap::new),
            PathPattern::Value(matcher) => matcher
                .matches(Some(&Value::String(path.to_string())))
                .then(BTreeMap::new),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Template(t) => write!(f, "{}", t.source),
            PathPattern::Regex(r) => write!(f, "/{}/", r.as_str()),
            PathPattern::Glob(g) => write!(f, "glob {}", g.glob().glob()),
            PathPattern::Prefix(p) => write!(f, "{}*", p),
            PathPattern::Value(m) => write!(f, "{}", m),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(template: &str) -> Self {
        PathPattern::Template(PathTemplate::parse(template))
    }
}

impl From<String> for PathPattern {
    fn from(template: String) -> Self {
        PathPattern::from(template.as_str())
    }
}

impl From<Regex> for PathPattern {
    fn from(regex: Regex) -> Self {
        PathPattern::Regex(regex)
    }
}

impl From<ValueMatcher> for PathPattern {
    fn from(matcher: ValueMatcher) -> Self {
        PathPattern::Value(matcher)
    }
}

/// Custom context predicate.
pub type ContextPredicate = Arc<dyn Fn(&MatchContext<'_>) -> bool + Send + Sync>;

/// Consumption constraint.
#[derive(Debug, Clone)]
pub enum TimesMatcher {
    /// Available for up to n matches
    Count(u32),
    /// Matcher over the remaining count (`u64::MAX` when unlimited)
    Matching(ValueMatcher),
}

/// A predicate over the full request context.
#[derive(Clone)]
pub enum ContextMatcher {
    Path(PathPattern),
    Method(ValueMatcher),
    /// Exact path plus raw query string
    Url(String),
    Query(String, ValueMatcher),
    Header(String, ValueMatcher),
    Cookie(String, ValueMatcher),
    PathParam(String, ValueMatcher),
    /// Parsed body (JSON, form fields, or text)
    Body(ValueMatcher),
    /// Raw body text
    RawBody(ValueMatcher),
    Global(String, ValueMatcher),
    State(String, ValueMatcher),
    Times(TimesMatcher),
    /// Status of the finished response
    Status(ValueMatcher),
    Custom(ContextPredicate),
}

impl ContextMatcher {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextMatcher::Path(_) => "path",
            ContextMatcher::Method(_) => "method",
            ContextMatcher::Url(_) => "url",
            ContextMatcher::Query(..) => "query",
            ContextMatcher::Header(..) => "header",
            ContextMatcher::Cookie(..) => "cookie",
            ContextMatcher::PathParam(..) => "path_param",
            ContextMatcher::Body(_) => "body",
            ContextMatcher::RawBody(_) => "raw_body",
            ContextMatcher::Global(..) => "global",
            ContextMatcher::State(..) => "state",
            ContextMatcher::Times(_) => "times",
            ContextMatcher::Status(_) => "status",
            ContextMatcher::Custom(_) => "custom",
        }
    }

    /// Check the matcher, recording captured path params in `ctx`.
    pub fn check(&self, ctx: &mut MatchContext<'_>) -> Result<(), MatchFailure> {
        let kind = self.kind();
        match self {
            ContextMatcher::Path(pattern) => match pattern.captures(&ctx.req.path) {
                Some(params) => {
                    ctx.params.extend(params);
                    Ok(())
                }
                None => Err(MatchFailure {
                    kind,
                    expected: pattern.to_string(),
                    actual: ctx.req.path.clone(),
                }),
            },
            ContextMatcher::Method(m) => {
                expect(kind, m, Some(Value::String(ctx.req.method.clone())))
            }
            ContextMatcher::Url(url) => {
                let actual = ctx.req.url();
                if &actual == url {
                    Ok(())
                } else {
                    Err(MatchFailure {
                        kind,
                        expected: url.clone(),
                        actual,
                    })
                }
            }
            ContextMatcher::Query(name, m) => {
                expect_named(kind, name, m, ctx.req.query_value(name))
            }
            ContextMatcher::Header(name, m) => {
                expect_named(kind, name, m, ctx.req.header_value(name))
            }
            ContextMatcher::Cookie(name, m) => {
                expect_named(kind, name, m, ctx.req.cookie_value(name))
            }
            ContextMatcher::PathParam(name, m) => {
                let actual = ctx.params.get(name).map(|v| Value::String(v.clone()));
                expect_named(kind, name, m, actual)
            }
            ContextMatcher::Body(m) => expect(kind, m, ctx.req.body.to_value()),
            ContextMatcher::RawBody(m) => {
                let actual = (!ctx.req.raw_body.is_empty())
                    .then(|| Value::String(ctx.req.body_text()));
                expect(kind, m, actual)
            }
            ContextMatcher::Global(key, m) => {
                expect_named(kind, key, m, ctx.globals.get(key).cloned())
            }
            ContextMatcher::State(key, m) => expect_named(kind, key, m, ctx.state.get(key).cloned()),
            ContextMatcher::Times(TimesMatcher::Count(_)) => {
                if ctx.times == Some(0) {
                    Err(MatchFailure {
                        kind,
                        expected: "remaining > 0".to_string(),
                        actual: "0".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            ContextMatcher::Times(TimesMatcher::Matching(m)) => {
                let remaining = ctx.times.map(u64::from).unwrap_or(u64::MAX);
                expect(kind, m, Some(Value::from(remaining)))
            }
            ContextMatcher::Status(m) => {
                expect(kind, m, ctx.res.map(|res| Value::from(res.status)))
            }
            ContextMatcher::Custom(f) => {
                if f(ctx) {
                    Ok(())
                } else {
                    Err(MatchFailure {
                        kind,
                        expected: "<function>".to_string(),
                        actual: "false".to_string(),
                    })
                }
            }
        }
    }
}

impl fmt::Debug for ContextMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextMatcher::Path(p) => write!(f, "Path({})", p),
            ContextMatcher::Url(u) => write!(f, "Url({})", u),
            ContextMatcher::Query(n, m)
            | ContextMatcher::Header(n, m)
            | ContextMatcher::Cookie(n, m)
            | ContextMatcher::PathParam(n, m)
            | ContextMatcher::Global(n, m)
            | ContextMatcher::State(n, m) => write!(f, "{}({}, {})", self.kind(), n, m),
            ContextMatcher::Method(m)
            | ContextMatcher::Body(m)
            | ContextMatcher::RawBody(m)
            | ContextMatcher::Status(m) => write!(f, "{}({})", self.kind(), m),
            ContextMatcher::Times(t) => write!(f, "times({:?})", t),
            ContextMatcher::Custom(_) => write!(f, "custom(<function>)"),
        }
    }
}

fn describe(actual: &Option<Value>) -> String {
    match actual {
        Some(value) => value.to_string(),
        None => "<absent>".to_string(),
    }
}

fn expect(kind: &'static str, m: &ValueMatcher, actual: Option<Value>) -> Result<(), MatchFailure> {
    if m.matches(actual.as_ref()) {
        Ok(())
    } else {
        Err(MatchFailure {
            kind,
            expected: m.to_string(),
            actual: describe(&actual),
        })
    }
}

fn expect_named(
    kind: &'static str,
    name: &str,
    m: &ValueMatcher,
    actual: Option<Value>,
) -> Result<(), MatchFailure> {
    expect(kind, m, actual).map_err(|mut failure| {
        failure.expected = format!("{} = {}", name, failure.expected);
        failure
    })
}

/// Evaluate matchers in order, stopping at the first rejection.
pub fn check_all(matchers: &[ContextMatcher], ctx: &mut MatchContext<'_>) -> Result<(), MatchFailure> {
    for matcher in matchers {
        matcher.check(ctx)?;
    }
    Ok(())
}

/// Fluent request matcher; expands into a list of context matchers.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    matchers: Vec<ContextMatcher>,
}

/// Start a request matcher. With no further calls it matches any request.
pub fn request() -> RequestMatcher {
    RequestMatcher::default()
}

impl RequestMatcher {
    pub fn path(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.matchers.push(ContextMatcher::Path(pattern.into()));
        self
    }

    /// Literal methods are compared upper-cased.
    pub fn method(mut self, method: impl Into<ValueMatcher>) -> Self {
        let matcher = match method.into() {
            ValueMatcher::Equals(Value::String(m)) => {
                ValueMatcher::Equals(Value::String(m.to_uppercase()))
            }
            other => other,
        };
        self.matchers.push(ContextMatcher::Method(matcher));
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.matchers.push(ContextMatcher::Url(url.to_string()));
        self
    }

    pub fn query(mut self, name: &str, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers
            .push(ContextMatcher::Query(name.to_string(), matcher.into()));
        self
    }

    pub fn header(mut self, name: &str, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers
            .push(ContextMatcher::Header(name.to_string(), matcher.into()));
        self
    }

    pub fn cookie(mut self, name: &str, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers
            .push(ContextMatcher::Cookie(name.to_string(), matcher.into()));
        self
    }

    pub fn path_param(mut self, name: &str, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers
            .push(ContextMatcher::PathParam(name.to_string(), matcher.into()));
        self
    }

    pub fn param(self, name: &str, matcher: impl Into<ValueMatcher>) -> Self {
        self.path_param(name, matcher)
    }

    /// A literal object is matched as a subset of the parsed body.
    pub fn body(mut self, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers
            .push(ContextMatcher::Body(matcher.into().into_subset_if_object()));
        self
    }

    pub fn raw_body(mut self, matcher: impl Into<ValueMatcher>) -> Self {
        self.matchers.push(ContextMatcher::RawBody(matcher.into()));
        self
    }

    pub fn into_matchers(self) -> Vec<ContextMatcher> {
        self.matchers
    }
}

pub fn times(n: u32) -> ContextMatcher {
    ContextMatcher::Times(TimesMatcher::Count(n))
}

pub fn times_matching(matcher: impl Into<ValueMatcher>) -> ContextMatcher {
    ContextMatcher::Times(TimesMatcher::Matching(matcher.into()))
}

pub fn global_param(key: &str, matcher: impl Into<ValueMatcher>) -> ContextMatcher {
    ContextMatcher::Global(key.to_string(), matcher.into())
}

pub fn state_param(key: &str, matcher: impl Into<ValueMatcher>) -> ContextMatcher {
    ContextMatcher::State(key.to_string(), matcher.into())
}

pub fn response_status(matcher: impl Into<ValueMatcher>) -> ContextMatcher {
    ContextMatcher::Status(matcher.into())
}

pub fn custom<F>(f: F) -> ContextMatcher
where
    F: Fn(&MatchContext<'_>) -> bool + Send + Sync + 'static,
{
    ContextMatcher::Custom(Arc::new(f))
}

/// The matchers passed to one `when(...)` call.
///
/// A bare string is a path matcher; tuples combine several inputs.
#[derive(Debug, Clone, Default)]
pub struct MatcherSet(pub Vec<ContextMatcher>);

impl From<&str> for MatcherSet {
    fn from(path: &str) -> Self {
        MatcherSet(vec![ContextMatcher::Path(path.into())])
    }
}

impl From<String> for MatcherSet {
    fn from(path: String) -> Self {
        MatcherSet::from(path.as_str())
    }
}

impl From<RequestMatcher> for MatcherSet {
    fn from(request: RequestMatcher) -> Self {
        MatcherSet(request.matchers)
    }
}

impl From<ContextMatcher> for MatcherSet {
    fn from(matcher: ContextMatcher) -> Self {
        MatcherSet(vec![matcher])
    }
}

impl From<Vec<ContextMatcher>> for MatcherSet {
    fn from(matchers: Vec<ContextMatcher>) -> Self {
        MatcherSet(matchers)
    }
}

impl<A, B> From<(A, B)> for MatcherSet
where
    A: Into<MatcherSet>,
    B: Into<MatcherSet>,
{
    fn from((a, b): (A, B)) -> Self {
        let mut set = a.into();
        set.0.extend(b.into().0);
        set
    }
}

impl<A, B, C> From<(A, B, C)> for MatcherSet
where
    A: Into<MatcherSet>,
    B: Into<MatcherSet>,
    C: Into<MatcherSet>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        let mut set = a.into();
        set.0.extend(b.into().0);
        set.0.extend(c.into().0);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{any_of, is_greater_than_or_equal, matches_object, not};
    use serde_json::json;

    fn check(matchers: impl Into<MatcherSet>, req: &RequestContext) -> Result<BTreeMap<String, String>, MatchFailure> {
        let globals = Globals::new();
        let state = State::new();
        let mut ctx = MatchContext::new(req, &globals, &state);
        check_all(&matchers.into().0, &mut ctx)?;
        Ok(ctx.params)
    }

    fn get(url: &str) -> RequestContext {
        RequestContext::new("GET", url)
    }

    #[test]
    fn test_path_template_ignores_query() {
        let params = check(request().path("/a/:id"), &get("/a/5?x=1")).unwrap();
        assert_eq!(params.get("id"), Some(&"5".to_string()));

        assert!(check(request().path("/a/:id"), &get("/a/5/6")).is_err());
        assert!(check(request().path("/test/:id"), &get("/test")).is_err());
        assert!(check("/test", &get("/test?a=b")).is_ok());
        assert!(check("/test", &get("/invalid")).is_err());
    }

    #[test]
    fn test_path_template_trailing_slash_and_decoding() {
        assert!(check("/test", &get("/test/")).is_ok());
        assert!(check("/test", &get("/test//")).is_err());
        assert!(check("/", &get("/")).is_ok());

        let params = check(request().path("/files/:name"), &get("/files/a%20b%2Bc/")).unwrap();
        assert_eq!(params.get("name"), Some(&"a b+c".to_string()));
        let params = check(request().path("/tags/:tag"), &get("/tags/c+plus")).unwrap();
        assert_eq!(params.get("tag"), Some(&"c+plus".to_string()));
    }

    #[test]
    fn test_brace_template_segments() {
        let params = check("/users/{id}", &get("/users/123")).unwrap();
        assert_eq!(params.get("id"), Some(&"123".to_string()));
        assert!(check("/users/{id}", &get("/users/")).is_err());
    }

    #[test]
    fn test_regex_path_populates_numeric_params() {
        let pattern = PathPattern::regex(r"/test/([0-9])").unwrap();
        let params = check(request().path(pattern.clone()), &get("/test/1")).unwrap();
        assert_eq!(params.get("0"), Some(&"1".to_string()));
        assert!(check(request().path(pattern), &get("/test/invalid")).is_err());

        let named = PathPattern::regex(r"^/orders/(?P<order>\d+)$").unwrap();
        let params = check(request().path(named), &get("/orders/42")).unwrap();
        assert_eq!(params.get("order"), Some(&"42".to_string()));
    }

    #[test]
    fn test_glob_prefix_and_value_paths() {
        let glob = PathPattern::glob("/static/**/*.css").unwrap();
        assert!(check(request().path(glob.clone()), &get("/static/css/site.css")).is_ok());
        assert!(check(request().path(glob), &get("/static/site.js")).is_err());

        assert!(check(request().path(PathPattern::prefix("/api/")), &get("/api/users")).is_ok());

        let any = request().path(any_of(["/any-1", "/any-2"]));
        assert!(check(any.clone(), &get("/any-2")).is_ok());
        assert!(check(any, &get("/any-3")).is_err());
    }

    #[test]
    fn test_path_param() {
        let m = request().path("/test/:id").path_param("id", any_of(["1", "2"]));
        assert!(check(m.clone(), &get("/test/1")).is_ok());
        let failure = check(m, &get("/test/3")).unwrap_err();
        assert_eq!(failure.kind, "path_param");
        assert_eq!(failure.actual, "\"3\"");
    }

    #[test]
    fn test_url_is_order_sensitive() {
        let m = request().url("/test?a=b&b=c");
        assert!(check(m.clone(), &get("/test?a=b&b=c")).is_ok());
        assert!(check(m, &get("/test?b=c&a=b")).is_err());
    }

    #[test]
    fn test_method() {
        let m = request().method("delete");
        assert!(check(m.clone(), &RequestContext::new("DELETE", "/test")).is_ok());
        assert!(check(m, &get("/test")).is_err());

        let m = request().method(crate::value::matches_fn(|v| {
            v.and_then(Value::as_str) == Some("POST")
        }));
        assert!(check(m, &RequestContext::new("POST", "/test")).is_ok());
    }

    #[test]
    fn test_body_subset_for_json_and_form() {
        let m = request().body(json!({"a": "b"}));

        let json_req = RequestContext::new("POST", "/test").with_json(&json!({"a": "b", "c": "d"}));
        assert!(check(m.clone(), &json_req).is_ok());

        let form_req = RequestContext::new("POST", "/test")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=b");
        assert!(check(m.clone(), &form_req).is_ok());

        let wrong = RequestContext::new("POST", "/test").with_json(&json!({"a": "c"}));
        assert!(check(m.clone(), &wrong).is_err());

        let missing = RequestContext::new("POST", "/test").with_json(&json!({"b": "b"}));
        assert!(check(m, &missing).is_err());

        let explicit = request().body(matches_object(json!({"a": "b"})));
        let req = RequestContext::new("POST", "/test").with_json(&json!({"a": "b", "b": "b"}));
        assert!(check(explicit, &req).is_ok());
    }

    #[test]
    fn test_body_numbers_compare_by_value() {
        let req = RequestContext::new("POST", "/orders")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"qty": 2.0, "sku": "A1"}"#);
        assert!(check(request().body(json!({"qty": 2})), &req).is_ok());
        assert!(check(request().body(json!({"qty": 3})), &req).is_err());
    }

    #[test]
    fn test_query() {
        assert!(check(request().query("a", "b"), &get("/test?a=b")).is_ok());
        assert!(check(request().query("a", "b"), &get("/test")).is_err());
        assert!(check(request().query("a", "b"), &get("/test?a=c")).is_err());
        assert!(check(request().query("a", vec!["b", "c"]), &get("/test?a=b&a=c")).is_ok());
        assert!(check(request().query("a", not("b")), &get("/test?a=c")).is_ok());
        assert!(check(request().query("a", not("b")), &get("/test?a=b")).is_err());
    }

    #[test]
    fn test_header_and_cookie() {
        let req = RequestContext::new("POST", "/test")
            .with_header("Authorization", "token")
            .with_header("Accept", "application/json")
            .with_header("Cookie", "a=b")
            .with_header("Cookie", "b=c");

        let m = request()
            .header("authorization", "token")
            .header("ACCEPT", "application/json")
            .cookie("a", "b")
            .cookie("b", "c");
        assert!(check(m, &req).is_ok());

        let failure = check(request().cookie("b", "d"), &req).unwrap_err();
        assert_eq!(failure.to_string(), "cookie: expected b = \"d\", got \"c\"");
        assert!(check(request().header("Authorization", not("token")), &req).is_err());
    }

    #[test]
    fn test_state_and_global_params() {
        let req = get("/test");
        let mut globals = Globals::new();
        globals.insert("testValue".to_string(), json!("something"));
        let mut state = State::new();
        state.insert("a".to_string(), json!("b"));

        let mut ctx = MatchContext::new(&req, &globals, &state);
        assert!(global_param("testValue", "something").check(&mut ctx).is_ok());
        assert!(global_param("testValue", "invalid").check(&mut ctx).is_err());
        assert!(state_param("a", "b").check(&mut ctx).is_ok());
        assert!(state_param("absent", None::<&str>).check(&mut ctx).is_ok());
        assert!(state_param("a", None::<&str>).check(&mut ctx).is_err());
    }

    #[test]
    fn test_times_matching_sees_remaining_count() {
        let req = get("/times");
        let globals = Globals::new();
        let state = State::new();
        let mut ctx = MatchContext::new(&req, &globals, &state);

        let m = times_matching(is_greater_than_or_equal(0.0));
        assert!(m.check(&mut ctx).is_ok());

        ctx.times = Some(0);
        assert!(times(1).check(&mut ctx).is_err());
        assert!(m.check(&mut ctx).is_ok());
    }

    #[test]
    fn test_custom_and_status() {
        let m = custom(|ctx| ctx.req.path == "/test");
        assert!(check(m.clone(), &get("/test")).is_ok());
        assert!(check(m, &get("/invalid")).is_err());

        // No response yet while matching the request.
        assert!(check(response_status(200), &get("/test")).is_err());
    }

    #[test]
    fn test_tuple_matcher_sets() {
        let set: MatcherSet = ("/times", times(1)).into();
        assert_eq!(set.0.len(), 2);

        let set: MatcherSet = (request().path("/x").method("GET"), times(2), state_param("k", 1)).into();
        assert_eq!(set.0.len(), 4);
        assert_eq!(set.0[1].kind(), "method");
    }
}
