//! Outgoing response description and the actions that fill it in.
//!
//! A [`ResponseBuilder`] is an ordered list of [`RespondAction`]s. Once an
//! expectation matches, its builder runs every action in order against the
//! [`ResponseSpec`] owned by the transport layer.

use crate::error::{MockError, Result};
use crate::request::{Globals, RequestContext, State};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ResponseBody {
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Text(text) => text.as_bytes(),
            ResponseBody::Binary(bytes) => bytes,
        }
    }
}

/// Cookie attributes for a `Set-Cookie` directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CookieDirective {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl CookieDirective {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        let opts = &self.options;
        if let Some(path) = &opts.path {
            out.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &opts.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = opts.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(same_site) = &opts.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        if opts.secure {
            out.push_str("; Secure");
        }
        if opts.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// The response being built for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSpec {
    pub status: u16,
    /// Header name/value pairs in insertion order; names may repeat.
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<CookieDirective>,
    pub body: Option<ResponseBody>,
    /// Total delay applied while building the response
    #[serde(with = "duration_ms")]
    pub delay: Duration,
    pub redirect: Option<String>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
            delay: Duration::ZERO,
            redirect: None,
        }
    }
}

impl ResponseSpec {
    /// All values of a header (case-insensitive).
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    /// Replace every value of a header.
    pub fn set_header(&mut self, name: &str, values: &[String]) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        for value in values {
            self.headers.push((name.to_string(), value.clone()));
        }
    }

    /// Body as text (lossy for binary bodies).
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b.as_bytes()).into_owned())
    }

    /// Headers to put on the wire, including rendered cookies.
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        headers.extend(
            self.cookies
                .iter()
                .map(|c| ("Set-Cookie".to_string(), c.to_header_value())),
        );
        headers
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Everything a response action can see. Only `res` is writable.
pub struct ActionContext<'a> {
    pub req: &'a RequestContext,
    /// Path parameters captured while matching
    pub params: &'a BTreeMap<String, String>,
    pub globals: &'a Globals,
    pub state: &'a State,
    /// Remaining count of the matched expectation, before consumption
    pub times: Option<u32>,
    pub res: &'a mut ResponseSpec,
    pub templates: &'a TemplateEngine,
}

/// A side-effecting step that fills in the response.
#[async_trait]
pub trait RespondAction: Send + Sync {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()>;
}

pub struct SetStatusAction(pub u16);

#[async_trait]
impl RespondAction for SetStatusAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.res.status = self.0;
        Ok(())
    }
}

pub struct SetHeaderAction {
    pub name: String,
    pub values: Vec<String>,
}

#[async_trait]
impl RespondAction for SetHeaderAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.res.set_header(&self.name, &self.values);
        Ok(())
    }
}

pub struct SetCookieAction(pub CookieDirective);

#[async_trait]
impl RespondAction for SetCookieAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.res.cookies.retain(|c| c.name != self.0.name);
        ctx.res.cookies.push(self.0.clone());
        Ok(())
    }
}

/// Body input. Only text and binary values are ever written.
#[derive(Debug, Clone)]
pub enum BodyInput {
    Text(String),
    Binary(Vec<u8>),
    Other(Value),
}

impl From<&str> for BodyInput {
    fn from(text: &str) -> Self {
        BodyInput::Text(text.to_string())
    }
}

impl From<String> for BodyInput {
    fn from(text: String) -> Self {
        BodyInput::Text(text)
    }
}

impl From<Vec<u8>> for BodyInput {
    fn from(bytes: Vec<u8>) -> Self {
        BodyInput::Binary(bytes)
    }
}

impl From<&[u8]> for BodyInput {
    fn from(bytes: &[u8]) -> Self {
        BodyInput::Binary(bytes.to_vec())
    }
}

impl From<Value> for BodyInput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => BodyInput::Text(text),
            other => BodyInput::Other(other),
        }
    }
}

pub struct SetBodyAction(pub BodyInput);

#[async_trait]
impl RespondAction for SetBodyAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        match &self.0 {
            BodyInput::Text(text) => ctx.res.body = Some(ResponseBody::Text(text.clone())),
            BodyInput::Binary(bytes) => ctx.res.body = Some(ResponseBody::Binary(bytes.clone())),
            BodyInput::Other(value) => {
                debug!(value = %value, "Ignoring body that is neither text nor binary");
            }
        }
        Ok(())
    }
}

/// Serialize a JSON body and default the content type.
pub struct SetJsonAction(pub Value);

#[async_trait]
impl RespondAction for SetJsonAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        match serde_json::to_string(&self.0) {
            Ok(body) => {
                if ctx.res.header("content-type").is_none() {
                    ctx.res
                        .set_header("Content-Type", &["application/json".to_string()]);
                }
                ctx.res.body = Some(ResponseBody::Text(body));
            }
            Err(e) => warn!(error = %e, "Failed to serialize JSON body"),
        }
        Ok(())
    }
}

/// Suspend before later actions run. A range picks a random delay per request.
pub struct DelayAction {
    pub min: Duration,
    pub max: Duration,
}

impl DelayAction {
    fn pick(&self) -> Duration {
        if self.max > self.min {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let ms = rng.gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
            Duration::from_millis(ms)
        } else {
            self.min
        }
    }
}

#[async_trait]
impl RespondAction for DelayAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let delay = self.pick();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Applying delay");
            tokio::time::sleep(delay).await;
            ctx.res.delay += delay;
        }
        Ok(())
    }
}

pub struct RedirectAction {
    pub location: String,
    pub status: u16,
}

#[async_trait]
impl RespondAction for RedirectAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        ctx.res.status = self.status;
        ctx.res.set_header("Location", &[self.location.clone()]);
        ctx.res.redirect = Some(self.location.clone());
        Ok(())
    }
}

/// Template source for [`TemplateAction`].
#[derive(Debug, Clone)]
pub enum TemplateBody {
    Text(String),
    Json(Value),
}

/// Render a Handlebars body against the request, state and globals.
pub struct TemplateAction(pub TemplateBody);

#[async_trait]
impl RespondAction for TemplateAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let rendered = match &self.0 {
            TemplateBody::Text(template) => ctx
                .templates
                .render(template, ctx)
                .map(ResponseBody::Text),
            TemplateBody::Json(template) => ctx
                .templates
                .render_json(template, ctx)
                .and_then(|value| {
                    serde_json::to_string(&value).map_err(|e| MockError::Template(e.to_string()))
                })
                .map(ResponseBody::Text),
        };

        match rendered {
            Ok(body) => {
                let is_json = matches!(self.0, TemplateBody::Json(_));
                if is_json && ctx.res.header("content-type").is_none() {
                    ctx.res
                        .set_header("Content-Type", &["application/json".to_string()]);
                }
                ctx.res.body = Some(body);
            }
            Err(e) => warn!(error = %e, "Template rendering failed, leaving body unchanged"),
        }
        Ok(())
    }
}

/// Dynamic response function.
pub type ResponseFn =
    Arc<dyn Fn(&ActionContext<'_>) -> anyhow::Result<ResponseBuilder> + Send + Sync>;

/// Compute the response from the context, then run the returned builder.
pub struct RespondWithAction(pub ResponseFn);

#[async_trait]
impl RespondAction for RespondWithAction {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let builder = (self.0)(ctx).map_err(MockError::Action)?;
        builder.execute(ctx).await
    }
}

/// Ordered list of response actions.
#[derive(Clone, Default)]
pub struct ResponseBuilder {
    actions: Vec<Arc<dyn RespondAction>>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a custom action.
    pub fn action(mut self, action: impl RespondAction + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn status(self, status: u16) -> Self {
        self.action(SetStatusAction(status))
    }

    pub fn header(self, name: &str, value: &str) -> Self {
        self.header_values(name, vec![value.to_string()])
    }

    pub fn header_values(self, name: &str, values: Vec<String>) -> Self {
        self.action(SetHeaderAction {
            name: name.to_string(),
            values,
        })
    }

    pub fn cookie(self, name: &str, value: &str) -> Self {
        self.cookie_with(name, value, CookieOptions::default())
    }

    pub fn cookie_with(self, name: &str, value: &str, options: CookieOptions) -> Self {
        self.action(SetCookieAction(CookieDirective {
            name: name.to_string(),
            value: value.to_string(),
            options,
        }))
    }

    pub fn body(self, body: impl Into<BodyInput>) -> Self {
        self.action(SetBodyAction(body.into()))
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(BodyInput::Text(text.into()))
    }

    pub fn bytes(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body(BodyInput::Binary(bytes.into()))
    }

    pub fn json(self, value: impl Into<Value>) -> Self {
        self.action(SetJsonAction(value.into()))
    }

    pub fn delay(self, delay: Duration) -> Self {
        self.action(DelayAction {
            min: delay,
            max: delay,
        })
    }

    pub fn delay_between(self, min: Duration, max: Duration) -> Self {
        self.action(DelayAction { min, max })
    }

    /// `302 Found` with a `Location` header.
    pub fn redirect(self, location: &str) -> Self {
        self.action(RedirectAction {
            location: location.to_string(),
            status: 302,
        })
    }

    pub fn template(self, template: &str) -> Self {
        self.action(TemplateAction(TemplateBody::Text(template.to_string())))
    }

    pub fn json_template(self, template: Value) -> Self {
        self.action(TemplateAction(TemplateBody::Json(template)))
    }

    pub fn respond_with<F>(self, f: F) -> Self
    where
        F: Fn(&ActionContext<'_>) -> anyhow::Result<ResponseBuilder> + Send + Sync + 'static,
    {
        self.action(RespondWithAction(Arc::new(f)))
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action in order.
    pub async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        for action in &self.actions {
            action.execute(ctx).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResponseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuilder")
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl From<&str> for ResponseBuilder {
    fn from(text: &str) -> Self {
        ResponseBuilder::new().text(text)
    }
}

impl From<String> for ResponseBuilder {
    fn from(text: String) -> Self {
        ResponseBuilder::new().text(text)
    }
}

impl From<Value> for ResponseBuilder {
    fn from(value: Value) -> Self {
        response(value)
    }
}

/// Shorthand: strings become a text body, anything else a JSON body.
pub fn response(value: impl Into<Value>) -> ResponseBuilder {
    match value.into() {
        Value::String(text) => ResponseBuilder::new().text(text),
        Value::Null => ResponseBuilder::new(),
        other => ResponseBuilder::new().json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        req: RequestContext,
        params: BTreeMap<String, String>,
        globals: Globals,
        state: State,
        templates: TemplateEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let mut params = BTreeMap::new();
            params.insert("id".to_string(), "7".to_string());
            let mut state = State::new();
            state.insert("locale".to_string(), json!("en-gb"));
            Self {
                req: RequestContext::new("GET", "/users/7?page=2"),
                params,
                globals: Globals::new(),
                state,
                templates: TemplateEngine::new(),
            }
        }

        async fn run(&self, builder: &ResponseBuilder) -> Result<ResponseSpec> {
            let mut res = ResponseSpec::default();
            let mut ctx = ActionContext {
                req: &self.req,
                params: &self.params,
                globals: &self.globals,
                state: &self.state,
                times: None,
                res: &mut res,
                templates: &self.templates,
            };
            builder.execute(&mut ctx).await?;
            Ok(res)
        }
    }

    #[tokio::test]
    async fn test_status_header_and_body() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new()
            .status(201)
            .header("X-Trace", "abc")
            .header_values("Vary", vec!["Accept".into(), "Cookie".into()])
            .text("created");

        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.status, 201);
        assert_eq!(res.header("x-trace"), Some("abc"));
        assert_eq!(res.header_values("vary"), vec!["Accept", "Cookie"]);
        assert_eq!(res.body_text().as_deref(), Some("created"));
    }

    #[test]
    fn test_string_shorthand_is_text() {
        let fixture = Fixture::new();
        let res = tokio_test::block_on(fixture.run(&response("hello"))).unwrap();
        assert_eq!(res.body_text().as_deref(), Some("hello"));
        assert_eq!(res.header("content-type"), None);

        let res = tokio_test::block_on(fixture.run(&response(json!({"a": 1})))).unwrap();
        assert_eq!(res.body_text().as_deref(), Some(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_header_replaces_previous_values() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new()
            .header("X-Mode", "a")
            .header("x-mode", "b");

        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.header_values("X-Mode"), vec!["b"]);
    }

    #[tokio::test]
    async fn test_non_text_body_is_ignored() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new().text("kept").body(json!({"a": 1}));

        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.body_text().as_deref(), Some("kept"));

        let builder = ResponseBuilder::new().bytes(vec![1u8, 2, 3]);
        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.body, Some(ResponseBody::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn test_response_shorthand() {
        let fixture = Fixture::new();

        let res = fixture.run(&response("test")).await.unwrap();
        assert_eq!(res.body_text().as_deref(), Some("test"));
        assert_eq!(res.header("content-type"), None);

        let res = fixture.run(&response(3)).await.unwrap();
        assert_eq!(res.body_text().as_deref(), Some("3"));
        assert_eq!(res.header("content-type"), Some("application/json"));

        let res = fixture.run(&response(json!({"id": "1"}))).await.unwrap();
        assert_eq!(res.body_text().as_deref(), Some(r#"{"id":"1"}"#));
    }

    #[tokio::test]
    async fn test_cookie_and_redirect() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new()
            .cookie_with(
                "SessionId",
                "abc",
                CookieOptions {
                    path: Some("/".to_string()),
                    http_only: true,
                    ..Default::default()
                },
            )
            .redirect("http://localhost:6002/en-gb/todos");

        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.status, 302);
        assert_eq!(res.header("location"), Some("http://localhost:6002/en-gb/todos"));
        assert_eq!(
            res.wire_headers().last(),
            Some(&(
                "Set-Cookie".to_string(),
                "SessionId=abc; Path=/; HttpOnly".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_delay_suspends_before_later_actions() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new()
            .delay(Duration::from_millis(50))
            .text("late");

        let started = std::time::Instant::now();
        let res = fixture.run(&builder).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(res.delay, Duration::from_millis(50));
        assert_eq!(res.body_text().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_respond_with_uses_context() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new().respond_with(|ctx| {
            Ok(response(json!({
                "id": ctx.params.get("id"),
                "locale": ctx.state.get("locale"),
            })))
        });

        let res = fixture.run(&builder).await.unwrap();
        let body: Value = serde_json::from_str(&res.body_text().unwrap()).unwrap();
        assert_eq!(body, json!({"id": "7", "locale": "en-gb"}));
    }

    #[tokio::test]
    async fn test_respond_with_error_propagates() {
        let fixture = Fixture::new();
        let builder =
            ResponseBuilder::new().respond_with(|_| Err(anyhow::anyhow!("backend exploded")));

        let err = fixture.run(&builder).await.unwrap_err();
        assert!(matches!(err, MockError::Action(_)));
        assert!(err.to_string().contains("backend exploded"));
    }

    #[tokio::test]
    async fn test_template_body() {
        let fixture = Fixture::new();
        let builder = ResponseBuilder::new()
            .template("user {{params.id}} page {{query.page}} ({{state.locale}})");

        let res = fixture.run(&builder).await.unwrap();
        assert_eq!(res.body_text().as_deref(), Some("user 7 page 2 (en-gb)"));
    }
}
