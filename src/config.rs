//! YAML configuration.
//!
//! Declares globals, settings, default-scope stubs and scenarios. Stubs
//! compile into [`Expectation`]s and scenarios into [`ScenarioConfig`]s.

use crate::error::{MockError, Result};
use crate::expectation::{remove_state, set_state, Expectation};
use crate::matcher::{ContextMatcher, PathPattern};
use crate::request::Globals;
use crate::response::ResponseBuilder;
use crate::scenario::{ScenarioConfig, StateSchema};
use crate::value::{any_of, json_eq, matches_fn, matches_regex, ValueMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Read-only values visible to matchers, templates and callbacks
    #[serde(default)]
    pub globals: Globals,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Response used when nothing matches (built-in JSON 404 otherwise)
    #[serde(default)]
    pub default_response: Option<ResponseDefinition>,

    /// Stubs for the default scope, tried in order
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    /// Scenarios that can be started and stopped at runtime
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_stubs(&self.stubs).map_err(|e| anyhow::anyhow!("Default scope: {}", e))?;

        if let Some(default) = &self.default_response {
            default
                .validate()
                .map_err(|e| anyhow::anyhow!("Default response: {}", e))?;
        }

        let mut ids = HashSet::new();
        for scenario in &self.scenarios {
            if !ids.insert(scenario.id.as_str()) {
                return Err(MockError::DuplicateScenario(scenario.id.clone()).into());
            }
            validate_stubs(&scenario.stubs)
                .map_err(|e| anyhow::anyhow!("Scenario {}: {}", scenario.id, e))?;
            scenario.to_scenario_config()?.validate()?;
        }
        Ok(())
    }

    /// Compile the default-scope stubs, skipping disabled ones.
    pub fn expectations(&self) -> Result<Vec<Expectation>> {
        compile_stubs(&self.stubs)
    }

    /// Compile the declared scenarios.
    pub fn scenario_configs(&self) -> Result<Vec<ScenarioConfig>> {
        self.scenarios
            .iter()
            .map(ScenarioDefinition::to_scenario_config)
            .collect()
    }

    pub fn default_response_builder(&self) -> Result<Option<ResponseBuilder>> {
        self.default_response
            .as_ref()
            .map(ResponseDefinition::to_builder)
            .transpose()
    }
}

fn validate_stubs(stubs: &[StubDefinition]) -> anyhow::Result<()> {
    let mut ids = HashSet::new();
    for (i, stub) in stubs.iter().enumerate() {
        stub.validate()
            .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        if !ids.insert(stub.id.as_str()) {
            anyhow::bail!("Stub {}: duplicate id '{}'", i, stub.id);
        }
    }
    Ok(())
}

fn compile_stubs(stubs: &[StubDefinition]) -> Result<Vec<Expectation>> {
    stubs
        .iter()
        .filter(|stub| stub.enabled)
        .map(StubDefinition::to_expectation)
        .collect()
}

/// A single stub definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Unique identifier for this stub
    pub id: String,

    /// Optional name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Request matcher
    #[serde(default)]
    pub request: RequestDefinition,

    /// Required state entries; `null` means the key must be absent
    #[serde(default)]
    pub state: BTreeMap<String, Value>,

    /// Response to return
    pub response: ResponseDefinition,

    /// Whether this stub is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of times this stub can be matched (unlimited when unset)
    #[serde(default)]
    pub times: Option<u32>,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,

    /// State written after responding; `null` removes the key
    #[serde(default)]
    pub set_state: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl StubDefinition {
    /// Validate the stub definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Stub id cannot be empty");
        }
        if self.times == Some(0) {
            anyhow::bail!("times must be at least 1");
        }
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }

    pub fn to_expectation(&self) -> Result<Expectation> {
        let mut matchers = self.request.to_matchers()?;
        for (key, value) in &self.state {
            let matcher = match value {
                Value::Null => ValueMatcher::Absent,
                other => ValueMatcher::Equals(other.clone()),
            };
            matchers.push(ContextMatcher::State(key.clone(), matcher));
        }

        let mut response = ResponseBuilder::new();
        if let Some(delay) = &self.delay {
            let (min, max) = delay.range();
            response = response.delay_between(min, max);
        }
        response = self.response.append_to(response)?;

        let mut expectation = Expectation::new(matchers);
        expectation.with_id(&self.id).respond(response);
        if let Some(n) = self.times {
            expectation.times(n);
        }
        for (key, value) in &self.set_state {
            let action = match value {
                Value::Null => remove_state(key),
                other => set_state(key, other.clone()),
            };
            expectation.after_respond(action);
        }
        Ok(expectation)
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    /// HTTP method(s) to match (empty = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Path matching
    #[serde(default)]
    pub path: Option<PathMatcher>,

    /// Query parameter matching
    #[serde(default)]
    pub query: BTreeMap<String, QueryMatcher>,

    /// Header matching
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

impl RequestDefinition {
    /// Validate the request matcher.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.to_matchers()?;
        Ok(())
    }

    /// Path first, so captured params are available to later matchers.
    pub fn to_matchers(&self) -> Result<Vec<ContextMatcher>> {
        let mut matchers = Vec::new();

        if let Some(path) = &self.path {
            matchers.push(ContextMatcher::Path(path.to_pattern()?));
        }

        match self.method.as_slice() {
            [] => {}
            [single] => matchers.push(ContextMatcher::Method(single.to_uppercase().into())),
            many => matchers.push(ContextMatcher::Method(any_of(
                many.iter().map(|m| m.to_uppercase()),
            ))),
        }

        for (name, matcher) in &self.query {
            matchers.push(ContextMatcher::Query(name.clone(), matcher.to_value_matcher()?));
        }
        for (name, matcher) in &self.headers {
            matchers.push(ContextMatcher::Header(name.clone(), matcher.to_value_matcher()?));
        }
        if let Some(body) = &self.body {
            matchers.push(body.to_context_matcher()?);
        }

        Ok(matchers)
    }
}

/// Path matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Path with parameters (e.g., /users/{id} or /users/:id)
    Template { template: String },
}

impl PathMatcher {
    pub fn to_pattern(&self) -> Result<PathPattern> {
        match self {
            PathMatcher::Exact { value } => Ok(PathPattern::Value(value.as_str().into())),
            PathMatcher::Prefix { value } => Ok(PathPattern::prefix(value)),
            PathMatcher::Regex { pattern } => PathPattern::regex(pattern),
            PathMatcher::Glob { pattern } => PathPattern::glob(pattern),
            PathMatcher::Template { template } => Ok(template.as_str().into()),
        }
    }
}

/// Query parameter matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Parameter must be present (any value)
    Present,
    /// Parameter must be absent
    Absent,
}

impl QueryMatcher {
    pub fn to_value_matcher(&self) -> Result<ValueMatcher> {
        match self {
            QueryMatcher::Exact { value } => Ok(value.as_str().into()),
            QueryMatcher::Regex { pattern } => matches_regex(pattern),
            QueryMatcher::Present => Ok(present()),
            QueryMatcher::Absent => Ok(ValueMatcher::Absent),
        }
    }
}

/// Header matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

impl HeaderMatcher {
    pub fn to_value_matcher(&self) -> Result<ValueMatcher> {
        match self {
            HeaderMatcher::Exact { value } => Ok(value.as_str().into()),
            HeaderMatcher::Regex { pattern } => matches_regex(pattern),
            HeaderMatcher::Present => Ok(present()),
            HeaderMatcher::Absent => Ok(ValueMatcher::Absent),
            HeaderMatcher::Contains { value } => Ok(contains(value)),
        }
    }
}

fn present() -> ValueMatcher {
    matches_fn(|v| v.is_some())
}

fn contains(needle: &str) -> ValueMatcher {
    let needle = needle.to_string();
    matches_fn(move |v| {
        v.and_then(Value::as_str)
            .map(|s| s.contains(needle.as_str()))
            .unwrap_or(false)
    })
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: BTreeMap<String, Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
    /// Parsed JSON or form body must contain these keys and values
    Subset { value: Value },
}

impl BodyMatcher {
    pub fn to_context_matcher(&self) -> Result<ContextMatcher> {
        let raw = match self {
            BodyMatcher::Exact { value } => value.as_str().into(),
            BodyMatcher::Regex { pattern } => matches_regex(pattern)?,
            BodyMatcher::JsonPath { expressions } => {
                for expr in expressions.keys() {
                    let parsed: std::result::Result<jsonpath_rust::JsonPath, _> =
                        jsonpath_rust::JsonPath::try_from(expr.as_str());
                    parsed.map_err(|e| MockError::InvalidPattern(format!("{}: {}", expr, e)))?;
                }
                let expressions = expressions.clone();
                matches_fn(move |v| {
                    v.and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str::<Value>(s).ok())
                        .map(|json| matches_json_paths(&json, &expressions))
                        .unwrap_or(false)
                })
            }
            BodyMatcher::Contains { value } => contains(value),
            BodyMatcher::Json => matches_fn(|v| {
                v.and_then(Value::as_str)
                    .map(|s| serde_json::from_str::<Value>(s).is_ok())
                    .unwrap_or(false)
            }),
            BodyMatcher::Empty => ValueMatcher::Absent,
            BodyMatcher::Subset { value } => {
                return Ok(ContextMatcher::Body(ValueMatcher::Subset(value.clone())));
            }
        };
        Ok(ContextMatcher::RawBody(raw))
    }
}

/// Every expression must resolve; a `null` expectation only checks presence.
fn matches_json_paths(json: &Value, expressions: &BTreeMap<String, Value>) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(path_expr, expected)| {
        let path: JsonPath = match JsonPath::try_from(path_expr.as_str()) {
            Ok(p) => p,
            Err(_) => return false,
        };

        let results = path.find(json);
        let found: Vec<&Value> = match &results {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };

        if expected.is_null() {
            !found.is_empty()
        } else {
            json_eq(&results, expected) || found.iter().any(|v| json_eq(v, expected))
        }
    })
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Render text and JSON bodies as Handlebars templates
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        if self.template {
            match &self.body {
                Some(ResponseBody::Text { content }) => crate::template::TemplateEngine::validate(content)?,
                Some(ResponseBody::Json { content }) => validate_json_templates(content)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn to_builder(&self) -> Result<ResponseBuilder> {
        self.append_to(ResponseBuilder::new())
    }

    /// Append status, headers and body actions to an existing builder.
    pub fn append_to(&self, builder: ResponseBuilder) -> Result<ResponseBuilder> {
        let mut builder = builder.status(self.status);

        let has_content_type = self
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));
        if let (false, Some(body)) = (has_content_type, &self.body) {
            builder = builder.header("Content-Type", body.content_type());
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let builder = match (&self.body, self.template) {
            (None, _) => builder,
            (Some(ResponseBody::Text { content }), true) => builder.template(content),
            (Some(ResponseBody::Json { content }), true) => builder.json_template(content.clone()),
            (Some(ResponseBody::Text { content }), false) => builder.text(content.clone()),
            (Some(body), _) => builder.bytes(body.to_bytes().map_err(|e| {
                MockError::InvalidConfig(e.to_string())
            })?),
        };
        Ok(builder)
    }
}

fn validate_json_templates(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => crate::template::TemplateEngine::validate(s),
        Value::Array(items) => items.iter().try_for_each(validate_json_templates),
        Value::Object(map) => map.values().try_for_each(validate_json_templates),
        _ => Ok(()),
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_string(content)?.into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
            ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Delay bounds; a fixed delay wins over a range.
    pub fn range(&self) -> (Duration, Duration) {
        if self.fixed_ms > 0 {
            let fixed = Duration::from_millis(self.fixed_ms);
            return (fixed, fixed);
        }
        let min = Duration::from_millis(self.min_ms);
        (min, Duration::from_millis(self.max_ms.max(self.min_ms)))
    }
}

/// A scenario declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Declared state keys
    #[serde(default)]
    pub state: BTreeMap<String, StateSchema>,

    /// Stubs registered on every start, tried in order
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,
}

impl ScenarioDefinition {
    pub fn to_scenario_config(&self) -> Result<ScenarioConfig> {
        let mut config = ScenarioConfig::new(&self.id)
            .description(&self.description)
            .tags(self.tags.iter().cloned());
        for (key, schema) in &self.state {
            config = config.state(key, schema.clone());
        }
        for expectation in compile_stubs(&self.stubs)? {
            config = config.expectation(expectation);
        }
        Ok(config)
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log all matched expectations
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Entries kept per request log
    #[serde(default = "default_log_capacity")]
    pub request_log_capacity: usize,

    /// Content type for bodies that do not set one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            request_log_capacity: default_log_capacity(),
            default_content_type: default_content_type(),
        }
    }
}

fn default_log_capacity() -> usize {
    100
}

fn default_content_type() -> String {
    "application/json".to_string()
}
