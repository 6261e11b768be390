//! Scenarios: named bundles of state schema, expectations and callbacks
//! that can be started and stopped independently.

use crate::config::Settings;
use crate::error::{MockError, Result};
use crate::expectation::Expectation;
use crate::log::RequestLog;
use crate::manager::{ExpectationManager, MatchOutcome};
use crate::matcher::MatcherSet;
use crate::request::{Globals, RequestContext, State};
use crate::response::{ActionContext, ResponseBuilder, ResponseSpec};
use crate::template::{substitute_globals, TemplateEngine};
use crate::value::json_eq;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// JSON type of a state parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// Declared state key metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StateSchema {
    pub fn of_type(param_type: ParamType) -> Self {
        Self {
            param_type: Some(param_type),
            ..Default::default()
        }
    }

    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Check a value against the declared type and enum.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if let Some(param_type) = self.param_type {
            if !param_type.accepts(value) {
                return Err(format!("expected {:?}, got {}", param_type, value));
            }
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|v| json_eq(v, value)) {
            return Err(format!("{} is not one of {:?}", value, self.allowed));
        }
        Ok(())
    }
}

/// A declared state key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateParam {
    pub key: String,
    pub schema: StateSchema,
}

/// Passed to the `on_start` callback while the scenario is being activated.
pub struct StartContext<'a> {
    pub globals: &'a Globals,
    /// Defaulted state; changes here become the initial state
    pub state: &'a mut State,
    manager: &'a mut ExpectationManager,
}

impl StartContext<'_> {
    /// Register an expectation for this activation only.
    pub fn when(&mut self, matchers: impl Into<MatcherSet>) -> &mut Expectation {
        self.manager.when(matchers)
    }
}

/// Passed to the `on_bootstrap` callback.
pub struct BootstrapContext<'a> {
    pub globals: &'a Globals,
    pub req: &'a RequestContext,
    pub state: &'a State,
}

pub type OnStartFn = Arc<dyn Fn(&mut StartContext<'_>) + Send + Sync>;
pub type OnBootstrapFn = Arc<dyn Fn(&BootstrapContext<'_>) -> Option<ResponseBuilder> + Send + Sync>;

/// Declarative description of a scenario.
#[derive(Clone, Default)]
pub struct ScenarioConfig {
    id: String,
    description: String,
    tags: Vec<String>,
    state_params: Vec<StateParam>,
    expectations: Vec<Expectation>,
    on_start: Option<OnStartFn>,
    on_bootstrap: Option<OnBootstrapFn>,
}

impl ScenarioConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a state key. Declaring a key again replaces its schema.
    pub fn state(mut self, key: &str, schema: StateSchema) -> Self {
        self.state_params.retain(|p| p.key != key);
        self.state_params.push(StateParam {
            key: key.to_string(),
            schema,
        });
        self
    }

    /// Register a static expectation, configured through the closure.
    pub fn with_expectation<F>(mut self, matchers: impl Into<MatcherSet>, configure: F) -> Self
    where
        F: FnOnce(&mut Expectation),
    {
        let mut expectation = Expectation::new(matchers);
        configure(&mut expectation);
        self.expectations.push(expectation);
        self
    }

    pub fn expectation(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut StartContext<'_>) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_bootstrap<F>(mut self, f: F) -> Self
    where
        F: Fn(&BootstrapContext<'_>) -> Option<ResponseBuilder> + Send + Sync + 'static,
    {
        self.on_bootstrap = Some(Arc::new(f));
        self
    }

    /// Configuration errors are reported here, never at request time.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MockError::InvalidConfig("scenario id cannot be empty".to_string()));
        }
        for param in &self.state_params {
            if let Some(default) = &param.schema.default {
                param
                    .schema
                    .check(default)
                    .map_err(|reason| MockError::InvalidStateDefault {
                        scenario: self.id.clone(),
                        key: param.key.clone(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    /// Overrides win over schema defaults; keys with neither stay absent.
    pub fn defaulted_state(&self, overrides: &State) -> State {
        let mut state = State::new();
        for param in &self.state_params {
            if let Some(default) = &param.schema.default {
                state.insert(param.key.clone(), default.clone());
            }
        }
        for (key, value) in overrides {
            state.insert(key.clone(), value.clone());
        }
        state
    }
}

impl fmt::Debug for ScenarioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioConfig")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("state_params", &self.state_params)
            .field("expectations", &self.expectations.len())
            .field("on_start", &self.on_start.is_some())
            .field("on_bootstrap", &self.on_bootstrap.is_some())
            .finish()
    }
}

/// A registered scenario.
///
/// Each activation gets a fresh expectation manager holding the static
/// expectations plus whatever `on_start` registers.
pub struct Scenario {
    config: ScenarioConfig,
    globals: Arc<Globals>,
    templates: Arc<TemplateEngine>,
    settings: Arc<Settings>,
    manager: Option<ExpectationManager>,
}

impl Scenario {
    pub fn new(
        config: ScenarioConfig,
        globals: Arc<Globals>,
        templates: Arc<TemplateEngine>,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            globals,
            templates,
            settings,
            manager: None,
        })
    }

    /// Activate with the given state overrides, restarting if already active.
    pub fn start(&mut self, overrides: &State) {
        let mut manager = ExpectationManager::new(
            &self.config.id,
            self.globals.clone(),
            self.templates.clone(),
            self.settings.clone(),
        );
        for expectation in &self.config.expectations {
            manager.add_expectation(expectation.clone());
        }

        let mut state = self.config.defaulted_state(overrides);
        if let Some(on_start) = &self.config.on_start {
            let mut ctx = StartContext {
                globals: &self.globals,
                state: &mut state,
                manager: &mut manager,
            };
            on_start(&mut ctx);
        }

        manager.start(state);
        info!(
            scenario = %self.config.id,
            expectations = manager.expectations().len(),
            "Scenario started"
        );
        self.manager = Some(manager);
    }

    /// Deactivate. The last activation's request log stays readable.
    pub fn stop(&mut self) {
        if let Some(manager) = self.manager.as_mut().filter(|m| m.is_active()) {
            manager.stop();
            info!(scenario = %self.config.id, "Scenario stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.manager.as_ref().is_some_and(ExpectationManager::is_active)
    }

    /// Run `on_bootstrap`; a returned builder is executed into a new response.
    pub async fn bootstrap(&self, req: &RequestContext) -> Result<Option<ResponseSpec>> {
        let (Some(manager), Some(on_bootstrap)) = (&self.manager, &self.config.on_bootstrap) else {
            return Ok(None);
        };
        if !manager.is_active() {
            return Ok(None);
        }

        let ctx = BootstrapContext {
            globals: &self.globals,
            req,
            state: manager.state(),
        };
        let Some(builder) = on_bootstrap(&ctx) else {
            return Ok(None);
        };

        let params = BTreeMap::new();
        let mut res = ResponseSpec::default();
        let mut action_ctx = ActionContext {
            req,
            params: &params,
            globals: &self.globals,
            state: manager.state(),
            times: Some(1),
            res: &mut res,
            templates: &self.templates,
        };
        builder.execute(&mut action_ctx).await?;
        Ok(Some(res))
    }

    /// Route a request to this scenario's expectations.
    pub async fn on_request(
        &mut self,
        req: &RequestContext,
        res: &mut ResponseSpec,
    ) -> Result<Option<MatchOutcome>> {
        match self.manager.as_mut() {
            Some(manager) => manager.on_request(req, res).await,
            None => Ok(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn tags(&self) -> &[String] {
        &self.config.tags
    }

    /// Description with `{{globals.key}}` placeholders filled in.
    pub fn formatted_description(&self) -> String {
        substitute_globals(self.config.description.trim(), &self.globals)
    }

    pub fn state_params(&self) -> &[StateParam] {
        &self.config.state_params
    }

    pub fn visible_state_params(&self) -> Vec<&StateParam> {
        self.config
            .state_params
            .iter()
            .filter(|p| !p.schema.hidden)
            .collect()
    }

    /// Current state; empty before the first start.
    pub fn state(&self) -> State {
        self.manager
            .as_ref()
            .map(|m| m.state().clone())
            .unwrap_or_default()
    }

    pub fn request_log(&self) -> Option<&RequestLog> {
        self.manager.as_ref().map(ExpectationManager::request_log)
    }
}
