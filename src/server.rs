//! Mock server composition root.
//!
//! Routes each request through the active scenarios in registration order,
//! then the default expectation manager. The first match wins; otherwise the
//! configured default response (or a JSON 404) is produced.

use crate::config::{MockServerConfig, Settings};
use crate::error::{MockError, Result};
use crate::expectation::Expectation;
use crate::log::RequestLogEntry;
use crate::manager::{ExpectationManager, MatchOutcome};
use crate::matcher::MatcherSet;
use crate::request::{Globals, RequestContext, State};
use crate::response::{ActionContext, ResponseBody, ResponseBuilder, ResponseSpec};
use crate::scenario::{Scenario, ScenarioConfig, StateParam};
use crate::template::TemplateEngine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Scope name of the default expectation manager.
pub const DEFAULT_SCOPE: &str = "default";

/// A finished response and the expectation that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct HandledResponse {
    pub response: ResponseSpec,
    /// `None` when the fallback response was used
    pub outcome: Option<MatchOutcome>,
}

/// Summary of a registered scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub active: bool,
    pub state: State,
    pub state_params: Vec<StateParam>,
}

pub struct MockServer {
    globals: Arc<Globals>,
    templates: Arc<TemplateEngine>,
    settings: Arc<Settings>,
    default_response: Option<ResponseBuilder>,
    manager: Mutex<ExpectationManager>,
    scenarios: RwLock<Vec<Arc<Mutex<Scenario>>>>,
    /// Total requests handled.
    requests_total: AtomicU64,
    /// Requests answered by an expectation.
    requests_matched: AtomicU64,
    /// Requests answered by the fallback.
    requests_unmatched: AtomicU64,
    /// Requests whose response function or hook failed.
    requests_failed: AtomicU64,
}

impl MockServer {
    pub fn new(globals: Globals, settings: Settings) -> Self {
        let globals = Arc::new(globals);
        let templates = Arc::new(TemplateEngine::new());
        let settings = Arc::new(settings);

        let mut manager = ExpectationManager::new(
            DEFAULT_SCOPE,
            globals.clone(),
            templates.clone(),
            settings.clone(),
        );
        manager.start(State::new());

        info!(
            globals = globals.len(),
            log_capacity = settings.request_log_capacity,
            "Mock server initialized"
        );

        Self {
            globals,
            templates,
            settings,
            default_response: None,
            manager: Mutex::new(manager),
            scenarios: RwLock::new(Vec::new()),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Build a server from configuration: globals, settings, default-scope
    /// stubs and scenarios.
    pub async fn from_config(config: &MockServerConfig) -> Result<Self> {
        let mut server = Self::new(config.globals.clone(), config.settings.clone());
        if let Some(default) = config.default_response_builder()? {
            server = server.with_default_response(default);
        }
        for expectation in config.expectations()? {
            server.add_expectation(expectation).await;
        }
        for scenario in config.scenario_configs()? {
            server.add_scenario(scenario).await?;
        }
        info!(
            stubs = config.stubs.len(),
            scenarios = config.scenarios.len(),
            "Configuration loaded"
        );
        Ok(server)
    }

    /// Response used instead of the built-in 404 when nothing matches.
    pub fn with_default_response(mut self, response: ResponseBuilder) -> Self {
        self.default_response = Some(response);
        self
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register an expectation on the default manager.
    ///
    /// The returned guard holds the manager lock; drop it before sending
    /// requests.
    pub async fn when(&self, matchers: impl Into<MatcherSet>) -> MappedMutexGuard<'_, Expectation> {
        let manager = self.manager.lock().await;
        MutexGuard::map(manager, |m| m.when(matchers))
    }

    pub async fn add_expectation(&self, expectation: Expectation) {
        self.manager.lock().await.add_expectation(expectation);
    }

    /// Register a scenario. Ids must be unique.
    pub async fn add_scenario(&self, config: ScenarioConfig) -> Result<()> {
        let mut scenarios = self.scenarios.write().await;
        for existing in scenarios.iter() {
            if existing.lock().await.id() == config.id() {
                return Err(MockError::DuplicateScenario(config.id().to_string()));
            }
        }

        let scenario = Scenario::new(
            config,
            self.globals.clone(),
            self.templates.clone(),
            self.settings.clone(),
        )?;
        debug!(scenario = %scenario.id(), "Scenario registered");
        scenarios.push(Arc::new(Mutex::new(scenario)));
        Ok(())
    }

    pub async fn scenario(&self, id: &str) -> Option<Arc<Mutex<Scenario>>> {
        for scenario in self.scenarios.read().await.iter() {
            if scenario.lock().await.id() == id {
                return Some(scenario.clone());
            }
        }
        None
    }

    async fn require_scenario(&self, id: &str) -> Result<Arc<Mutex<Scenario>>> {
        self.scenario(id)
            .await
            .ok_or_else(|| MockError::UnknownScenario(id.to_string()))
    }

    pub async fn start_scenario(&self, id: &str, state: &State) -> Result<()> {
        let scenario = self.require_scenario(id).await?;
        scenario.lock().await.start(state);
        Ok(())
    }

    pub async fn stop_scenario(&self, id: &str) -> Result<()> {
        let scenario = self.require_scenario(id).await?;
        scenario.lock().await.stop();
        Ok(())
    }

    /// Run a scenario's bootstrap callback.
    pub async fn bootstrap_scenario(
        &self,
        id: &str,
        req: &RequestContext,
    ) -> Result<Option<ResponseSpec>> {
        let scenario = self.require_scenario(id).await?;
        let scenario = scenario.lock().await;
        let res = scenario.bootstrap(req).await?;
        Ok(res.map(|res| self.finalize(res)))
    }

    pub async fn list_scenarios(&self) -> Vec<ScenarioInfo> {
        let mut out = Vec::new();
        for scenario in self.scenarios.read().await.iter() {
            let scenario = scenario.lock().await;
            out.push(ScenarioInfo {
                id: scenario.id().to_string(),
                description: scenario.formatted_description(),
                tags: scenario.tags().to_vec(),
                active: scenario.is_active(),
                state: scenario.state(),
                state_params: scenario.visible_state_params().into_iter().cloned().collect(),
            });
        }
        out
    }

    /// Handle one request.
    ///
    /// Errors from user-supplied response functions and hooks are returned
    /// to the caller rather than turned into a response.
    pub async fn handle(&self, req: &RequestContext) -> Result<HandledResponse> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match self.dispatch(req).await {
            Ok(Some((response, outcome))) => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                Ok(HandledResponse {
                    response: self.finalize(response),
                    outcome: Some(outcome),
                })
            }
            Ok(None) => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                let response = self.fallback_response(req).await?;
                Ok(HandledResponse {
                    response: self.finalize(response),
                    outcome: None,
                })
            }
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(method = %req.method, path = %req.path, error = %e, "Request handling failed");
                Err(e)
            }
        }
    }

    async fn dispatch(&self, req: &RequestContext) -> Result<Option<(ResponseSpec, MatchOutcome)>> {
        let scenarios: Vec<_> = self.scenarios.read().await.iter().cloned().collect();
        for scenario in scenarios {
            let mut scenario = scenario.lock().await;
            if !scenario.is_active() {
                continue;
            }
            let mut res = ResponseSpec::default();
            if let Some(outcome) = scenario.on_request(req, &mut res).await? {
                return Ok(Some((res, outcome)));
            }
        }

        let mut res = ResponseSpec::default();
        let outcome = self.manager.lock().await.on_request(req, &mut res).await?;
        Ok(outcome.map(|outcome| (res, outcome)))
    }

    async fn fallback_response(&self, req: &RequestContext) -> Result<ResponseSpec> {
        let mut res = ResponseSpec::default();
        match &self.default_response {
            Some(builder) => {
                let params = BTreeMap::new();
                let state = State::new();
                let mut ctx = ActionContext {
                    req,
                    params: &params,
                    globals: &self.globals,
                    state: &state,
                    times: None,
                    res: &mut res,
                    templates: &self.templates,
                };
                builder.execute(&mut ctx).await?;
            }
            None => {
                res.status = 404;
                res.set_header("Content-Type", &["application/json".to_string()]);
                res.body = Some(ResponseBody::Text(
                    r#"{"error": "not_found", "message": "No matching expectation found"}"#
                        .to_string(),
                ));
            }
        }
        Ok(res)
    }

    /// Default the content type of responses that carry a body.
    fn finalize(&self, mut res: ResponseSpec) -> ResponseSpec {
        if res.body.is_some() && res.header("content-type").is_none() {
            let content_type = match &res.body {
                Some(ResponseBody::Binary(_)) => "application/octet-stream".to_string(),
                _ => self.settings.default_content_type.clone(),
            };
            res.set_header("Content-Type", &[content_type]);
        }
        res
    }

    /// Current state of the default scope.
    pub async fn state(&self) -> State {
        self.manager.lock().await.state().clone()
    }

    /// Request logs per scope, default scope first.
    pub async fn request_logs(&self) -> Vec<(String, Vec<RequestLogEntry>)> {
        let mut logs = vec![(
            DEFAULT_SCOPE.to_string(),
            self.manager.lock().await.request_log().to_vec(),
        )];
        for scenario in self.scenarios.read().await.iter() {
            let scenario = scenario.lock().await;
            if let Some(log) = scenario.request_log() {
                logs.push((scenario.id().to_string(), log.to_vec()));
            }
        }
        logs
    }

    /// Drop default expectations, state and log, and stop every scenario.
    pub async fn clear(&self) {
        self.manager.lock().await.clear();
        for scenario in self.scenarios.read().await.iter() {
            scenario.lock().await.stop();
        }
        debug!("Mock server cleared");
    }

    /// Stop every scenario and the default scope.
    pub async fn stop(&self) {
        for scenario in self.scenarios.read().await.iter() {
            scenario.lock().await.stop();
        }
        self.manager.lock().await.stop();
        info!("Mock server stopped");
    }

    /// Re-arm the default scope after `stop`.
    pub async fn start(&self) {
        self.manager.lock().await.start(State::new());
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }
}
