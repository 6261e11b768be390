//! Expectation manager.
//!
//! Owns the ordered expectations, the keyed state and the request log of one
//! scope (the default server scope or one scenario). Callers serialize
//! access, so `on_request` takes `&mut self` and runs one request start to
//! finish.

use crate::config::Settings;
use crate::error::Result;
use crate::expectation::{Expectation, HookContext};
use crate::log::{ExpectationOutcome, RequestLog, RequestLogEntry};
use crate::matcher::{check_all, MatchContext, MatcherSet};
use crate::request::{Globals, RequestContext, State};
use crate::response::{ActionContext, ResponseSpec};
use crate::template::TemplateEngine;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The expectation that handled a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Name of the manager's scope
    pub scope: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the verify matchers accepted the response
    pub verified: bool,
}

pub struct ExpectationManager {
    scope: String,
    expectations: Vec<Expectation>,
    state: State,
    initial_state: State,
    log: RequestLog,
    globals: Arc<Globals>,
    templates: Arc<TemplateEngine>,
    settings: Arc<Settings>,
    active: bool,
}

impl ExpectationManager {
    pub fn new(
        scope: &str,
        globals: Arc<Globals>,
        templates: Arc<TemplateEngine>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            scope: scope.to_string(),
            expectations: Vec::new(),
            state: State::new(),
            initial_state: State::new(),
            log: RequestLog::new(settings.request_log_capacity),
            globals,
            templates,
            settings,
            active: false,
        }
    }

    /// Append an expectation and return it for further configuration.
    pub fn when(&mut self, matchers: impl Into<MatcherSet>) -> &mut Expectation {
        self.add_expectation(Expectation::new(matchers))
    }

    pub fn add_expectation(&mut self, expectation: Expectation) -> &mut Expectation {
        let index = self.expectations.len();
        self.expectations.push(expectation);
        &mut self.expectations[index]
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    /// Arm every expectation, seed the state and clear the log.
    pub fn start(&mut self, initial_state: State) {
        self.state = initial_state.clone();
        self.initial_state = initial_state;
        self.log.clear();
        self.rearm();
        self.active = true;
        debug!(scope = %self.scope, expectations = self.expectations.len(), "Expectation manager started");
    }

    /// Stop matching. Expectations are kept and re-armed; state is dropped.
    /// The log stays readable until the next start.
    pub fn stop(&mut self) {
        self.active = false;
        self.state.clear();
        self.rearm();
        debug!(scope = %self.scope, "Expectation manager stopped");
    }

    /// Re-arm every expectation and restore the initial state.
    pub fn reset(&mut self) {
        self.state = self.initial_state.clone();
        self.log.clear();
        self.rearm();
    }

    /// Remove every expectation and reset state and log.
    pub fn clear(&mut self) {
        self.expectations.clear();
        self.state.clear();
        self.initial_state.clear();
        self.log.clear();
    }

    fn rearm(&mut self) {
        for expectation in &mut self.expectations {
            expectation.rearm();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn request_log(&self) -> &RequestLog {
        &self.log
    }

    /// Handle one request.
    ///
    /// Expectations are tried in insertion order; the first available one
    /// whose matchers all accept wins. Returns `Ok(None)` when nothing matched
    /// (or the manager is inactive), leaving `res` untouched. Errors from
    /// response functions and hooks are returned after the attempt is logged.
    /// A failed response function neither consumes the expectation nor runs
    /// its hooks.
    pub async fn on_request(
        &mut self,
        req: &RequestContext,
        res: &mut ResponseSpec,
    ) -> Result<Option<MatchOutcome>> {
        if !self.active {
            return Ok(None);
        }

        let state_before = self.state.clone();
        let mut outcomes = Vec::new();
        let mut selected = None;

        for (index, expectation) in self.expectations.iter().enumerate() {
            let mut ctx = MatchContext::new(req, &self.globals, &self.state);
            match expectation.check(&mut ctx) {
                Ok(()) => {
                    outcomes.push(ExpectationOutcome {
                        index,
                        id: expectation.id().map(str::to_string),
                        matched: true,
                        reason: None,
                    });
                    selected = Some((index, ctx.params));
                    break;
                }
                Err(failure) => {
                    debug!(
                        scope = %self.scope,
                        expectation = index,
                        reason = %failure,
                        "Expectation did not match"
                    );
                    outcomes.push(ExpectationOutcome {
                        index,
                        id: expectation.id().map(str::to_string),
                        matched: false,
                        reason: Some(failure),
                    });
                }
            }
        }

        let Some((index, params)) = selected else {
            if self.settings.log_unmatched {
                warn!(
                    scope = %self.scope,
                    method = %req.method,
                    path = %req.path,
                    "No matching expectation found"
                );
            }
            self.log.push(RequestLogEntry {
                received_at: Utc::now(),
                request: req.clone(),
                state_before,
                outcomes,
                selected: None,
                verified: None,
                error: None,
                state_after: self.state.clone(),
            });
            return Ok(None);
        };

        let id = self.expectations[index].id().map(str::to_string);
        if self.settings.log_matches {
            info!(
                scope = %self.scope,
                expectation = index,
                id = id.as_deref().unwrap_or("-"),
                method = %req.method,
                path = %req.path,
                "Request matched expectation"
            );
        }

        let response = self.expectations[index].response().clone();
        let times = self.expectations[index].times_remaining();
        let action_result = {
            let mut ctx = ActionContext {
                req,
                params: &params,
                globals: &self.globals,
                state: &self.state,
                times,
                res: &mut *res,
                templates: &self.templates,
            };
            response.execute(&mut ctx).await
        };

        // A failed response leaves the expectation armed and the state untouched.
        if let Err(e) = action_result {
            warn!(
                scope = %self.scope,
                expectation = index,
                error = %e,
                "Response action failed"
            );
            self.log.push(RequestLogEntry {
                received_at: Utc::now(),
                request: req.clone(),
                state_before,
                outcomes,
                selected: Some(index),
                verified: None,
                error: Some(e.to_string()),
                state_after: self.state.clone(),
            });
            return Err(e);
        }

        self.expectations[index].consume();

        let verified = {
            let expectation = &self.expectations[index];
            let mut ctx = MatchContext {
                req,
                params: params.clone(),
                globals: &self.globals,
                state: &self.state,
                times: expectation.times_remaining(),
                res: Some(&*res),
            };
            check_all(expectation.verify_matchers(), &mut ctx)
        };
        if let Err(failure) = &verified {
            warn!(
                scope = %self.scope,
                expectation = index,
                reason = %failure,
                "Response failed verification"
            );
        }

        let hook_result = {
            let mut ctx = HookContext {
                req,
                params: &params,
                globals: &self.globals,
                state: &mut self.state,
            };
            self.expectations[index]
                .after_respond_actions()
                .iter()
                .try_for_each(|action| action.apply(&mut ctx))
        };

        self.log.push(RequestLogEntry {
            received_at: Utc::now(),
            request: req.clone(),
            state_before,
            outcomes,
            selected: Some(index),
            verified: Some(verified.is_ok()),
            error: hook_result.as_ref().err().map(|e| e.to_string()),
            state_after: self.state.clone(),
        });
        hook_result?;

        Ok(Some(MatchOutcome {
            scope: self.scope.clone(),
            index,
            id,
            verified: verified.is_ok(),
        }))
    }
}
