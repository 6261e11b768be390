//! Expectations: matchers, a response and a consumption policy.

use crate::error::{MockError, Result};
use crate::matcher::{check_all, ContextMatcher, MatchContext, MatchFailure, MatcherSet, TimesMatcher};
use crate::request::{Globals, RequestContext, State};
use crate::response::{ActionContext, ResponseBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What an after-respond action can see and change.
pub struct HookContext<'a> {
    pub req: &'a RequestContext,
    pub params: &'a BTreeMap<String, String>,
    pub globals: &'a Globals,
    pub state: &'a mut State,
}

pub type HookFn = Arc<dyn Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Side effect run after the response has been built.
#[derive(Clone)]
pub enum AfterRespondAction {
    SetState(String, Value),
    RemoveState(String),
    Run(HookFn),
}

impl AfterRespondAction {
    pub fn apply(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        match self {
            AfterRespondAction::SetState(key, value) => {
                ctx.state.insert(key.clone(), value.clone());
            }
            AfterRespondAction::RemoveState(key) => {
                ctx.state.remove(key);
            }
            AfterRespondAction::Run(f) => f(ctx).map_err(MockError::Action)?,
        }
        Ok(())
    }
}

impl fmt::Debug for AfterRespondAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AfterRespondAction::SetState(k, v) => write!(f, "SetState({}, {})", k, v),
            AfterRespondAction::RemoveState(k) => write!(f, "RemoveState({})", k),
            AfterRespondAction::Run(_) => write!(f, "Run(<function>)"),
        }
    }
}

pub fn set_state(key: &str, value: impl Into<Value>) -> AfterRespondAction {
    AfterRespondAction::SetState(key.to_string(), value.into())
}

pub fn remove_state(key: &str) -> AfterRespondAction {
    AfterRespondAction::RemoveState(key.to_string())
}

/// Replace a state entry with a value computed from its current one.
pub fn update_state<F>(key: &str, f: F) -> AfterRespondAction
where
    F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
{
    let key = key.to_string();
    after(move |ctx| {
        let next = f(ctx.state.get(&key));
        ctx.state.insert(key.clone(), next);
        Ok(())
    })
}

/// Run an arbitrary closure after the response.
pub fn after<F>(f: F) -> AfterRespondAction
where
    F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    AfterRespondAction::Run(Arc::new(f))
}

/// One matcher set plus the response to produce when it matches.
///
/// `times_remaining` of `None` means unlimited. Once it reaches zero the
/// expectation is skipped until the owning manager re-arms it.
#[derive(Clone, Default)]
pub struct Expectation {
    id: Option<String>,
    matchers: Vec<ContextMatcher>,
    response: ResponseBuilder,
    times_initial: Option<u32>,
    times_remaining: Option<u32>,
    after_respond: Vec<AfterRespondAction>,
    verify: Vec<ContextMatcher>,
}

impl Expectation {
    /// Build from a matcher set. `times(n)` matchers set the consumption count.
    pub fn new(matchers: impl Into<MatcherSet>) -> Self {
        let mut expectation = Expectation::default();
        for matcher in matchers.into().0 {
            match matcher {
                ContextMatcher::Times(TimesMatcher::Count(n)) => {
                    expectation.times(n);
                }
                other => expectation.matchers.push(other),
            }
        }
        expectation
    }

    pub fn with_id(&mut self, id: &str) -> &mut Self {
        self.id = Some(id.to_string());
        self
    }

    /// Set the response, replacing any previous one.
    pub fn respond(&mut self, response: impl Into<ResponseBuilder>) -> &mut Self {
        self.response = response.into();
        self
    }

    /// Compute the response from the request context.
    pub fn respond_with<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&ActionContext<'_>) -> anyhow::Result<ResponseBuilder> + Send + Sync + 'static,
    {
        self.response = ResponseBuilder::new().respond_with(f);
        self
    }

    pub fn after_respond(&mut self, action: AfterRespondAction) -> &mut Self {
        self.after_respond.push(action);
        self
    }

    /// Extra matchers checked against the finished response.
    pub fn verify(&mut self, matchers: impl Into<MatcherSet>) -> &mut Self {
        self.verify.extend(matchers.into().0);
        self
    }

    pub fn times(&mut self, n: u32) -> &mut Self {
        self.times_initial = Some(n);
        self.times_remaining = Some(n);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn matchers(&self) -> &[ContextMatcher] {
        &self.matchers
    }

    pub fn response(&self) -> &ResponseBuilder {
        &self.response
    }

    pub fn after_respond_actions(&self) -> &[AfterRespondAction] {
        &self.after_respond
    }

    pub fn verify_matchers(&self) -> &[ContextMatcher] {
        &self.verify
    }

    pub fn times_remaining(&self) -> Option<u32> {
        self.times_remaining
    }

    pub fn is_available(&self) -> bool {
        self.times_remaining != Some(0)
    }

    /// Check availability, then every matcher in order.
    pub fn check(&self, ctx: &mut MatchContext<'_>) -> Result<(), MatchFailure> {
        ctx.times = self.times_remaining;
        if !self.is_available() {
            return Err(MatchFailure {
                kind: "times",
                expected: "remaining > 0".to_string(),
                actual: "0".to_string(),
            });
        }
        check_all(&self.matchers, ctx)
    }

    /// Record one selected match.
    pub fn consume(&mut self) {
        if let Some(remaining) = self.times_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Restore the configured count.
    pub fn rearm(&mut self) {
        self.times_remaining = self.times_initial;
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("id", &self.id)
            .field("matchers", &self.matchers)
            .field("times_remaining", &self.times_remaining)
            .field("verify", &self.verify)
            .field("after_respond", &self.after_respond)
            .finish()
    }
}
