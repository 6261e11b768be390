//! Template engine for dynamic responses and scenario descriptions.
//!
//! Uses Handlebars with the request, captured path params, state and globals
//! in scope.

use crate::error::{MockError, Result};
use crate::request::{Globals, RequestBody};
use crate::response::ActionContext;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    /// Path parameters captured while matching
    pub params: &'a BTreeMap<String, String>,
    /// Query parameters (repeated keys become arrays)
    pub query: Map<String, Value>,
    /// Request headers, lower-cased names
    pub headers: Map<String, Value>,
    pub cookies: &'a BTreeMap<String, String>,
    pub method: &'a str,
    pub path: &'a str,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Parsed request body (JSON or form)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    pub state: &'a Map<String, Value>,
    pub globals: &'a Globals,
}

impl<'a> TemplateContext<'a> {
    pub fn from_action(ctx: &'a ActionContext<'_>) -> Self {
        let req = ctx.req;
        let query = req
            .query
            .keys()
            .filter_map(|k| req.query_value(k).map(|v| (k.clone(), v)))
            .collect();
        let headers = req
            .headers
            .keys()
            .filter_map(|k| req.header_value(k).map(|v| (k.clone(), v)))
            .collect();
        let json = match &req.body {
            RequestBody::Json(_) | RequestBody::Form(_) => req.body.to_value(),
            _ => None,
        };
        let body = (!req.raw_body.is_empty()).then(|| req.body_text());

        Self {
            params: ctx.params,
            query,
            headers,
            cookies: &req.cookies,
            method: &req.method,
            path: &req.path,
            body,
            json,
            state: ctx.state,
            globals: ctx.globals,
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Don't escape HTML by default (we're not rendering HTML)
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against the matched request.
    pub fn render(&self, template: &str, ctx: &ActionContext<'_>) -> Result<String> {
        let tctx = TemplateContext::from_action(ctx);
        self.handlebars
            .render_template(template, &tctx)
            .map_err(|e| MockError::Template(e.to_string()))
    }

    /// Render a JSON value with templates in string fields.
    pub fn render_json(&self, json: &Value, ctx: &ActionContext<'_>) -> Result<Value> {
        let tctx = TemplateContext::from_action(ctx);
        self.render_json_value(json, &tctx)
    }

    /// Check that a template parses.
    pub fn validate(template: &str) -> Result<()> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|e| MockError::Template(e.to_string()))
    }

    fn render_json_value(&self, value: &Value, ctx: &TemplateContext<'_>) -> Result<Value> {
        match value {
            Value::String(s) => {
                if s.contains("{{") {
                    let rendered = self
                        .handlebars
                        .render_template(s, ctx)
                        .map_err(|e| MockError::Template(e.to_string()))?;
                    Ok(Value::String(rendered))
                } else {
                    Ok(value.clone())
                }
            }
            Value::Array(arr) => {
                let rendered: Result<Vec<_>> = arr
                    .iter()
                    .map(|v| self.render_json_value(v, ctx))
                    .collect();
                Ok(Value::Array(rendered?))
            }
            Value::Object(obj) => {
                let mut rendered = Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Custom Handlebars helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);
    out.write(&serde_json::to_string(&value).unwrap_or_default())?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);

    let mut rng = rand::thread_rng();
    let value = if max > min { rng.gen_range(min..=max) } else { min };
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(Value::String(_)) | Some(Value::Null) | None => out.write(default)?,
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

/// Replace `{{globals.key}}` placeholders for known keys. Everything else,
/// including unknown keys and stray braces, is left as written.
pub fn substitute_globals(text: &str, globals: &Globals) -> String {
    globals.iter().fold(text.to_string(), |out, (key, value)| {
        let placeholder = format!("{{{{globals.{}}}}}", key);
        if !out.contains(&placeholder) {
            return out;
        }
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.replace(&placeholder, &replacement)
    })
}
