//! Scenario Mock Server
//!
//! The matching and lifecycle core of a programmable HTTP mock server.
//! Requests are matched against ordered expectations; the first available
//! match builds the response, consumes one use and may update state for the
//! next request.
//!
//! # Features
//!
//! - **Request Matching**: path templates, regex, glob, method, query, headers,
//!   cookies, body subsets, state and globals, custom predicates
//! - **Consumption**: `times(n)` expectations that fall through once used up
//! - **Scenarios**: independently started bundles of state and expectations
//! - **Dynamic Responses**: Handlebars templates and response functions
//! - **Latency Simulation**: fixed or random delays
//! - **Request Log**: bounded per-scope audit of every match attempt
//!
//! # Example
//!
//! ```no_run
//! use scenario_mock_server::prelude::*;
//!
//! # async fn run() -> scenario_mock_server::Result<()> {
//! let server = MockServer::new(Globals::new(), Settings::default());
//!
//! server.when(("/login", times(1))).await
//!     .respond(response(serde_json::json!({"token": "abc"})))
//!     .after_respond(set_state("user", "jane"));
//!
//! let handled = server.handle(&RequestContext::new("GET", "/login")).await?;
//! assert_eq!(handled.response.status, 200);
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! stubs:
//!   - id: hello-world
//!     request:
//!       method: [GET]
//!       path:
//!         type: exact
//!         value: /hello
//!     times: 1
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           message: "Hello, World!"
//! ```

pub mod config;
pub mod error;
pub mod expectation;
pub mod log;
pub mod manager;
pub mod matcher;
pub mod request;
pub mod response;
pub mod scenario;
pub mod server;
pub mod template;
pub mod value;

pub use config::{MockServerConfig, Settings};
pub use error::{MockError, Result};
pub use expectation::Expectation;
pub use manager::{ExpectationManager, MatchOutcome};
pub use request::{Globals, RequestContext, State};
pub use response::{ResponseBuilder, ResponseSpec};
pub use scenario::{Scenario, ScenarioConfig};
pub use server::MockServer;

/// Everything needed to declare expectations and scenarios.
pub mod prelude {
    pub use crate::config::{MockServerConfig, Settings};
    pub use crate::error::{MockError, Result};
    pub use crate::expectation::{
        after, remove_state, set_state, update_state, AfterRespondAction, Expectation,
        HookContext,
    };
    pub use crate::matcher::{
        custom, global_param, request, response_status, state_param, times, times_matching,
        ContextMatcher, MatchContext, PathPattern,
    };
    pub use crate::request::{Globals, RequestContext, State};
    pub use crate::response::{response, ActionContext, CookieOptions, ResponseBuilder, ResponseSpec};
    pub use crate::scenario::{ParamType, ScenarioConfig, StateSchema};
    pub use crate::server::MockServer;
    pub use crate::value::{
        absent, any_of, is_equal_to, is_greater_than, is_greater_than_or_equal, is_less_than,
        is_less_than_or_equal, matches_fn, matches_object, matches_regex, not, ValueMatcher,
    };
}
