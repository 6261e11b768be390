//! End-to-end behaviour through the public API.

use scenario_mock_server::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn server() -> MockServer {
    let mut globals = Globals::new();
    globals.insert("mockServerUrl".to_string(), json!("http://localhost:6002"));
    MockServer::new(globals, Settings::default())
}

async fn send(server: &MockServer, req: RequestContext) -> ResponseSpec {
    server.handle(&req).await.unwrap().response
}

async fn get(server: &MockServer, url: &str) -> ResponseSpec {
    send(server, RequestContext::new("GET", url)).await
}

fn text(res: &ResponseSpec) -> String {
    res.body_text().unwrap_or_default()
}

#[tokio::test]
async fn test_times_n_then_fall_through() {
    for n in 1..=3u32 {
        let server = server();
        server.when(("/test", times(n))).await.respond("limited");
        server.when("/test").await.respond("fallback");

        for _ in 0..n {
            assert_eq!(text(&get(&server, "/test").await), "limited");
        }
        assert_eq!(text(&get(&server, "/test").await), "fallback");
    }
}

#[tokio::test]
async fn test_consumed_expectations_then_404() {
    let server = server();
    server.when(("/test", times(1))).await.respond("ok");
    server.when(("/test", times(1))).await.respond("ok2");

    assert_eq!(text(&get(&server, "/test").await), "ok");
    assert_eq!(text(&get(&server, "/test").await), "ok2");
    assert_eq!(get(&server, "/test").await.status, 404);
}

#[tokio::test]
async fn test_state_written_after_response_is_seen_next_request() {
    let server = server();
    server.when(("/test", state_param("a", "b"))).await.respond("second");
    server
        .when("/test")
        .await
        .respond("first")
        .after_respond(set_state("a", "b"));

    assert_eq!(text(&get(&server, "/test").await), "first");
    assert_eq!(text(&get(&server, "/test").await), "second");
}

#[tokio::test]
async fn test_state_param_absence() {
    let server = server();
    server
        .when(("/test", state_param("absent", absent())))
        .await
        .respond("ok");
    assert_eq!(text(&get(&server, "/test").await), "ok");
}

#[tokio::test]
async fn test_clear_gives_a_clean_slate() {
    let server = server();
    server
        .when(("/test", times(1)))
        .await
        .respond("ok")
        .after_respond(set_state("a", "b"));
    assert_eq!(text(&get(&server, "/test").await), "ok");

    server.clear().await;
    assert!(server.state().await.is_empty());
    let logs = server.request_logs().await;
    assert!(logs[0].1.is_empty());

    server.when(("/test", state_param("a", "b"))).await.respond("stale");
    assert_eq!(get(&server, "/test").await.status, 404);

    server.clear().await;
    server.when(("/test", times(1))).await.respond("ok");
    assert_eq!(text(&get(&server, "/test").await), "ok");
}

#[tokio::test]
async fn test_path_params_and_url_matching() {
    let server = server();
    server
        .when(request().path("/a/:id"))
        .await
        .respond_with(|ctx| Ok(response(json!({ "id": ctx.params.get("id") }))));
    server
        .when(request().url("/search?a=b&b=c"))
        .await
        .respond("exact");

    let res = get(&server, "/a/5?x=1").await;
    assert_eq!(serde_json::from_str::<Value>(&text(&res)).unwrap(), json!({"id": "5"}));
    assert_eq!(get(&server, "/a/5/6").await.status, 404);

    assert_eq!(text(&get(&server, "/search?a=b&b=c").await), "exact");
    assert_eq!(get(&server, "/search?b=c&a=b").await.status, 404);
}

#[tokio::test]
async fn test_body_subset_for_json_and_form() {
    let server = server();
    server
        .when(request().method("POST").body(json!({"a": "b"})))
        .await
        .respond("ok");

    let json_req = RequestContext::new("POST", "/test").with_json(&json!({"a": "b", "c": "d"}));
    assert_eq!(text(&send(&server, json_req).await), "ok");

    let form_req = RequestContext::new("POST", "/test")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_body("a=b");
    assert_eq!(text(&send(&server, form_req).await), "ok");

    let wrong = RequestContext::new("POST", "/test").with_json(&json!({"a": "c"}));
    assert_eq!(send(&server, wrong).await.status, 404);
}

#[tokio::test]
async fn test_repeated_query_params() {
    let server = server();
    server
        .when(request().path("/todos").query("test", vec!["a", "b"]))
        .await
        .respond("both");
    server
        .when(request().path("/todos").query("test", "a"))
        .await
        .respond("one");

    assert_eq!(text(&get(&server, "/todos?test=a&test=b").await), "both");
    assert_eq!(text(&get(&server, "/todos?test=b&test=a").await), "one");
}

fn todo_scenario() -> ScenarioConfig {
    ScenarioConfig::new("test-scenario")
        .tags(["something"])
        .description("Open {{globals.mockServerUrl}}/en-gb/todos")
        .state(
            "locale",
            StateSchema::of_type(ParamType::String)
                .allowed(["nl-nl", "en-gb"])
                .default_value("en-gb"),
        )
        .state(
            "todos",
            StateSchema::of_type(ParamType::String).allowed(["saved"]).hidden(),
        )
        .on_bootstrap(|ctx| {
            let base = ctx.globals.get("mockServerUrl")?.as_str()?;
            let locale = ctx.state.get("locale")?.as_str()?;
            Some(ResponseBuilder::new().redirect(&format!("{}/{}/todos?test=a&test=b", base, locale)))
        })
        .on_start(|ctx| {
            let count = Arc::new(AtomicU64::new(0));
            let current = count.clone();
            ctx.when(request().path("/count"))
                .respond_with(move |_| Ok(response(current.load(Ordering::SeqCst))))
                .after_respond(after(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));

            ctx.when((request().path("/times"), times(1))).respond(response(1));
            ctx.when((request().path("/times"), times(1))).respond(response(2));
            ctx.when((
                request().path("/times"),
                times_matching(is_greater_than_or_equal(0.0)),
            ))
            .respond(response(3));

            ctx.when(request().path(any_of([is_equal_to("/any-1"), is_equal_to("/any-2")])))
                .respond(response("any"));

            ctx.when((
                request()
                    .path("/en-gb/todos/:id")
                    .method("GET")
                    .param("id", "1")
                    .param("id", is_equal_to("1")),
                times(2),
            ))
            .respond_with(|ctx| Ok(ResponseBuilder::new().json(json!({ "id": ctx.params.get("id") }))));

            ctx.when((request().path("/en-gb/todos"), state_param("todos", absent())))
                .verify(request().query("test", vec!["a", "b"]))
                .respond(response(json!([])))
                .after_respond(set_state("todos", "saved"));

            ctx.when((request().path("/en-gb/todos"), state_param("todos", "saved")))
                .respond(response(json!([{"id": 1}])));
        })
}

#[tokio::test]
async fn test_scenario_counter_and_times() {
    let server = server();
    server.add_scenario(todo_scenario()).await.unwrap();
    server.start_scenario("test-scenario", &State::new()).await.unwrap();

    for expected in ["0", "1", "2"] {
        assert_eq!(text(&get(&server, "/count").await), expected);
    }
    for expected in ["1", "2", "3", "3"] {
        assert_eq!(text(&get(&server, "/times").await), expected);
    }
    assert_eq!(text(&get(&server, "/any-2").await), "any");

    assert_eq!(text(&get(&server, "/en-gb/todos/1").await), r#"{"id":"1"}"#);
    assert_eq!(text(&get(&server, "/en-gb/todos/1").await), r#"{"id":"1"}"#);
    assert_eq!(get(&server, "/en-gb/todos/1").await.status, 404);
    assert_eq!(get(&server, "/en-gb/todos/2").await.status, 404);

    // Restarting gives a fresh counter.
    server.start_scenario("test-scenario", &State::new()).await.unwrap();
    assert_eq!(text(&get(&server, "/count").await), "0");
}

#[tokio::test]
async fn test_scenario_state_transition_and_bootstrap() {
    let server = server();
    server.add_scenario(todo_scenario()).await.unwrap();

    assert_eq!(get(&server, "/en-gb/todos").await.status, 404);
    server.start_scenario("test-scenario", &State::new()).await.unwrap();

    let bootstrap = server
        .bootstrap_scenario("test-scenario", &RequestContext::new("GET", "/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bootstrap.status, 302);
    assert_eq!(
        bootstrap.header("location"),
        Some("http://localhost:6002/en-gb/todos?test=a&test=b")
    );

    let handled = server
        .handle(&RequestContext::new("GET", "/en-gb/todos?test=a&test=b"))
        .await
        .unwrap();
    assert_eq!(text(&handled.response), "[]");
    assert!(handled.outcome.unwrap().verified);

    assert_eq!(text(&get(&server, "/en-gb/todos").await), r#"[{"id":1}]"#);

    let scenarios = server.list_scenarios().await;
    assert_eq!(scenarios[0].description, "Open http://localhost:6002/en-gb/todos");
    assert_eq!(scenarios[0].state.get("todos"), Some(&json!("saved")));
    assert_eq!(scenarios[0].state_params.len(), 1);

    server.stop_scenario("test-scenario").await.unwrap();
    assert_eq!(get(&server, "/en-gb/todos").await.status, 404);
}

#[tokio::test]
async fn test_verify_failure_is_logged_but_consumes() {
    let server = server();
    server.add_scenario(todo_scenario()).await.unwrap();
    server.start_scenario("test-scenario", &State::new()).await.unwrap();

    let handled = server
        .handle(&RequestContext::new("GET", "/en-gb/todos?test=a"))
        .await
        .unwrap();
    assert!(!handled.outcome.unwrap().verified);

    // The hook ran regardless, so the saved list is served next.
    assert_eq!(text(&get(&server, "/en-gb/todos").await), r#"[{"id":1}]"#);
}

#[tokio::test]
async fn test_config_driven_server() {
    let config = MockServerConfig::from_yaml(
        r#"
stubs:
  - id: flaky-once
    request:
      path:
        type: exact
        value: /flaky
    times: 1
    response:
      status: 503
  - id: flaky-recovered
    request:
      path:
        type: exact
        value: /flaky
    response:
      status: 200
      body:
        type: text
        content: ok
scenarios:
  - id: logged-in
    state:
      user:
        type: string
        hidden: true
    stubs:
      - id: login
        request:
          method: [POST]
          path:
            type: exact
            value: /login
        set_state:
          user: jane
        response:
          status: 204
      - id: profile
        request:
          path:
            type: exact
            value: /profile
        state:
          user: jane
        response:
          body:
            type: json
            content:
              name: jane
"#,
    )
    .unwrap();
    let server = MockServer::from_config(&config).await.unwrap();

    assert_eq!(get(&server, "/flaky").await.status, 503);
    let res = get(&server, "/flaky").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("content-type"), Some("text/plain"));

    server.start_scenario("logged-in", &State::new()).await.unwrap();
    assert_eq!(get(&server, "/profile").await.status, 404);
    assert_eq!(send(&server, RequestContext::new("POST", "/login")).await.status, 204);

    let res = get(&server, "/profile").await;
    assert_eq!(res.status, 200);
    assert_eq!(text(&res), r#"{"name":"jane"}"#);
    assert_eq!(server.total_requests(), 5);
    assert_eq!(server.total_unmatched(), 1);
}
