//! End-to-end invocation tests: event in, Outcome out.

use serde_json::{json, Value};
use skiff::app::{error_handler, param_handler};
use skiff::prelude::*;
use skiff::session::SessionOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn echo_param(name: &'static str) -> Handler {
    handler(move |req, res| async move {
        let value = {
            let guard = req.lock().unwrap();
            guard.params.get(name).cloned().unwrap_or_default()
        };
        res.lock().unwrap().send(Payload::text(value));
        Flow::Done
    })
}

#[tokio::test]
async fn test_empty_event_resolves_default_route_404() {
    init_tracing();
    let outcome = invoke_with_context(&json!({}), AppConfig::new(), CallerContext::default())
        .await
        .unwrap();
    assert_eq!(outcome.status_code, 404);
    assert_eq!(outcome.body, "Cannot GET /");
}

#[tokio::test]
async fn test_param_handler_numifies_and_route_formats() {
    let app = App::new();
    app.param(
        &["id"],
        param_handler(|req, _res, value| async move {
            match value.parse::<i64>() {
                Ok(n) => {
                    req.lock().unwrap().data.insert("id".to_string(), json!(n));
                    Flow::Next
                }
                Err(_) => Flow::Fail(SkiffError::bad_request("id must be numeric")),
            }
        }),
    );
    app.get(
        "/user/:id",
        handler(|req, res| async move {
            let value = {
                let guard = req.lock().unwrap();
                guard.data.get("id").cloned().unwrap_or(Value::Null)
            };
            let kind = match value {
                Value::Number(_) => "number",
                Value::String(_) => "string",
                _ => "other",
            };
            res.lock()
                .unwrap()
                .send(Payload::text(format!("{}:{}", kind, value)));
            Flow::Done
        }),
    );

    let config = AppConfig::new().with_app(app.clone());
    let outcome = invoke_with_context(
        &json!({ "path": "/user/123" }),
        config,
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.body, "number:123");

    let outcome = invoke_with_context(
        &json!({ "path": "/post/123" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 404);
}

#[tokio::test]
async fn test_param_handler_bound_to_several_names() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = App::new();
    let counter = hits.clone();
    app.param(
        &["id", "uid"],
        param_handler(move |_req, _res, _value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Next
            }
        }),
    );
    app.get("/user/:id", echo_param("id"));
    app.get("/account/:uid", echo_param("uid"));

    for path in ["/user/7", "/account/9"] {
        let outcome = invoke_with_context(
            &json!({ "path": path }),
            AppConfig::new().with_app(app.clone()),
            CallerContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.status_code, 200);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_param_handler_fires_once_per_value_per_request() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = App::new();
    let counter = hits.clone();
    app.param(
        &["id"],
        param_handler(move |_req, _res, _value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Next
            }
        }),
    );
    // First matching route defers to the next one; the same :id literal
    // must not re-fire the param handler.
    app.get(
        "/user/:id",
        handler(|_req, _res| async move { Flow::NextRoute }),
    );
    app.get("/user/:id", echo_param("id"));

    let outcome = invoke_with_context(
        &json!({ "path": "/user/42" }),
        AppConfig::new().with_app(app.clone()),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "42");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // A new request with a different literal fires again.
    invoke_with_context(
        &json!({ "path": "/user/43" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_param_handler_reaches_error_middleware() {
    let app = App::new();
    app.param(
        &["id"],
        param_handler(|_req, _res, _value| async move {
            Flow::Fail(SkiffError::new("id lookup exploded"))
        }),
    );
    app.get("/user/:id", echo_param("id"));
    app.use_error_handler(
        None,
        error_handler(|err, _req, res| async move {
            let mut guard = res.lock().unwrap();
            guard.set_status(err.code);
            guard.send(Payload::text(err.message));
            Flow::Done
        }),
    );

    let outcome = invoke_with_context(
        &json!({ "path": "/user/1" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 500);
    assert_eq!(outcome.body, "id lookup exploded");
}

#[tokio::test]
async fn test_route_params_are_percent_decoded() {
    let app = App::new();
    app.get("/file/:name", echo_param("name"));

    let outcome = invoke_with_context(
        &json!({ "path": "/file/foo%25bar" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "foo%bar");
}

#[tokio::test]
async fn test_path_scoped_middleware_sees_stripped_path() {
    let app = App::new();
    app.use_handler(
        Some("/api"),
        handler(|req, res| async move {
            let path = req.lock().unwrap().path.clone();
            res.lock().unwrap().send(Payload::text(path));
            Flow::Done
        }),
    );

    let outcome = invoke_with_context(
        &json!({ "path": "/api/users" }),
        AppConfig::new().with_app(app.clone()),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "/users");

    let outcome = invoke_with_context(
        &json!({ "path": "/other" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 404);
}

fn call_greet_handler() -> Handler {
    handler(|req, res| async move {
        let result = {
            let mut guard = req.lock().unwrap();
            guard.call_extension("greet", Value::Null)
        };
        match result {
            Ok(value) => {
                res.lock()
                    .unwrap()
                    .send(Payload::text(value.as_str().unwrap_or_default().to_string()));
                Flow::Done
            }
            Err(err) => Flow::Fail(err),
        }
    })
}

#[tokio::test]
async fn test_request_extensions_do_not_leak_to_siblings() {
    let extended = App::new();
    extended.extend_request("greet", Arc::new(|_req, _arg| json!("hello")));
    extended.get("/", call_greet_handler());

    let sibling = App::new();
    sibling.get("/", call_greet_handler());

    let outcome = invoke_with_context(
        &json!({}),
        AppConfig::new().with_app(extended),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.body, "hello");

    let outcome = invoke_with_context(
        &json!({}),
        AppConfig::new().with_app(sibling),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.contains("greet is not a function"));
}

#[tokio::test]
async fn test_child_extension_overrides_parent_inside_mount() {
    let parent = App::new();
    parent.extend_request("greet", Arc::new(|_req, _arg| json!("parent")));
    parent.get("/top", call_greet_handler());

    let child = App::new();
    child.extend_request("greet", Arc::new(|_req, _arg| json!("child")));
    child.get("/", call_greet_handler());
    parent.use_app("/p", &child);

    let outcome = invoke_with_context(
        &json!({ "path": "/p" }),
        AppConfig::new().with_app(parent.clone()),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "child");

    let outcome = invoke_with_context(
        &json!({ "path": "/top" }),
        AppConfig::new().with_app(parent),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "parent");
}

#[tokio::test]
async fn test_caller_identity_merged_into_json_body() {
    let app = App::new();
    app.get(
        "/",
        handler(|_req, res| async move {
            res.lock().unwrap().send(Payload::json(json!({ "a": 1 })));
            Flow::Done
        }),
    );

    let caller = CallerContext {
        open_id: Some("OID".to_string()),
        ..Default::default()
    };
    let outcome = invoke_with_context(&json!({}), AppConfig::new().with_app(app), caller)
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&outcome.body).unwrap();
    assert_eq!(body["a"], 1);
    assert_eq!(body["wxContext"]["openid"], "OID");
    assert_eq!(body["wxContext"]["appid"], Value::Null);
    assert_eq!(body["wxContext"]["unionid"], Value::Null);
}

#[tokio::test]
async fn test_session_data_survives_across_invocations() {
    init_tracing();
    let (session, store) = session_middleware(SessionOptions::new());
    let app = App::new();
    app.use_handler(None, session);
    app.get(
        "/visit",
        handler(|req, res| async move {
            let mut session = {
                let mut guard = req.lock().unwrap();
                let session = guard.session.as_mut().unwrap();
                session.set("user", json!("alice"));
                session.clone()
            };
            session.save().await;
            res.lock().unwrap().send(Payload::text("stored"));
            Flow::Done
        }),
    );
    app.get(
        "/whoami",
        handler(|req, res| async move {
            let user = {
                let guard = req.lock().unwrap();
                guard
                    .session
                    .as_ref()
                    .and_then(|session| session.get("user").cloned())
                    .unwrap_or(Value::Null)
            };
            res.lock()
                .unwrap()
                .send(Payload::text(user.as_str().unwrap_or("nobody").to_string()));
            Flow::Done
        }),
    );

    let outcome = invoke_with_context(
        &json!({ "path": "/visit" }),
        AppConfig::new().with_app(app.clone()),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "stored");

    let (id, _) = store.all().await.into_iter().next().unwrap();
    let outcome = invoke_with_context(
        &json!({
            "path": "/whoami",
            "headers": { "Cookie": format!("session-id={}", id) },
        }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "alice");
}

#[tokio::test]
async fn test_head_request_resolves_without_body() {
    let app = App::new();
    app.get(
        "/",
        handler(|_req, res| async move {
            res.lock().unwrap().send(Payload::text("content"));
            Flow::Done
        }),
    );

    let outcome = invoke_with_context(
        &json!({ "httpMethod": "HEAD" }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.body, "");
}

#[tokio::test]
async fn test_query_string_reaches_handler() {
    let app = App::new();
    app.get(
        "/search",
        handler(|req, res| async move {
            let url = req.lock().unwrap().url.clone();
            res.lock().unwrap().send(Payload::text(url));
            Flow::Done
        }),
    );

    let outcome = invoke_with_context(
        &json!({
            "path": "/search",
            "queryStringParameters": { "q": "rust" },
        }),
        AppConfig::new().with_app(app),
        CallerContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.body, "/search?q=rust");
}
