//! Invocation entry point.
//!
//! One call in, one [`Outcome`] out: the event is normalized, synthetic
//! transport objects are built around the capture shim, the assembled
//! application dispatches against them, and the one-shot result cell
//! settles with whatever the application wrote. A handler that claims
//! the request but never ends the response leaves the invocation
//! pending; the caller's own timeout governs.

use crate::app::{assemble, dispatch, AppConfig, DispatchResult};
use crate::error::SkiffError;
use crate::event::normalize;
use crate::http::{
    CallerContext, Capture, Outcome, Payload, RequestMeta, SharedRequest, SharedResponse,
    SkiffRequest, SkiffResponse,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Run one invocation event against an assembled application, sourcing
/// the caller identity from the hosting runtime's environment.
pub async fn invoke(event: &Value, config: AppConfig) -> Result<Outcome, SkiffError> {
    invoke_with_context(event, config, CallerContext::from_env()).await
}

/// Run one invocation event with an explicit caller identity.
pub async fn invoke_with_context(
    event: &Value,
    config: AppConfig,
    caller: CallerContext,
) -> Result<Outcome, SkiffError> {
    let params = normalize(event);
    info!("invoking {} {}", params.method, params.path);

    let request = SkiffRequest::build(&params);
    let meta = RequestMeta::of(&request);
    let (capture, outcome_rx) = Capture::channel(caller);

    let app = assemble(config).await?;
    let mut response = SkiffResponse::new(meta, capture);
    response.set_etag_fn(app.etag_fn());

    let req: SharedRequest = Arc::new(Mutex::new(request));
    let res: SharedResponse = Arc::new(Mutex::new(response));

    match dispatch(app, req.clone(), res.clone()).await {
        DispatchResult::Done => {}
        DispatchResult::Unhandled => {
            let (method, path) = {
                let guard = req.lock().unwrap();
                (guard.method.clone(), guard.path.clone())
            };
            warn!("no route matched {} {}", method, path);
            let mut guard = res.lock().unwrap();
            if !guard.finished() {
                guard.set_status(404);
                guard.send(Payload::text(format!("Cannot {} {}", method, path)));
            }
        }
        DispatchResult::Failed(err) => {
            error!("unhandled application error: {}", err);
            let mut guard = res.lock().unwrap();
            if !guard.finished() {
                guard.set_status(err.code);
                guard.send(Payload::text(err.message));
            }
        }
    }

    outcome_rx
        .await
        .map_err(|_| SkiffError::new("invocation ended without settling a result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{handler, Flow};
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_app_resolves_404() {
        let outcome = invoke_with_context(
            &json!({ "path": "/missing", "httpMethod": "GET" }),
            AppConfig::new(),
            CallerContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.status_code, 404);
        assert_eq!(outcome.body, "Cannot GET /missing");
    }

    #[tokio::test]
    async fn test_escaped_error_becomes_status_and_body() {
        let config = AppConfig::new().attach(crate::app::Attachment::Handler(handler(
            |_req, _res| async move { Flow::Fail(SkiffError::with_code(503, "backend down")) },
        )));
        let outcome = invoke_with_context(&json!({}), config, CallerContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.status_code, 503);
        assert_eq!(outcome.body, "backend down");
    }
}
