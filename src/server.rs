use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    Router,
};
use tracing::{debug, info, warn};

use crate::bot::{self, AppState};
use crate::gate::{self, Rejection};

/// Every method and path goes through the same handler; the gate sorts
/// them out.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle_webhook).with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let update = match gate::validate(&state.config, &method, uri.path(), &body) {
        Ok(update) => update,
        Err(rejection) => {
            if let Rejection::BadJson(_) = rejection {
                warn!("Webhook rejected: {}", rejection);
            } else {
                debug!("Webhook {} {} stopped at gate: {}", method, uri.path(), rejection);
            }
            return (rejection.status(), rejection.body());
        }
    };

    // Past the gate the platform always gets 200, or it would redeliver.
    bot::route(&state, &update).await;
    (StatusCode::OK, "OK")
}

/// Serve the webhook until Ctrl-C.
pub async fn serve(state: Arc<AppState>, listen: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;

    info!("Listening for webhook calls on {}", listen);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Participant, Roster};
    use crate::testing::{self, Fakes};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const ADMIN: &str = "1000";

    fn test_app(secret: Option<&str>) -> (Router, Fakes) {
        let mut config = testing::config(Some(ADMIN));
        config.telegram.webhook_secret = secret.map(String::from);
        let (state, fakes) = testing::app_state(config);
        (app(Arc::new(state)), fakes)
    }

    fn message(chat_id: i64, text: &str, is_bot: bool) -> String {
        serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "date": 1_700_000_000,
                "text": text,
                "chat": {"id": chat_id, "type": "private"},
                "from": {"id": chat_id, "is_bot": is_bot, "first_name": "Ann"}
            }
        })
        .to_string()
    }

    fn post(path: &str, body: String) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_is_acknowledged() {
        let (app, fakes) = test_app(Some("s3cret"));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        assert!(fakes.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_forbidden() {
        let (app, fakes) = test_app(Some("s3cret"));
        let response = app
            .oneshot(post("/webhook/nope", message(7, "/start", false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(fakes.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bad_json() {
        let (app, fakes) = test_app(None);
        let response = app
            .oneshot(post("/webhook", "{not json".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Bad JSON");
        assert!(fakes.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bot_sender_ignored() {
        let (app, fakes) = test_app(None);
        let response = app
            .oneshot(post("/webhook", message(7, "/list", true)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Ignore bot");
        assert!(fakes.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_handled() {
        let (app, fakes) = test_app(Some("s3cret"));
        let response = app
            .oneshot(post("/webhook/s3cret", message(7, "/start", false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent = fakes.messenger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, ADMIN);
        assert_eq!(sent[1].0, "7");
    }

    #[tokio::test]
    async fn test_broadcast_through_webhook() {
        let mut config = testing::config(Some(ADMIN));
        config.broadcast.concurrency = 4;
        config.participants = Roster::new(vec![
            Participant {
                name: "Ann".to_string(),
                chat_id: "11".to_string(),
            },
            Participant {
                name: "Bob".to_string(),
                chat_id: "22".to_string(),
            },
        ]);
        let (state, fakes) = testing::app_state(config);
        fakes.messenger.fail_for("22");

        let response = app(Arc::new(state))
            .oneshot(post("/webhook", message(1000, "/broadcast Cookies at 5", false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent = fakes.messenger.sent();
        assert!(sent
            .iter()
            .any(|(chat, text)| chat == "11" && text.ends_with("Cookies at 5")));
        assert!(!sent.iter().any(|(chat, _)| chat == "22"));
        assert!(sent
            .iter()
            .any(|(chat, text)| chat == ADMIN && text.contains("1/2")));
    }

    #[tokio::test]
    async fn test_collaborator_failure_still_ok() {
        let (app, fakes) = test_app(None);
        fakes.messenger.fail_for("7");
        fakes.messenger.fail_for(ADMIN);
        let response = app
            .oneshot(post("/webhook", message(7, "/hat", false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fakes.dispatcher.calls(), 0);
    }
}
