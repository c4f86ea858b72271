//! Webhook endpoint behaviour, driven through the router without a socket.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use http_body_util::BodyExt;
use nexus_teams_transcripts::http_server::{router, RegistrationMap, ServerState};
use nexus_teams_transcripts::trigger::{Registration, TriggerConfig};
use nexus_teams_transcripts::types::PendingEvent;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    app: axum::Router,
    reg: Registration,
    events: mpsc::UnboundedReceiver<PendingEvent>,
    graph: MockServer,
}

impl TestApp {
    async fn spawn() -> Self {
        let server = MockServer::start().await;
        let (controller, _store) = controller(&server);
        let reg = registration(TriggerConfig::default());

        let registrations: RegistrationMap = Arc::new(RwLock::new(HashMap::from([(
            reg.id.clone(),
            reg.clone(),
        )])));
        let (event_tx, events) = mpsc::unbounded_channel();

        let app = router(ServerState {
            registrations,
            controller,
            event_tx,
        });

        Self {
            app,
            reg,
            events,
            graph: server,
        }
    }

    fn hook_uri(&self) -> String {
        format!("/hooks/{}", self.reg.id)
    }
}

fn post(uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap()
}

#[tokio::test]
async fn validation_token_is_echoed_as_plain_text() {
    let test = TestApp::spawn().await;

    let response = test
        .app
        .clone()
        .oneshot(post(
            &format!("{}?validationToken=Validation%3A%20Testing%20client", test.hook_uri()),
            Body::empty(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Validation: Testing client");
}

#[tokio::test]
async fn validation_handshake_ignores_registration_lookup() {
    let test = TestApp::spawn().await;

    let response = test
        .app
        .clone()
        .oneshot(post("/hooks/trg_pending?validationToken=abc", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_registration_is_not_found() {
    let test = TestApp::spawn().await;

    let response = test
        .app
        .clone()
        .oneshot(post("/hooks/trg_missing", Body::from(r#"{"value":[]}"#)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let test = TestApp::spawn().await;

    let response = test
        .app
        .clone()
        .oneshot(post(&test.hook_uri(), Body::from("not json")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn each_change_becomes_its_own_event() {
    let mut test = TestApp::spawn().await;

    let body = json!({
        "value": [
            change_notification("sub-1", &test.reg.client_state, "communications/onlineMeetings('m1')/transcripts('t1')"),
            change_notification("sub-1", &test.reg.client_state, "communications/onlineMeetings('m1')/transcripts('t2')"),
            change_notification("sub-1", "forged", "communications/onlineMeetings('m1')/transcripts('t3')")
        ]
    });

    let response = test
        .app
        .clone()
        .oneshot(post(&test.hook_uri(), Body::from(body.to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let first = test.events.try_recv().unwrap();
    let second = test.events.try_recv().unwrap();
    assert!(test.events.try_recv().is_err());

    assert_eq!(first.event_type, "teams.transcript.created");
    assert_eq!(first.subject, test.reg.id);
    assert_eq!(
        first.data["resource"],
        "communications/onlineMeetings('m1')/transcripts('t1')"
    );
    assert_eq!(first.data["subscriptionId"], "sub-1");
    assert_eq!(
        second.data["resource"],
        "communications/onlineMeetings('m1')/transcripts('t2')"
    );
}

#[tokio::test]
async fn lifecycle_only_batch_emits_nothing() {
    let mut test = TestApp::spawn().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(subscription_json(
            "sub-1",
            "communications/onlineMeetings/getAllTranscripts",
            &test.reg.webhook_url,
            1008,
        )))
        .expect(1)
        .mount(&test.graph)
        .await;

    let body = json!({
        "value": [lifecycle_notification("sub-1", &test.reg.client_state, "reauthorizationRequired")]
    });
    let response = test
        .app
        .clone()
        .oneshot(post(&test.hook_uri(), Body::from(body.to_string())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(test.events.try_recv().is_err());
}
