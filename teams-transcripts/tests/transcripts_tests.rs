//! Transcript actions and option lists against a mock Graph.

mod common;

use base64::Engine as _;
use common::*;
use nexus_teams_transcripts::transcripts::{TranscriptClient, TranscriptFormat};
use nexus_teams_transcripts::TeamsError;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VTT: &str = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\n<v Ada>Hello</v>\n";

#[tokio::test]
async fn transcript_content_is_base64_with_file_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/u1/onlineMeetings/m1/transcripts/t1/content"))
        .and(query_param("$format", "text/vtt"))
        .and(header("accept", "text/vtt"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(VTT, "text/vtt"))
        .expect(1)
        .mount(&server)
        .await;

    let content = TranscriptClient::new(graph_client(&server))
        .get_transcript_content("u1", "m1", "t1", TranscriptFormat::Vtt)
        .await
        .unwrap();

    assert_eq!(content.file_name, "transcript_t1.vtt");
    assert_eq!(content.mime_type, "text/vtt");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&content.data)
        .unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), VTT);
}

#[tokio::test]
async fn text_format_uses_txt_extension() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/u1/onlineMeetings/m1/transcripts/t1/content"))
        .and(query_param("$format", "text/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("Ada: Hello", "text/plain"))
        .mount(&server)
        .await;

    let content = TranscriptClient::new(graph_client(&server))
        .get_transcript_content("u1", "m1", "t1", TranscriptFormat::Text)
        .await
        .unwrap();

    assert_eq!(content.file_name, "transcript_t1.txt");
    assert_eq!(content.format, TranscriptFormat::Text);
}

#[tokio::test]
async fn limited_listing_reads_one_page() {
    let server = MockServer::start().await;
    let next = format!("{}/v1.0/users/u1/onlineMeetings/m1/transcripts?$skiptoken=2", server.uri());
    Mock::given(method("GET"))
        .and(path("/v1.0/users/u1/onlineMeetings/m1/transcripts"))
        .and(query_param("$top", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![json!({"id": "t1"}), json!({"id": "t2"})],
            Some(&next),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let items = TranscriptClient::new(graph_client(&server))
        .list_transcripts("u1", Some("m1"), None, Some(2))
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn listing_without_meeting_uses_all_transcripts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/u1/onlineMeetings/getAllTranscripts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(odata_page(vec![json!({"id": "t9"})], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let items = TranscriptClient::new(graph_client(&server))
        .list_transcripts("u1", None, None, None)
        .await
        .unwrap();

    assert_eq!(items[0]["id"], "t9");
}

#[tokio::test]
async fn blank_user_is_a_configuration_error() {
    let server = MockServer::start().await;
    let err = TranscriptClient::new(graph_client(&server))
        .get_meeting(" ", "m1")
        .await
        .unwrap_err();

    assert!(matches!(err, TeamsError::Config(_)));
}

#[tokio::test]
async fn user_search_builds_options() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .and(query_param(
            "$filter",
            "startsWith(displayName,'O''B') or startsWith(userPrincipalName,'O''B')",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![
                json!({"id": "u1", "displayName": "O'Brien", "userPrincipalName": "ob@contoso.com"}),
                json!({"id": "u2", "userPrincipalName": "ob2@contoso.com"}),
            ],
            None,
        )))
        .mount(&server)
        .await;

    let options = TranscriptClient::new(graph_client(&server))
        .search_users(Some("O'B"))
        .await
        .unwrap();

    assert_eq!(options[0].name, "O'Brien");
    assert_eq!(options[0].value, "u1");
    assert!(options[0].url.as_deref().unwrap().ends_with("/UserDetails/u1"));
    assert_eq!(options[1].name, "ob2@contoso.com");
}

#[tokio::test]
async fn meeting_search_labels_with_start_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/u1/onlineMeetings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![json!({
                "id": "m1",
                "subject": "Weekly sync",
                "startDateTime": "2024-03-04T15:30:00Z"
            })],
            None,
        )))
        .mount(&server)
        .await;

    let client = TranscriptClient::new(graph_client(&server));
    let options = client.search_meetings("u1", None).await.unwrap();
    assert_eq!(options[0].name, "Weekly sync (2024-03-04 15:30 UTC)");
    assert_eq!(options[0].value, "m1");

    assert!(client.search_meetings("", None).await.unwrap().is_empty());
}
