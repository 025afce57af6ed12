//! Integration tests for the built-in notifiers. The webhook side runs
//! against a one-request HTTP listener on loopback.

use std::time::Duration;

use agent_fleet::models::event::{types, EventPriority, OrchestratorEvent};
use agent_fleet::plugins::log_notifier::LogNotifier;
use agent_fleet::plugins::webhook_notifier::WebhookNotifier;
use agent_fleet::plugins::Notifier;
use agent_fleet::AppError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn event() -> OrchestratorEvent {
    OrchestratorEvent::new(
        types::CI_FAILING,
        EventPriority::Warning,
        "app-1",
        "app",
        "app-1: pr_open -> ci_failed",
    )
    .with_data("oldStatus", "pr_open")
}

/// Accept one request, answer with `status`, and return the request body.
async fn one_shot_server(status: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/hook", listener.local_addr().expect("addr"));

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 4096];
        let body = loop {
            let n = stream.read(&mut chunk).await.expect("read");
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw).into_owned();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if body.len() >= length {
                    break body.to_owned();
                }
            }
            if n == 0 {
                break String::new();
            }
        };
        let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        stream.write_all(response.as_bytes()).await.expect("write");
        body
    });
    (url, handle)
}

#[tokio::test]
async fn log_notifier_accepts_every_priority() {
    for priority in [
        EventPriority::Urgent,
        EventPriority::Action,
        EventPriority::Warning,
        EventPriority::Info,
    ] {
        let mut event = event();
        event.priority = priority;
        LogNotifier.notify(&event).await.expect("log");
    }
}

#[tokio::test]
async fn webhook_posts_event_json() {
    let (url, server) = one_shot_server("200 OK").await;
    let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).expect("client");

    notifier.notify(&event()).await.expect("deliver");

    let body: serde_json::Value =
        serde_json::from_str(&server.await.expect("server")).expect("json body");
    assert_eq!(body["type"], "ci.failing");
    assert_eq!(body["priority"], "warning");
    assert_eq!(body["session_id"], "app-1");
    assert_eq!(body["data"]["oldStatus"], "pr_open");
}

#[tokio::test]
async fn webhook_error_status_is_a_notifier_error() {
    let (url, server) = one_shot_server("500 Internal Server Error").await;
    let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).expect("client");

    let err = notifier.notify(&event()).await.expect_err("500");
    server.await.expect("server");

    assert!(matches!(err, AppError::Notifier(_)));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn webhook_unreachable_is_a_notifier_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/hook", listener.local_addr().expect("addr"));
    drop(listener);
    let notifier = WebhookNotifier::new(url, Duration::from_secs(2)).expect("client");

    let err = notifier.notify(&event()).await.expect_err("refused");

    assert!(err.to_string().starts_with("notifier: webhook request failed"));
}
