//! End-to-end session tests against the replay server.
//!
//! Each test starts a `ReplayServer` on a free local port, points a
//! `ResearchSession` at it and drives the session loop until the run ends.
//! Tests skip when the sandbox does not allow binding a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use research_tracker::connection::{BackoffPolicy, ClientId, ConnectionConfig};
use research_tracker::errors::TrackerError;
use research_tracker::projection::{HtmlMarkup, project};
use research_tracker::replay::{ReplayOptions, ReplayServer, Transcript};
use research_tracker::session::{ResearchSession, SessionUpdate};
use research_tracker::tracker::{Generation, RunStatus, StageStatus};

const QUANTUM: &str = r##"
{"type": "thinking", "data": {"thoughts": "<think>Start broad on {topic}</think>"}}
{"type": "generate_query", "data": {"query": "{topic} basics", "rationale": "Start broad"}}
{"type": "web_research", "data": {"sources": [{"title": "Intro to {topic}", "url": "https://a.example"}, "https://b.example"]}}
{"type": "summarize", "data": {"summary": "First pass"}}
{"type": "reflection", "data": {"query": "{topic} hardware", "knowledge_gap": "Hardware limits"}}
{"type": "routing", "data": {"decision": "continue", "loop_count": 1}}
{"type": "generate_query", "data": {"query": "{topic} hardware", "rationale": "Fill the gap"}}
{"type": "web_research", "data": {"sources": ["https://c.example"]}}
{"type": "summarize", "data": {"summary": "Second pass"}}
{"type": "reflection", "data": {"query": "", "knowledge_gap": "None"}}
{"type": "thinking", "data": {"thoughts": "<think>Ready to write up</think>"}}
{"type": "routing", "data": {"decision": "finalize", "loop_count": 2}}
{"type": "finalize", "data": {"summary": "# Report\n\nAll about {topic}."}}
"##;

const RUN_TIMEOUT: Duration = Duration::from_secs(15);

/// Start a replay server, or `None` when binding is not permitted.
async fn start_server(transcript: &str, options: ReplayOptions) -> Option<(ReplayServer, String)> {
    let transcript = Transcript::parse(transcript).unwrap();
    let mut server = ReplayServer::new(transcript, options);
    match server.start().await {
        Ok(url) => Some((server, url)),
        Err(e) => {
            let err_chain = format!("{:?}", e);
            if err_chain.contains("Operation not permitted")
                || err_chain.contains("Permission denied")
                || err_chain.contains("os error 1")
                || err_chain.contains("bind")
            {
                eprintln!("Skipping session test (sandbox): {:?}", e);
                return None;
            }
            panic!("Unexpected error: {:?}", e);
        }
    }
}

fn fast_options() -> ReplayOptions {
    ReplayOptions {
        default_delay: Duration::from_millis(10),
        ..ReplayOptions::default()
    }
}

fn session_for(url: &str) -> ResearchSession {
    let mut config = ConnectionConfig::new(ConnectionConfig::parse_url(url).unwrap());
    config.connect_timeout = Duration::from_secs(2);
    config.backoff = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(1), 3);
    ResearchSession::with_client_id(config, ClientId::generate())
}

/// Drive the session until the run is no longer running, collecting updates.
async fn drive(session: &mut ResearchSession) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    let result = tokio::time::timeout(RUN_TIMEOUT, async {
        while session.tracker().is_running() {
            match session.next_update().await {
                Some(update) => updates.push(update),
                None => break,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "run did not finish in time");
    updates
}

#[tokio::test]
async fn test_replayed_run_completes() {
    let Some((_server, url)) = start_server(QUANTUM, fast_options()).await else {
        return;
    };
    let mut session = session_for(&url);

    let generation = session.submit("quantum computing").await.unwrap();
    assert_eq!(generation, Generation(1));
    drive(&mut session).await;

    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.topic, "quantum computing");
    let ids: Vec<&str> = run.stage_sequence.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["generate_query", "web_research", "summarize", "reflection", "routing", "finalize"]
    );
    assert!(run.stage_sequence.iter().all(|s| s.status == StageStatus::Complete));
    assert_eq!(run.stage("generate_query").unwrap().activations, 2);
    assert_eq!(run.loop_count, Some(2));
    assert_eq!(session.peek_reasoning(), "Ready to write up");
    assert_eq!(session.malformed_count(), 0);

    let projection = project(&run, &HtmlMarkup);
    assert_eq!(projection.status_line, "Research completed!");
    assert!(projection.result_markup.unwrap().contains("<h1>Report</h1>"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let transcript = r#"
{"type": "generate_query", "data": {"query": "q", "rationale": "r"}}
{"type": "web_research", "data": {"sources": 5}}
{"type": "summarize", "data": "not an object"}
{"type": "finalize", "data": {"summary": "done"}}
"#;
    let Some((_server, url)) = start_server(transcript, fast_options()).await else {
        return;
    };
    let mut session = session_for(&url);

    session.submit("rust").await.unwrap();
    drive(&mut session).await;

    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    let ids: Vec<&str> = run.stage_sequence.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(ids, vec!["generate_query", "finalize"]);
    assert_eq!(session.malformed_count(), 2);
    assert_eq!(run.final_result.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_dropped_connection_resumes_run() {
    let options = ReplayOptions {
        disconnect_after: Some(3),
        ..fast_options()
    };
    let Some((_server, url)) = start_server(QUANTUM, options).await else {
        return;
    };
    let mut session = session_for(&url);

    session.submit("quantum computing").await.unwrap();
    let updates = drive(&mut session).await;

    assert!(
        updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Reconnected { .. })),
        "expected a reconnect, got {:?}",
        updates
    );
    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.generation, Generation(1));
    assert_eq!(run.stage("generate_query").unwrap().activations, 2);
}

#[tokio::test]
async fn test_new_submission_abandons_running_run() {
    let slow = ReplayOptions {
        default_delay: Duration::from_millis(150),
        ..ReplayOptions::default()
    };
    let Some((_server, url)) = start_server(QUANTUM, slow).await else {
        return;
    };
    let mut session = session_for(&url);

    session.submit("first topic").await.unwrap();
    let first_frame = tokio::time::timeout(RUN_TIMEOUT, async {
        loop {
            match session.next_update().await {
                Some(update) if update.changed() => break,
                Some(_) => continue,
                None => panic!("session ended early"),
            }
        }
    })
    .await;
    assert!(first_frame.is_ok());
    assert!(session.tracker().is_running());

    let generation = session.submit("second topic").await.unwrap();
    assert_eq!(generation, Generation(2));
    let run = session.snapshot();
    assert_eq!(run.topic, "second topic");
    assert_eq!(run.stage_sequence.len(), 1);
    assert_eq!(run.stage_sequence[0].stage_id, "generate_query");
    assert_eq!(run.stage_sequence[0].status, StageStatus::Active);
    assert!(session.peek_reasoning().is_empty());

    drive(&mut session).await;

    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.generation, Generation(2));
    assert_eq!(run.final_result.as_deref(), Some("# Report\n\nAll about second topic."));
}

#[tokio::test]
async fn test_unreachable_server_fails_run() {
    let mut config = ConnectionConfig::new(ConnectionConfig::parse_url("ws://127.0.0.1:9").unwrap());
    config.connect_timeout = Duration::from_secs(1);
    config.backoff = BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(500), 2);
    let mut session = ResearchSession::with_client_id(config, ClientId::new("user-unreachable"));

    let err = session.submit("anything").await.unwrap_err();
    assert!(matches!(err, TrackerError::ConnectionUnrecoverable { attempts: 2 }));

    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Failed);
    let projection = project(&run, &HtmlMarkup);
    assert!(projection.status_line.starts_with("Unable to connect."));
}

#[tokio::test]
async fn test_cancelled_update_resumes_reconnect() {
    let options = ReplayOptions {
        disconnect_after: Some(1),
        ..fast_options()
    };
    let Some((_server, url)) = start_server(QUANTUM, options).await else {
        return;
    };
    let mut session = session_for(&url);
    session.submit("quantum computing").await.unwrap();

    // Poll with a deadline shorter than the backoff delay so the reconnect
    // is dropped several times before it can complete.
    let mut updates = Vec::new();
    let mut interrupted = 0;
    let finished = tokio::time::timeout(RUN_TIMEOUT, async {
        while session.tracker().is_running() {
            match tokio::time::timeout(Duration::from_millis(50), session.next_update()).await {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => break,
                Err(_) => {
                    if session.is_recovering() {
                        interrupted += 1;
                    }
                }
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "run did not finish in time");

    assert!(interrupted >= 2, "reconnect was interrupted {} time(s)", interrupted);
    assert!(
        updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Reconnected { attempts: 1 })),
        "expected a first-attempt reconnect, got {:?}",
        updates
    );
    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.generation, Generation(1));
}

#[tokio::test]
async fn test_exhausted_reconnect_fails_running_run() {
    let options = ReplayOptions {
        disconnect_after: Some(2),
        ..fast_options()
    };
    let Some((mut server, url)) = start_server(QUANTUM, options).await else {
        return;
    };
    let mut config = ConnectionConfig::new(ConnectionConfig::parse_url(&url).unwrap());
    config.connect_timeout = Duration::from_secs(1);
    config.backoff = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(1), 2);
    let mut session = ResearchSession::with_client_id(config, ClientId::new("user-exhausted"));

    session.submit("quantum computing").await.unwrap();
    let mut applied = 0;
    while applied < 2 {
        let update = tokio::time::timeout(RUN_TIMEOUT, session.next_update())
            .await
            .expect("frame did not arrive in time")
            .expect("session ended early");
        if matches!(update, SessionUpdate::Applied(_)) {
            applied += 1;
        }
    }
    server.stop();

    let updates = drive(&mut session).await;
    assert!(
        updates.iter().any(|u| matches!(
            u,
            SessionUpdate::Failed(TrackerError::ConnectionUnrecoverable { attempts: 2 })
        )),
        "expected the run to fail, got {:?}",
        updates
    );
    assert!(!session.is_recovering());

    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.generation, Generation(1));
    let projection = project(&run, &HtmlMarkup);
    assert!(projection.status_line.starts_with("Unable to connect."));
}

const FIRST_REPORT: &str = r#"{"type": "finalize", "data": {"summary": "first report"}}"#;
const FIRST_QUERY: &str = r#"{"type": "generate_query", "data": {"query": "q", "rationale": "r"}}"#;

/// A pipeline that answers the first research request with a report and
/// every later one with a query. A socket asked for a second run repeats
/// its earlier report before answering, without any run tag.
async fn start_repeating_server() -> Option<String> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Skipping session test (sandbox): {:?}", e);
            return None;
        }
    };
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_repeating(stream, requests.clone()));
        }
    });
    Some(format!("ws://{}", addr))
}

async fn serve_repeating(stream: TcpStream, requests: Arc<AtomicUsize>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let mut served = false;
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        if !text.as_str().contains("\"research\"") {
            continue;
        }
        let mut replies = Vec::new();
        if served {
            replies.push(FIRST_REPORT);
        }
        if requests.fetch_add(1, Ordering::SeqCst) == 0 {
            replies.push(FIRST_REPORT);
        } else {
            replies.push(FIRST_QUERY);
        }
        served = true;
        for reply in replies {
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_second_run_ignores_frames_left_on_previous_channel() {
    let Some(url) = start_repeating_server().await else {
        return;
    };
    let mut session = session_for(&url);

    session.submit("first topic").await.unwrap();
    drive(&mut session).await;
    let run = session.snapshot();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.final_result.as_deref(), Some("first report"));

    let generation = session.submit("second topic").await.unwrap();
    assert_eq!(generation, Generation(2));

    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    while let Ok(Some(_)) = tokio::time::timeout_at(deadline, session.next_update()).await {}

    let run = session.snapshot();
    assert_eq!(run.generation, Generation(2));
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.final_result, None);
    assert_eq!(run.stage("generate_query").unwrap().status, StageStatus::Active);
}
