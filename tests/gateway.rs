//! Driving the stdio gateway the way a UI process would
#![cfg(unix)]

use std::sync::Arc;

use craftline::core::launch::PROFILE_FILE;
use craftline::core::{AppState, ErrorKind, Settings};
use craftline::gateway::protocol::Outcome;
use craftline::gateway::{serve, CommandGateway, Response};
use craftline::persistence::Database;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

struct Client {
    writer: tokio::io::DuplexStream,
    reader: tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
    next_id: u64,
}

impl Client {
    async fn call(&mut self, command: &str, args: serde_json::Value) -> Response {
        self.next_id += 1;
        let mut line = serde_json::to_vec(&json!({
            "id": self.next_id,
            "command": command,
            "args": args,
        }))
        .unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();

        let reply = self.reader.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.id, Some(self.next_id));
        response
    }
}

fn error_kind(response: &Response) -> ErrorKind {
    match &response.outcome {
        Outcome::Error(e) => e.kind,
        Outcome::Ok(v) => panic!("expected an error, got {}", v),
    }
}

#[tokio::test]
async fn full_session_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("craftline.db")).unwrap();
    db.initialize().unwrap();
    let settings = Settings {
        data_directory: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let state = Arc::new(AppState::with_settings(Arc::new(db), settings).await.unwrap());
    let gateway = Arc::new(CommandGateway::new(Arc::clone(&state)));

    let (client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (client_out, server_out) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve(
        gateway,
        server_in,
        server_out,
        CancellationToken::new(),
    ));

    let mut client = Client {
        writer: client_in,
        reader: BufReader::new(client_out).lines(),
        next_id: 0,
    };

    let created = client
        .call(
            "create_installation",
            json!({"name": "Survival", "version": "1.21.5"}),
        )
        .await;
    match &created.outcome {
        Outcome::Ok(instance) => assert_eq!(instance["versionType"], "Release"),
        Outcome::Error(e) => panic!("create failed: {}", e.message),
    }

    let dup = client
        .call(
            "create_installation",
            json!({"name": "Survival", "version": "1.8.9"}),
        )
        .await;
    assert_eq!(error_kind(&dup), ErrorKind::DuplicateName);

    std::fs::write(
        state
            .settings
            .get_instances_directory()
            .join("Survival")
            .join(PROFILE_FILE),
        r#"{"program": "/bin/sh", "jvmArgs": ["-c", "echo up; exec sleep 30"], "readyPattern": "up"}"#,
    )
    .unwrap();

    let launched = client.call("launch", json!({"name": "Survival"})).await;
    assert_eq!(launched.outcome, Outcome::Ok(json!(null)));

    let status = client
        .call("get_launch_status", json!({"name": "Survival"}))
        .await;
    match &status.outcome {
        Outcome::Ok(info) => assert_eq!(info["status"]["state"], "Running"),
        Outcome::Error(e) => panic!("status failed: {}", e.message),
    }

    let busy = client
        .call("remove_installation", json!({"name": "Survival"}))
        .await;
    assert_eq!(error_kind(&busy), ErrorKind::InUse);

    let stopped = client
        .call("terminate_instance", json!({"name": "Survival"}))
        .await;
    assert_eq!(stopped.outcome, Outcome::Ok(json!(null)));

    let removed = client
        .call("remove_installation", json!({"name": "Survival"}))
        .await;
    assert_eq!(removed.outcome, Outcome::Ok(json!(null)));

    let missing = client.call("launch", json!({})).await;
    assert_eq!(error_kind(&missing), ErrorKind::InvalidRequest);

    drop(client);
    server.await.unwrap().unwrap();
}
