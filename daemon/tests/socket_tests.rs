//! The line protocol end to end: a client on one side of a socket pair and
//! `handle_client` serving the daemon service on the other.

use cancerdetect_daemon::{config::Config, db::Database, notifier::Notifier, service::Service, socket::handle_client};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no line from daemon")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }
}

fn connect() -> Client {
    let mut config = Config::default();
    config.general.notifications = false;
    config.general.seed = Some(4);
    config.analysis.tick_interval_ms = 5;
    let db = Database::open_in_memory().unwrap();
    db.init_schema().unwrap();
    let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
    let (service, _events) = Service::start(config, db, Notifier::new(false), broadcast_tx);

    let (client, server) = UnixStream::pair().unwrap();
    tokio::spawn(handle_client(server, broadcast_rx, service));
    let (reader, writer) = client.into_split();
    Client { lines: BufReader::new(reader).lines(), writer }
}

#[tokio::test]
async fn test_ping_and_malformed_lines() {
    let mut client = connect();

    // blank line first: it must not produce a reply
    client.send("\n{\"cmd\":\"ping\"\n{\"cmd\":\"ping\"}\n").await;

    let error = client.next().await;
    assert_eq!(error["type"], "response");
    assert!(error["data"]["error"].as_str().unwrap().starts_with("invalid request"));

    let pong = client.next().await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn test_unknown_command_gets_error_reply() {
    let mut client = connect();
    client.send("{\"cmd\":\"reboot\"}\n").await;
    let reply = client.next().await;
    assert!(reply["data"]["error"].is_string());

    // the connection stays usable
    client.send("{\"cmd\":\"get_stats\"}\n").await;
    let stats = client.next().await;
    assert_eq!(stats["data"]["images_analyzed"], 0);
}

#[tokio::test]
async fn test_run_events_interleave_with_replies() {
    let mut client = connect();
    client
        .send("{\"cmd\":\"analyze\",\"params\":{\"files\":[{\"name\":\"a.png\"},{\"name\":\"b.png\"}]}}\n")
        .await;

    let mut seen = Vec::new();
    let mut percents = Vec::new();
    loop {
        let message = client.next().await;
        let kind = message["type"].as_str().unwrap().to_string();
        match kind.as_str() {
            "response" => assert!(message["data"]["run_id"].is_u64()),
            "progress" => percents.push(message["data"]["percent"].as_f64().unwrap()),
            _ => {}
        }
        seen.push(kind.clone());
        if kind == "completed" {
            assert_eq!(message["data"]["outcome"]["results"].as_array().unwrap().len(), 2);
            break;
        }
    }

    assert!(seen.iter().any(|k| k == "response"));
    assert!(seen.iter().any(|k| k == "status"));
    assert_eq!(percents, vec![50.0, 100.0]);

    // the guard is released after the terminal event
    let status = client.next().await;
    assert_eq!(status["type"], "status");
    assert!(status["data"]["running"].is_null());

    client.send("{\"cmd\":\"get_results\"}\n").await;
    let results = client.next().await;
    assert_eq!(results["data"][1]["filename"], "b.png");
}
