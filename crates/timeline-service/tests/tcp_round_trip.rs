use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use timeline_service::{
    ClipAddress, ClipKind, Location, ServiceClient, ServiceError, TcpTransport,
};

/// Serves one scripted reply per received line and returns the requests seen.
fn spawn_host(replies: Vec<Value>) -> (String, thread::JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let address = listener
        .local_addr()
        .expect("listener must have an address")
        .to_string();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept client");
        let mut writer = stream.try_clone().expect("clone host socket");
        let mut reader = BufReader::new(stream);
        let mut seen = Vec::new();

        for reply in replies {
            let mut line = String::new();
            if reader.read_line(&mut line).expect("read request") == 0 {
                break;
            }
            seen.push(serde_json::from_str(&line).expect("request must be json"));
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .expect("write reply");
        }
        seen
    });

    (address, handle)
}

#[test]
fn create_then_duplicate_over_tcp_normalizes_both_reply_shapes() {
    let (address, host) = spawn_host(vec![
        json!({"status": "success", "result": "m1"}),
        json!({"status": "success", "result": ["m2", 8.0]}),
    ]);
    let transport =
        TcpTransport::connect(&address, Some(Duration::from_secs(5))).expect("connect to host");
    let client = ServiceClient::new(transport);

    let created = client
        .create_clip(
            4,
            Location::Arrangement { start_time: 0.0 },
            Some(4.0),
            ClipKind::Midi,
            None,
        )
        .expect("create should succeed");
    let duplicated = client
        .duplicate_clip(
            &ClipAddress::arrangement(4, created.clip_id.clone()),
            Location::Arrangement { start_time: 8.0 },
        )
        .expect("duplicate should succeed");

    assert_eq!(created.start_time, Some(0.0));
    assert_eq!(duplicated.clip_id, "m2");
    assert_eq!(duplicated.start_time, Some(8.0));

    let seen = host.join().expect("host thread should finish");
    assert_eq!(seen[0]["type"], "create_clip");
    assert_eq!(seen[0]["params"]["length"], json!(4.0));
    assert_eq!(seen[0]["params"]["kind"], "midi");
    assert_eq!(seen[1]["type"], "duplicate_clip");
    assert_eq!(seen[1]["params"]["clip"]["clip_id"], "m1");
}

#[test]
fn stale_reference_reply_surfaces_as_stale_reference_error() {
    let (address, host) = spawn_host(vec![json!({
        "status": "error",
        "message": "clip index 3 out of range",
        "code": "stale_reference"
    })]);
    let transport =
        TcpTransport::connect(&address, Some(Duration::from_secs(5))).expect("connect to host");
    let client = ServiceClient::new(transport);

    let result = client.get_clip_property(&ClipAddress::arrangement(0, "3"), "start_time");

    assert!(matches!(
        result,
        Err(ServiceError::StaleReference {
            command: "get_clip_property",
            ..
        })
    ));
    host.join().expect("host thread should finish");
}

#[test]
fn closed_connection_is_reported_as_transport_failure() {
    let (address, host) = spawn_host(Vec::new());
    let transport =
        TcpTransport::connect(&address, Some(Duration::from_secs(5))).expect("connect to host");
    let client = ServiceClient::new(transport);
    host.join().expect("host thread should finish");

    let error = client
        .track_clips(0)
        .expect_err("query against a closed host must fail");

    assert!(error.is_transport_failure());
}
