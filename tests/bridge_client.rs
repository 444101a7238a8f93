use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

use volley::bot::telemetry::LinkSample;
use volley::mesh::bridge::BridgeClient;
use volley::mesh::{EventFilter, EventKind, MeshClient, MeshError, MeshEvent};

const WAIT: Duration = Duration::from_secs(3);

/// Answer commands like a companion bridge would and return everything it received.
async fn fake_bridge(listener: TcpListener) -> Vec<Value> {
    let (socket, _) = listener.accept().await.expect("accept");
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut seen = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let cmd: Value = serde_json::from_str(&line).expect("json command");
        let id = cmd["id"].as_u64().expect("command id");
        let name = cmd["cmd"].as_str().expect("command name").to_string();
        seen.push(cmd);

        let reply = match name.as_str() {
            "appstart" => json!({"reply": id, "ok": true, "payload": {
                "name": "bridge-node", "public_key": "ff00", "adv_lat": 53.55, "adv_lon": 9.99
            }}),
            "get_contacts" => json!({"reply": id, "ok": true, "payload": [
                {"public_key": "a1b2c3d4", "adv_name": "alice", "adv_lat": 52.5, "adv_lon": 13.4}
            ]}),
            "send_msg" => json!({"reply": id, "ok": false, "error": "no route"}),
            _ => json!({"reply": id, "ok": true}),
        };
        let mut out = vec![reply];
        if name == "start_auto_fetch" {
            out.push(json!({"event": "rx_log", "snr": 7.5, "rssi": -92.0, "payload": "0001a1"}));
            out.push(json!({"event": "channel_msg", "channel_idx": 3, "text": "x: ping"}));
            out.push(json!({"event": "channel_msg", "channel_idx": 1, "text": "alice: ping", "path_len": 1}));
            out.push(json!({"event": "bogus_event"}));
        }
        for value in out {
            write_half
                .write_all(format!("{}\n", value).as_bytes())
                .await
                .expect("write");
        }
        if name == "stop_auto_fetch" {
            break;
        }
    }
    seen
}

#[tokio::test]
async fn commands_replies_and_events_flow_through_the_bridge() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let server = tokio::spawn(fake_bridge(listener));

    let mut client = BridgeClient::connect(&addr, WAIT).await.expect("connect");
    assert!(client.is_connected());
    let mut telemetry = client.subscribe(EventFilter::kinds(&[
        EventKind::LinkTelemetry,
        EventKind::LinkFrame,
    ]));
    let mut channel =
        client.subscribe(EventFilter::kinds(&[EventKind::ChannelMessage]).on_channel(1));

    let identity = client.device_identity().await.expect("identity");
    assert_eq!(identity.name, "bridge-node");
    assert!((identity.lat - 53.55).abs() < 1e-9);

    assert_eq!(client.fetch_contacts().await.expect("contacts"), 1);
    let alice = client.contact_by_key_prefix("A1B2").expect("alice cached");
    assert_eq!(alice.name, "alice");

    client.start_message_fetching().await.expect("start fetching");

    let sample = timeout(WAIT, telemetry.recv()).await.expect("sample in time");
    assert_eq!(
        sample,
        Some(MeshEvent::LinkTelemetry(LinkSample {
            snr: Some(7.5),
            rssi: Some(-92.0)
        }))
    );
    let frame = timeout(WAIT, telemetry.recv()).await.expect("frame in time");
    assert_eq!(
        frame,
        Some(MeshEvent::LinkFrame {
            payload: "0001a1".into()
        })
    );
    match timeout(WAIT, channel.recv()).await.expect("message in time") {
        Some(MeshEvent::ChannelMessage(msg)) => {
            assert_eq!(msg.channel, 1);
            assert_eq!(msg.text, "alice: ping");
            assert_eq!(msg.path_len, Some(1));
            assert_eq!(msg.snr, None);
        }
        other => panic!("unexpected {other:?}"),
    }

    client.send_channel_message(1, "pong").await.expect("send");
    match client.send_direct_message(&alice, "hi").await {
        Err(MeshError::Rejected(reason)) => assert_eq!(reason, "no route"),
        other => panic!("expected rejection, got {other:?}"),
    }
    client.stop_message_fetching().await.expect("stop fetching");

    // Channel 3 never reached the channel-1 subscription.
    assert!(channel.events.try_recv().is_err());

    client.disconnect().await.expect("disconnect");
    assert!(!client.is_connected());
    assert!(matches!(
        client.send_channel_message(1, "late").await,
        Err(MeshError::Disconnected)
    ));

    let seen = server.await.expect("server task");
    let names: Vec<&str> = seen
        .iter()
        .map(|c| c["cmd"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(
        names,
        vec![
            "appstart",
            "get_contacts",
            "start_auto_fetch",
            "send_chan_msg",
            "send_msg",
            "stop_auto_fetch"
        ]
    );
    assert_eq!(seen[3]["channel"], 1);
    assert_eq!(seen[3]["text"], "pong");
    assert_eq!(seen[4]["public_key"], "a1b2c3d4");
}

#[tokio::test]
async fn lost_link_is_reported_and_redialled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let server = tokio::spawn(async move {
        let (first, _) = listener.accept().await.expect("first accept");
        drop(first);
        let (second, _) = listener.accept().await.expect("second accept");
        second
    });

    let mut client = BridgeClient::connect(&addr, WAIT).await.expect("connect");
    let mut lifecycle = client.subscribe(EventFilter::kinds(&[
        EventKind::Connected,
        EventKind::Disconnected,
    ]));

    match timeout(WAIT, lifecycle.recv()).await.expect("loss in time") {
        Some(MeshEvent::Disconnected {
            max_attempts_exceeded,
            ..
        }) => assert!(!max_attempts_exceeded),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(!client.is_connected());
    assert!(matches!(
        client.fetch_contacts().await,
        Err(MeshError::Disconnected)
    ));

    let event = timeout(WAIT, lifecycle.recv()).await.expect("redial in time");
    assert_eq!(event, Some(MeshEvent::Connected { reconnected: true }));
    assert!(client.is_connected());

    let _second = server.await.expect("server task");
    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn silent_bridge_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        sleep(Duration::from_millis(500)).await;
        drop(socket);
    });

    let mut client = BridgeClient::connect(&addr, Duration::from_millis(100))
        .await
        .expect("connect");
    match client.device_identity().await {
        Err(MeshError::Timeout(after)) => assert_eq!(after, Duration::from_millis(100)),
        other => panic!("expected timeout, got {other:?}"),
    }
    client.disconnect().await.expect("disconnect");
    server.await.expect("server task");
}

#[tokio::test]
async fn bad_addresses_fail_to_connect() {
    assert!(matches!(
        BridgeClient::connect("no-port-here", WAIT).await,
        Err(MeshError::InvalidAddress(_))
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    assert!(matches!(
        BridgeClient::connect(&addr, WAIT).await,
        Err(MeshError::Io(_))
    ));
}
