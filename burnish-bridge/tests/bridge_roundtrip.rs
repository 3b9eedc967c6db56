//! End-to-end round trip between two endpoints over a serialized wire.
//!
//! Drives the full control flow: a client-side call is framed, enveloped,
//! serialized, carried to the server side, answered by a local handler, and
//! the response travels back to settle the original call by correlation id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;

use burnish_bridge::{Bridge, BridgeError, BridgeEvent, EventOptions, Handler};
use burnish_ipc::{Direction, EndpointKind, Frame, MessageEnvelope, ResponseOutcome};

struct RecordingBridge {
    endpoint: EndpointKind,
    alive: AtomicBool,
    next_id: AtomicU64,
    outbound: Mutex<Vec<Frame>>,
    listeners: Mutex<HashSet<String>>,
    announcements: AtomicUsize,
}

impl RecordingBridge {
    fn new(endpoint: EndpointKind) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            alive: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            outbound: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashSet::new()),
            announcements: AtomicUsize::new(0),
        })
    }

    fn add_listener(&self, event: &str) {
        self.listeners.lock().unwrap().insert(event.to_string());
    }

    fn take_outbound(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.outbound.lock().unwrap())
    }
}

impl Bridge for RecordingBridge {
    fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn endpoint(&self) -> EndpointKind {
        self.endpoint
    }

    fn assert_alive(&self) -> Result<(), BridgeError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::BridgeEnded("transport closed".into()))
        }
    }

    fn send_frame(&self, frame: Frame) -> Result<(), BridgeError> {
        self.outbound.lock().unwrap().push(frame);
        Ok(())
    }

    fn send_subscriptions(&self) -> Result<(), BridgeError> {
        self.announcements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_listener(&self, event: &str) -> bool {
        self.listeners.lock().unwrap().contains(event)
    }
}

/// Carry a frame across the "wire": envelope, serialize, parse back.
fn over_the_wire(frame: Frame) -> Frame {
    let envelope = MessageEnvelope::new(frame);
    let bytes = serde_json::to_string(&envelope).unwrap();
    let received: MessageEnvelope<Frame> = serde_json::from_str(&bytes).unwrap();
    assert!(received.is_compatible());
    received.message
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FormatRequest {
    path: String,
    tab_width: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FormatReply {
    formatted: bool,
    output: String,
}

#[tokio::test]
async fn test_call_round_trips_between_endpoints() {
    // The CLI client calls `format_file` on the daemon: the client side
    // declares its counterpart as the server and vice versa.
    let client_bridge = RecordingBridge::new(EndpointKind::Server);
    let server_bridge = RecordingBridge::new(EndpointKind::Client);

    let client_event: BridgeEvent<FormatRequest, FormatReply> = BridgeEvent::new(
        "format_file",
        Direction::ClientToServer,
        EventOptions::default(),
        client_bridge.clone(),
    );
    let server_event: BridgeEvent<FormatRequest, FormatReply> = BridgeEvent::new(
        "format_file",
        Direction::ClientToServer,
        EventOptions::default(),
        server_bridge.clone(),
    );

    server_event
        .subscribe(
            Handler::sync(|req: FormatRequest| {
                Ok(FormatReply {
                    formatted: true,
                    output: format!("{}@{}", req.path, req.tab_width),
                })
            }),
            false,
        )
        .unwrap();
    assert_eq!(server_bridge.announcements.load(Ordering::SeqCst), 1);

    let request = FormatRequest {
        path: "src/main.rs".into(),
        tab_width: 4,
    };

    let call = client_event.call(request.clone());
    let pump = async {
        let mut frames = client_bridge.take_outbound();
        assert_eq!(frames.len(), 1);
        let (id, event, param) = match over_the_wire(frames.remove(0)) {
            Frame::Request {
                id: Some(id),
                event,
                param,
                ..
            } => (id, event, param),
            other => panic!("expected correlated request, got {:?}", other),
        };
        assert_eq!(event, "format_file");

        // Daemon side answers locally and frames the value back.
        let response = match server_event.dispatch_request(param).await {
            Ok(value) => Frame::success(id, event, value),
            Err(err) => Frame::error(id, event, json!({"message": err.to_string()}), json!(null)),
        };
        match over_the_wire(response) {
            Frame::Response { id, outcome, .. } => {
                client_event.dispatch_response(id, outcome).unwrap();
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    };

    let (result, ()) = futures::join!(call, pump);
    assert_eq!(
        result.unwrap(),
        FormatReply {
            formatted: true,
            output: "src/main.rs@4".into(),
        }
    );
}

#[tokio::test]
async fn test_remote_handler_failure_travels_back_as_error() {
    let client_bridge = RecordingBridge::new(EndpointKind::Server);
    let server_bridge = RecordingBridge::new(EndpointKind::Client);

    let client_event: BridgeEvent<FormatRequest, FormatReply> = BridgeEvent::new(
        "format_file",
        Direction::ClientToServer,
        EventOptions::default(),
        client_bridge.clone(),
    );
    let server_event: BridgeEvent<FormatRequest, FormatReply> = BridgeEvent::new(
        "format_file",
        Direction::ClientToServer,
        EventOptions::default(),
        server_bridge.clone(),
    );

    server_event
        .subscribe(
            Handler::sync(|_: FormatRequest| {
                Err(BridgeError::Handler("unsupported syntax".into()))
            }),
            false,
        )
        .unwrap();

    let call = client_event.call(FormatRequest {
        path: "src/broken.rs".into(),
        tab_width: 2,
    });
    let pump = async {
        let mut frames = client_bridge.take_outbound();
        let (id, event, param) = match over_the_wire(frames.remove(0)) {
            Frame::Request {
                id: Some(id),
                event,
                param,
                ..
            } => (id, event, param),
            other => panic!("expected correlated request, got {:?}", other),
        };
        let err = server_event.dispatch_request(param).await.unwrap_err();
        let response = Frame::error(
            id,
            event,
            json!({"message": err.to_string()}),
            json!({"kind": "handler"}),
        );
        match over_the_wire(response) {
            Frame::Response { id, outcome, .. } => {
                client_event.dispatch_response(id, outcome).unwrap();
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    };

    let (result, ()) = futures::join!(call, pump);
    match result.unwrap_err() {
        BridgeError::Remote { message, data } => {
            assert!(message.contains("unsupported syntax"));
            assert_eq!(data["kind"], "handler");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fire_and_forget_send_reaches_subscribed_peer() {
    let server_bridge = RecordingBridge::new(EndpointKind::Client);
    let client_bridge = RecordingBridge::new(EndpointKind::Server);

    // Daemon pushes log lines to any attached client that asked for them.
    let server_event: BridgeEvent<String, ()> = BridgeEvent::new(
        "log_line",
        Direction::ServerToClient,
        EventOptions::default(),
        server_bridge.clone(),
    );
    let client_event: BridgeEvent<String, ()> = BridgeEvent::new(
        "log_line",
        Direction::ServerToClient,
        EventOptions::default(),
        client_bridge.clone(),
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client_event
        .subscribe(
            Handler::sync(move |line: String| {
                sink.lock().unwrap().push(line);
                Ok(())
            }),
            false,
        )
        .unwrap();

    // Nobody announced a listener yet: the send is a no-op.
    server_event.send("dropped".into()).unwrap();
    assert!(server_bridge.take_outbound().is_empty());

    // After the announcement reaches the server side, frames flow.
    server_bridge.add_listener("log_line");
    server_event.send("compiling 3 targets".into()).unwrap();
    let mut frames = server_bridge.take_outbound();
    assert_eq!(frames.len(), 1);
    match over_the_wire(frames.remove(0)) {
        Frame::Request {
            id: None, param, ..
        } => {
            // Inbound fire-and-forget frames are answered locally too; the
            // bridge just discards the value.
            client_event.dispatch_request(param).await.unwrap();
        }
        other => panic!("expected fire-and-forget request, got {:?}", other),
    }
    assert_eq!(*received.lock().unwrap(), vec!["compiling 3 targets"]);
}

#[tokio::test]
async fn test_end_drains_every_pending_call() {
    let client_bridge = RecordingBridge::new(EndpointKind::Server);
    let client_event: Arc<BridgeEvent<FormatRequest, FormatReply>> = Arc::new(BridgeEvent::new(
        "format_file",
        Direction::ClientToServer,
        EventOptions::default(),
        client_bridge.clone(),
    ));

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let event = Arc::clone(&client_event);
            tokio::spawn(async move {
                event
                    .call(FormatRequest {
                        path: format!("src/file{}.rs", i),
                        tab_width: 4,
                    })
                    .await
            })
        })
        .collect();
    while client_bridge.outbound.lock().unwrap().len() < 3 {
        tokio::task::yield_now().await;
    }

    client_event.end(BridgeError::BridgeEnded("daemon exited".into()));

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::BridgeEnded(_)));
    }

    // No entry left to settle afterwards.
    let frames = client_bridge.take_outbound();
    let id = match &frames[0] {
        Frame::Request { id: Some(id), .. } => *id,
        other => panic!("expected correlated request, got {:?}", other),
    };
    let err = client_event
        .dispatch_response(
            id,
            ResponseOutcome::Success {
                value: json!({"formatted": true, "output": ""}),
            },
        )
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownCorrelation { .. }));
}
