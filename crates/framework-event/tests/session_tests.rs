//! Sessions over the local bus and over a real broker connection.

use crossbeam_channel::unbounded;
use framework_event::{Broker, ConnectionState, Event, EventError, LocalBus, RemoteTransport, Session, Transport};
use serde_json::json;
use std::time::{Duration, Instant};

fn ask_until_answered(asker: &Session, topic: &str, within: Duration) -> Option<serde_json::Value> {
    let (tx, rx) = unbounded();
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        let tx = tx.clone();
        let id = asker
            .hub()
            .publish_with_reply(Event::new(topic, json!({"question": 42})), move |reply| {
                let _ = tx.send(reply.data.clone());
            })
            .unwrap();
        let answer = rx.recv_timeout(Duration::from_millis(200)).ok();
        asker.hub().forget_reply(&id);
        if answer.is_some() {
            return answer;
        }
    }
    None
}

#[test]
fn test_local_sessions_answer_each_other() {
    let bus = LocalBus::new();
    let responder = Session::local(&bus).unwrap();
    let asker = Session::local(&bus).unwrap();
    responder
        .hub()
        .subscribe("topic=test.question", |event| Some(json!({"answer": event.data["question"]})))
        .unwrap();

    let answer = ask_until_answered(&asker, "test.question", Duration::from_secs(5));
    assert_eq!(answer, Some(json!({"answer": 42})));
}

#[test]
fn test_closed_session_stops_publishing() {
    let bus = LocalBus::new();
    let session = Session::local(&bus).unwrap();
    assert!(session.is_open());
    session.close();
    session.close();
    assert!(!session.is_open());
    assert!(matches!(
        session.hub().publish(Event::new("t", json!({}))),
        Err(EventError::NotConnected(_))
    ));
    assert_eq!(bus.member_count(), 0);
}

#[test]
fn test_broker_relays_between_remote_sessions() {
    let broker = Broker::spawn("127.0.0.1:0").unwrap();
    let address = broker.address().to_string();

    let responder = Session::remote(&address, Duration::from_secs(2)).unwrap();
    responder
        .hub()
        .subscribe("test.remote", |_| Some(json!("pong")))
        .unwrap();
    let asker = Session::remote(&address, Duration::from_secs(2)).unwrap();

    let answer = ask_until_answered(&asker, "test.remote", Duration::from_secs(5));
    assert_eq!(answer, Some(json!("pong")));
}

#[test]
fn test_remote_connect_failure_is_reported() {
    // bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let result = Session::remote(&format!("127.0.0.1:{}", port), Duration::from_millis(200));
    assert!(result.is_err());
}

#[test]
fn test_session_closes_when_broker_goes_away() {
    let mut broker = Broker::spawn("127.0.0.1:0").unwrap();
    let session = Session::remote(&broker.address().to_string(), Duration::from_secs(2)).unwrap();
    assert!(session.is_open());

    broker.stop();
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.is_open() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!session.is_open());
    assert_eq!(session.hub().state(), ConnectionState::Disconnected);
    assert!(matches!(
        session.hub().publish(Event::new("t", json!({}))),
        Err(EventError::NotConnected(_))
    ));
    session.close();
}

#[test]
fn test_remote_reconnect_replaces_previous_connection() {
    let broker = Broker::spawn("127.0.0.1:0").unwrap();
    let transport = RemoteTransport::new(broker.address().to_string(), Duration::from_secs(2));
    transport.connect().unwrap();
    transport.connect().unwrap();

    transport.send(&Event::new("echo", json!({"n": 1}))).unwrap();
    let echoed = transport.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(echoed.topic, "echo");
    assert!(transport.recv_timeout(Duration::from_millis(300)).unwrap().is_none());
    transport.disconnect();
}
