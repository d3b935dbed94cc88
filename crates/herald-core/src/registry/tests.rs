use super::*;
use crate::session::{Identity, SessionState};
use crate::sink::{self, ChannelSink};
use serde_json::json;
use tokio::sync::mpsc;

fn make_session(events: &[&str]) -> (Arc<Session>, mpsc::Receiver<Frame>) {
    let (sink, rx) = sink::channel(4);
    let session = Session::new(
        Identity::new("1", "cunha"),
        events.iter().map(|e| e.to_string()),
        Arc::new(sink),
    );
    (Arc::new(session), rx)
}

#[test]
fn test_register_unregister_round_trip() {
    let registry = SessionRegistry::new();
    let (session, _rx) = make_session(&["newRent"]);
    let id = session.id();

    registry.register(session.clone()).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(session.state(), SessionState::Registered);
    assert!(registry.get(id).is_some());

    let removed = registry.unregister(id).unwrap();
    assert_eq!(removed.id(), id);
    assert!(registry.is_empty());
    assert_eq!(session.state(), SessionState::Closed);

    // Second unregister is a no-op
    assert!(registry.unregister(id).is_none());
}

#[test]
fn test_duplicate_id_rejected() {
    let registry = SessionRegistry::new();
    let id = SessionId::new();
    let first = Arc::new(Session::with_id(
        id,
        Identity::new("1", "cunha"),
        Vec::new(),
        Arc::new(sink::channel(1).0),
    ));
    let second = Arc::new(Session::with_id(
        id,
        Identity::new("2", "daniel"),
        Vec::new(),
        Arc::new(sink::channel(1).0),
    ));

    registry.register(first).unwrap();
    let err = registry.register(second.clone()).unwrap_err();
    assert!(matches!(err, Error::DuplicateSession { id: dup } if dup == id));
    assert_eq!(registry.len(), 1);
    assert_eq!(second.state(), SessionState::Connecting);
}

#[test]
fn test_push_to_session() {
    let registry = SessionRegistry::new();
    let (session, mut rx) = make_session(&[]);
    let id = session.id();
    registry.register(session).unwrap();

    registry
        .push_to_session(id, Frame::new("direct", json!({"n": 1})))
        .unwrap();
    assert_eq!(rx.try_recv().unwrap().event, "direct");

    let missing = SessionId::new();
    assert_eq!(
        registry.push_to_session(missing, Frame::shutdown()),
        Err(DeliveryError::NotFound(missing))
    );
}

#[test]
fn test_failed_push_keeps_session_registered() {
    let registry = SessionRegistry::new();
    let (session, rx) = make_session(&[]);
    let id = session.id();
    registry.register(session).unwrap();
    drop(rx);

    assert_eq!(
        registry.push_to_session(id, Frame::shutdown()),
        Err(DeliveryError::Closed)
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_snapshot_is_stable_while_registry_changes() {
    let registry = SessionRegistry::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (session, rx) = make_session(&["newBloq"]);
        registry.register(session).unwrap();
        receivers.push(rx);
    }

    let snapshot = registry.active_sessions();
    for session in &snapshot {
        registry.unregister(session.id());
    }
    assert_eq!(snapshot.len(), 3);
    assert!(registry.is_empty());
}

#[test]
fn test_counts_by_event() {
    let registry = SessionRegistry::new();
    let (a, _ra) = make_session(&["newBloq", "newRent"]);
    let (b, _rb) = make_session(&["newBloq"]);
    let (c, _rc) = make_session(&[]);
    for session in [a, b, c] {
        registry.register(session).unwrap();
    }

    let counts = registry.counts_by_event();
    assert_eq!(counts.get("newBloq"), Some(&2));
    assert_eq!(counts.get("newRent"), Some(&1));
    assert_eq!(counts.len(), 2);
}

#[test]
fn test_closed_session_cannot_register() {
    let registry = SessionRegistry::new();
    let session = Arc::new(Session::new(
        Identity::new("1", "cunha"),
        Vec::new(),
        Arc::new(ChannelSink::new(mpsc::channel(1).0)),
    ));
    session.close();
    assert!(registry.register(session).is_err());
    assert!(registry.is_empty());
}

#[test]
fn test_drain_closes_everything() {
    let registry = SessionRegistry::new();
    let (a, _ra) = make_session(&[]);
    let (b, _rb) = make_session(&[]);
    registry.register(a.clone()).unwrap();
    registry.register(b.clone()).unwrap();

    let drained = registry.drain();
    assert_eq!(drained.len(), 2);
    assert!(registry.is_empty());
    assert_eq!(a.state(), SessionState::Closed);
    assert_eq!(b.state(), SessionState::Closed);
}
