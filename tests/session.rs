//! Session semantics over the in-process transport with a manual clock

use fabrickv::client::{Command, LoopbackTransport, Session};
use fabrickv::common::StoreLimits;
use fabrickv::memory::{AlignedBuffer, MemoryRegistry};
use fabrickv::server::{KeyStore, ManualClock};
use fabrickv::{Error, Status};
use std::sync::Arc;
use std::time::Duration;

fn session_with_clock() -> (Session, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(KeyStore::with_clock(StoreLimits::default(), clock.clone()));
    let session = Session::with_transport(
        Box::new(LoopbackTransport::new(store)),
        MemoryRegistry::default(),
    );
    (session, clock)
}

/// Store `value` under `key` through a freshly registered region
fn put(session: &mut Session, key: &str, value: &[u8], ttl: Option<u64>) -> Status {
    let mut region = session.reg_memory(value.to_vec()).unwrap();
    let status = session.set(key, &region.sgl().unwrap(), ttl).unwrap();
    session.dereg_memory(&mut region).unwrap();
    status
}

/// Fetch `key` into a destination of `len` bytes
fn fetch(session: &mut Session, key: &str, len: usize) -> (Status, Vec<u8>) {
    let mut region = session.reg_memory(vec![0u8; len]).unwrap();
    let sgl = region.sgl().unwrap();
    let (status, n) = session.get_value_len(key, &sgl, len).unwrap();
    session.dereg_memory(&mut region).unwrap();
    let bytes = region.into_inner().unwrap();
    (status, bytes[..n.min(len)].to_vec())
}

#[test]
fn test_round_trip_various_buffers() {
    let (mut session, _) = session_with_clock();

    for (i, size) in [1usize, 7, 64, 4096, 65536].into_iter().enumerate() {
        let payload: Vec<u8> = (0..size).map(|b| (b * 31 + i) as u8).collect();
        let key = format!("blob-{}", i);
        assert_eq!(put(&mut session, &key, &payload, None), Status::Ok);

        let dest = session.reg_memory(AlignedBuffer::new(size).unwrap()).unwrap();
        let sgl = dest.sgl().unwrap();
        assert_eq!(session.get(&key, &sgl, size).unwrap(), Status::Ok);
        assert_eq!(dest.to_vec(), payload);
    }
}

#[test]
fn test_numeric_buffer_round_trip() {
    let (mut session, _) = session_with_clock();
    let source = session.reg_memory(vec![1.5f32, -2.0, 3.25]).unwrap();
    let sgl = source.sgl().unwrap();
    assert_eq!(sgl.len(), 12);
    assert_eq!(session.set("tensor", &sgl, None).unwrap(), Status::Ok);

    let dest = session.reg_memory(vec![0f32; 3]).unwrap();
    let sgl = dest.sgl().unwrap();
    assert_eq!(session.get("tensor", &sgl, 12).unwrap(), Status::Ok);
    assert_eq!(dest.to_vec(), source.to_vec());
}

#[test]
fn test_absent_key_misses() {
    let (mut session, _) = session_with_clock();
    assert_eq!(fetch(&mut session, "never-set", 16).0, Status::NoSuchKey);
    assert!(!session.test("never-set").unwrap());
    assert_eq!(session.delete("never-set").unwrap(), Status::NoSuchKey);
    assert_eq!(session.expire("never-set", 5).unwrap(), Status::NoSuchKey);
}

#[test]
fn test_delete_then_miss() {
    let (mut session, clock) = session_with_clock();
    assert_eq!(put(&mut session, "k", b"v", Some(100)), Status::Ok);
    clock.advance(Duration::from_secs(1));
    assert_eq!(session.delete("k").unwrap(), Status::Ok);
    assert_eq!(fetch(&mut session, "k", 4).0, Status::NoSuchKey);
    assert!(!session.test("k").unwrap());
}

#[test]
fn test_ttl_elapse() {
    let (mut session, clock) = session_with_clock();
    assert_eq!(put(&mut session, "k", b"456", Some(5)), Status::Ok);

    clock.advance(Duration::from_secs(3));
    assert_eq!(fetch(&mut session, "k", 16), (Status::Ok, b"456".to_vec()));

    clock.advance(Duration::from_secs(5));
    assert_eq!(fetch(&mut session, "k", 16).0, Status::NoSuchKey);
    assert!(!session.test("k").unwrap());
    assert_eq!(session.nrkeys("*").unwrap(), 0);
}

#[test]
fn test_elapse_is_visible_at_the_boundary() {
    let (mut session, clock) = session_with_clock();
    put(&mut session, "k", b"1", Some(5));

    clock.advance(Duration::from_millis(4999));
    assert!(session.test("k").unwrap());
    clock.advance(Duration::from_millis(1));
    assert!(!session.test("k").unwrap());
    assert!(session.keys("*").unwrap().is_empty());
}

#[test]
fn test_expire_existing_key() {
    let (mut session, clock) = session_with_clock();
    assert_eq!(put(&mut session, "k", b"456", None), Status::Ok);
    assert_eq!(session.expire("k", 5).unwrap(), Status::Ok);

    clock.advance(Duration::from_secs(3));
    assert!(session.test("k").unwrap());
    clock.advance(Duration::from_secs(5));
    assert_eq!(fetch(&mut session, "k", 8).0, Status::NoSuchKey);
}

#[test]
fn test_expire_zero_and_set_clears_ttl() {
    let (mut session, clock) = session_with_clock();
    put(&mut session, "now", b"x", None);
    assert_eq!(session.expire("now", 0).unwrap(), Status::Ok);
    assert!(!session.test("now").unwrap());

    put(&mut session, "k", b"x", Some(2));
    put(&mut session, "k", b"y", None);
    clock.advance(Duration::from_secs(60));
    assert_eq!(fetch(&mut session, "k", 4), (Status::Ok, b"y".to_vec()));
}

#[test]
fn test_keys_and_nrkeys_agree() {
    let (mut session, clock) = session_with_clock();
    for key in ["user:1", "user:2", "user:10", "order:1"] {
        put(&mut session, key, b"v", None);
    }
    put(&mut session, "user:tmp", b"v", Some(1));

    for pattern in ["*", "user:*", "user:?", "order:*", "missing*", "user:1"] {
        let keys = session.keys(pattern).unwrap();
        assert_eq!(keys.len() as u64, session.nrkeys(pattern).unwrap(), "{}", pattern);
    }
    assert_eq!(session.nrkeys("user:*").unwrap(), 4);

    clock.advance(Duration::from_secs(2));
    let keys = session.keys("user:*").unwrap();
    assert_eq!(keys, vec!["user:1", "user:10", "user:2"]);
    assert_eq!(session.nrkeys("user:*").unwrap(), 3);
}

#[test]
fn test_scenario_literal() {
    let (mut session, clock) = session_with_clock();
    let tick = |secs| clock.advance(Duration::from_secs(secs));

    assert_eq!(fetch(&mut session, "123", 64).0, Status::NoSuchKey);
    assert_eq!(put(&mut session, "123", b"456", None), Status::Ok);
    assert_eq!(fetch(&mut session, "123", 64), (Status::Ok, b"456".to_vec()));
    assert_eq!(session.delete("123").unwrap(), Status::Ok);
    assert_eq!(fetch(&mut session, "123", 64).0, Status::NoSuchKey);

    assert_eq!(put(&mut session, "123", b"456", Some(5)), Status::Ok);
    tick(3);
    assert_eq!(fetch(&mut session, "123", 64), (Status::Ok, b"456".to_vec()));
    tick(5);
    assert_eq!(fetch(&mut session, "123", 64).0, Status::NoSuchKey);

    assert_eq!(put(&mut session, "123", b"456", None), Status::Ok);
    tick(7);
    assert_eq!(fetch(&mut session, "123", 64), (Status::Ok, b"456".to_vec()));
    assert_eq!(session.expire("123", 5).unwrap(), Status::Ok);
    tick(7);
    assert_eq!(fetch(&mut session, "123", 64).0, Status::NoSuchKey);
}

#[test]
fn test_scenario_through_command_language() {
    let (mut session, _) = session_with_clock();
    let run = |session: &mut Session, line: &str| {
        line.parse::<Command>()
            .unwrap()
            .execute(session, 4096)
            .unwrap()
            .render()
            .join("\n")
    };

    assert_eq!(run(&mut session, "get 123"), "status(262): No such key");
    assert_eq!(run(&mut session, "set 123 456"), "status(0): OK");
    assert_eq!(
        run(&mut session, "get 123"),
        "GET value[3]=456\nstatus(0): OK"
    );
    assert_eq!(session.registry().live_regions(), 0);
}

#[test]
fn test_deregistered_handle_is_rejected() {
    let (mut session, _) = session_with_clock();
    let mut region = session.reg_memory(b"456".to_vec()).unwrap();
    let stale = region.sgl().unwrap();
    session.dereg_memory(&mut region).unwrap();

    // a new region may reuse the slot; the stale SGL must still be refused
    let _fresh = session.reg_memory(vec![0u8; 3]).unwrap();
    assert!(matches!(
        session.set("k", &stale, None),
        Err(Error::InvalidRegion(_))
    ));
    assert!(matches!(
        session.dereg_memory(&mut region),
        Err(Error::InvalidRegion(_))
    ));
    assert!(!session.test("k").unwrap());
}

#[test]
fn test_value_limits() {
    let (mut session, _) = session_with_clock();
    let limits = StoreLimits::default();

    let long_key = "k".repeat(limits.max_key_length + 1);
    assert_eq!(put(&mut session, &long_key, b"v", None), Status::KeyTooBig);
    assert_eq!(put(&mut session, "", b"v", None), Status::KeyEmpty);

    let region = session.reg_memory(vec![1u8; 16]).unwrap();
    let empty = region.sgl_range(0, 0).unwrap();
    assert_eq!(session.set("k", &empty, None).unwrap(), Status::ValueEmpty);
}
