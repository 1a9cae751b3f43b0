use bytes::Bytes;

use rudis::connection::{Connection, FakeConnection};
use rudis::engine::Engine;
use rudis::reply::Reply;

fn cmd(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|s| Bytes::from(s.to_string())).collect()
}

fn setup() -> (Engine, FakeConnection) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    (Engine::new(4), FakeConnection::new())
}

#[tokio::test(start_paused = true)]
async fn a_transaction_commits_atomically() {
    let (engine, conn) = setup();

    assert_eq!(engine.exec(&conn, &cmd(&["multi"])), Reply::Ok);
    assert_eq!(engine.exec(&conn, &cmd(&["set", "a", "1"])), Reply::Queued);
    assert_eq!(engine.exec(&conn, &cmd(&["incr", "b"])), Reply::Queued);

    // Nothing is visible until EXEC.
    let other = FakeConnection::new();
    assert_eq!(engine.exec(&other, &cmd(&["get", "a"])), Reply::Null);

    let reply = engine.exec(&conn, &cmd(&["exec"]));
    assert_eq!(reply, Reply::MultiRaw(vec![Reply::Ok, Reply::Integer(1)]));
    assert_eq!(reply.to_bytes(), b"*2\r\n+OK\r\n:1\r\n");

    assert_eq!(engine.exec(&conn, &cmd(&["get", "a"])), Reply::bulk("1"));
    assert_eq!(engine.exec(&conn, &cmd(&["get", "b"])), Reply::bulk("1"));
    assert!(!conn.in_multi_state());
}

#[tokio::test(start_paused = true)]
async fn a_third_party_write_to_a_watched_key_aborts_the_batch() {
    let (engine, conn) = setup();
    let third_party = FakeConnection::new();

    engine.exec(&conn, &cmd(&["set", "k", "original"]));
    assert_eq!(engine.exec(&conn, &cmd(&["watch", "k"])), Reply::Ok);

    engine.exec(&third_party, &cmd(&["set", "k", "intruded"]));

    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "k", "mine"]));
    engine.exec(&conn, &cmd(&["set", "side", "effect"]));

    assert_eq!(engine.exec(&conn, &cmd(&["exec"])), Reply::Null);

    // Zero effects from the aborted batch.
    assert_eq!(engine.exec(&conn, &cmd(&["get", "k"])), Reply::bulk("intruded"));
    assert_eq!(engine.exec(&conn, &cmd(&["get", "side"])), Reply::Null);
}

#[tokio::test(start_paused = true)]
async fn an_untouched_watch_lets_the_batch_commit() {
    let (engine, conn) = setup();

    engine.exec(&conn, &cmd(&["set", "k", "v"]));
    engine.exec(&conn, &cmd(&["watch", "k"]));
    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "k", "committed"]));

    assert!(!engine.exec(&conn, &cmd(&["exec"])).is_error());
    assert_eq!(engine.exec(&conn, &cmd(&["get", "k"])), Reply::bulk("committed"));
}

#[tokio::test(start_paused = true)]
async fn unwatch_forgets_the_snapshots() {
    let (engine, conn) = setup();
    let third_party = FakeConnection::new();

    engine.exec(&conn, &cmd(&["watch", "k"]));
    assert_eq!(engine.exec(&conn, &cmd(&["unwatch"])), Reply::Ok);

    engine.exec(&third_party, &cmd(&["set", "k", "changed"]));

    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "k", "mine"]));
    assert!(!engine.exec(&conn, &cmd(&["exec"])).is_error());
    assert_eq!(engine.exec(&conn, &cmd(&["get", "k"])), Reply::bulk("mine"));
}

#[tokio::test(start_paused = true)]
async fn a_mid_batch_failure_rolls_every_effect_back() {
    let (engine, conn) = setup();

    engine.exec(&conn, &cmd(&["set", "a", "keep"]));
    engine.exec(&conn, &cmd(&["expire", "a", "100"]));
    engine.exec(&conn, &cmd(&["set", "s", "not-a-number"]));

    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "a", "changed"]));
    engine.exec(&conn, &cmd(&["set", "fresh", "x"]));
    engine.exec(&conn, &cmd(&["incr", "s"]));

    let reply = engine.exec(&conn, &cmd(&["exec"]));
    assert!(reply.is_error());
    let encoded = reply.to_bytes();
    assert!(String::from_utf8_lossy(&encoded).starts_with("-EXECABORT"));

    // Every touched key reads exactly as it did before the batch.
    assert_eq!(engine.exec(&conn, &cmd(&["get", "a"])), Reply::bulk("keep"));
    assert_eq!(engine.exec(&conn, &cmd(&["get", "fresh"])), Reply::Null);
    assert_eq!(
        engine.exec(&conn, &cmd(&["get", "s"])),
        Reply::bulk("not-a-number")
    );

    // Including its TTL.
    match engine.exec(&conn, &cmd(&["ttl", "a"])) {
        Reply::Integer(remaining) => assert!(remaining > 0 && remaining <= 100),
        reply => panic!("unexpected ttl reply: {:?}", reply),
    }
}

#[tokio::test(start_paused = true)]
async fn a_poisoned_queue_aborts_without_running_anything() {
    let (engine, conn) = setup();

    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "k", "v"]));
    assert!(engine.exec(&conn, &cmd(&["nosuchcmd"])).is_error());
    assert!(engine.exec(&conn, &cmd(&["get"])).is_error());

    let reply = engine.exec(&conn, &cmd(&["exec"]));
    assert!(reply.is_error());
    assert_eq!(engine.exec(&conn, &cmd(&["get", "k"])), Reply::Null);
}

#[tokio::test(start_paused = true)]
async fn exec_multi_can_be_driven_directly() {
    let (engine, conn) = setup();

    let batch = vec![cmd(&["set", "x", "1"]), cmd(&["incr", "x"])];
    let reply = engine.exec_multi(&conn, &std::collections::HashMap::new(), &batch);
    assert_eq!(reply, Reply::MultiRaw(vec![Reply::Ok, Reply::Integer(2)]));

    let stale = std::collections::HashMap::from([("x".to_string(), 0u32)]);
    let reply = engine.exec_multi(&conn, &stale, &[cmd(&["set", "x", "9"])]);
    assert_eq!(reply, Reply::Null);
    assert_eq!(engine.exec(&conn, &cmd(&["get", "x"])), Reply::bulk("2"));
}

#[tokio::test(start_paused = true)]
async fn transactions_are_scoped_to_the_selected_database() {
    let (engine, conn) = setup();

    engine.exec(&conn, &cmd(&["select", "2"]));
    engine.exec(&conn, &cmd(&["multi"]));
    engine.exec(&conn, &cmd(&["set", "k", "db2"]));
    engine.exec(&conn, &cmd(&["exec"]));

    assert_eq!(engine.get_db_size(2), (1, 0));
    assert_eq!(engine.get_db_size(0), (0, 0));
}
