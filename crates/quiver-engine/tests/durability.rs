//! Recovery from the WAL and from checkpoints.

use std::fs::OpenOptions;
use std::io::Write;
use std::time::{Duration, Instant};

use quiver_common::types::{NodeId, PropertyKey, Value};
use quiver_engine::{Config, QuiverDB, SyncMode};

fn config(dir: &std::path::Path) -> Config {
    Config::persistent(dir)
        .with_sync_mode(SyncMode::Full)
        .with_checkpoint_interval_ms(0)
}

fn property(db: &QuiverDB, id: NodeId, key: &str) -> Value {
    db.session().node(id).unwrap().properties[&PropertyKey::new(key)].clone()
}

fn newest_segment(dir: &std::path::Path) -> std::path::PathBuf {
    let mut segments: Vec<_> = std::fs::read_dir(dir.join("wal"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    segments.sort();
    segments.pop().unwrap()
}

#[test]
fn committed_writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, knows) = {
        let db = QuiverDB::with_config(config(dir.path())).unwrap();
        let mut session = db.session();
        let alice = session
            .create_node(&["Person"], [("name", Value::from("Alice"))])
            .unwrap();
        let bob = session
            .create_node(&["Person"], [("name", Value::from("Bob"))])
            .unwrap();
        let knows = session
            .create_edge(alice, bob, "KNOWS", [("since", Value::from(2020))])
            .unwrap();
        session.set_node_property(alice, "age", 30).unwrap();
        session.add_label(alice, "Admin").unwrap();
        session.delete_node(bob).unwrap_err();
        db.close().unwrap();
        (alice, knows)
    };

    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    let session = db.session();
    let node = session.node(alice).unwrap();
    assert!(node.has_label("Admin"));
    assert_eq!(node.properties[&PropertyKey::new("age")], Value::Int64(30));
    let edge = session.edge(knows).unwrap();
    assert_eq!(edge.properties[&PropertyKey::new("since")], Value::Int64(2020));
    assert_eq!(db.node_count(), 2);
}

#[test]
fn rolled_back_and_unfinished_transactions_are_not_recovered() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = QuiverDB::with_config(config(dir.path())).unwrap();
        let mut kept = db.session();
        kept.create_node(&["Person"], []).unwrap();

        let mut discarded = db.session();
        discarded.begin_tx().unwrap();
        discarded.create_node(&["Person"], []).unwrap();
        discarded.rollback().unwrap();

        let mut unfinished = db.session();
        unfinished.begin_tx().unwrap();
        unfinished.create_node(&["Person"], []).unwrap();
        std::mem::forget(unfinished);
    }
    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    assert_eq!(db.node_count(), 1);
}

#[test]
fn ids_keep_growing_after_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let first = {
        let db = QuiverDB::with_config(config(dir.path())).unwrap();
        db.session().create_node(&["Person"], []).unwrap()
    };
    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    let second = db.session().create_node(&["Person"], []).unwrap();
    assert!(second > first);
    assert_eq!(db.node_count(), 2);
}

#[test]
fn torn_tail_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = QuiverDB::with_config(config(dir.path()).without_checkpoint_on_close()).unwrap();
        let mut session = db.session();
        session.create_node(&["Person"], [("name", Value::from("Alice"))]).unwrap();
        session.create_node(&["Person"], [("name", Value::from("Bob"))]).unwrap();
    }
    // A crash in the middle of a later append.
    let mut file = OpenOptions::new()
        .append(true)
        .open(newest_segment(dir.path()))
        .unwrap();
    file.write_all(&[0x2a, 0x00, 0x00, 0x00, 0x01, 0x02]).unwrap();
    drop(file);

    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    assert_eq!(db.node_count(), 2);
}

#[test]
fn checkpoint_then_more_writes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = QuiverDB::with_config(config(dir.path()).without_checkpoint_on_close()).unwrap();
        let mut session = db.session();
        let ids: Vec<_> = (0..100)
            .map(|i| session.create_node(&["Person"], [("i", Value::Int64(i))]).unwrap())
            .collect();
        db.checkpoint().unwrap().unwrap();
        for id in &ids[..10] {
            session.detach_delete_node(*id).unwrap();
        }
        session.set_node_property(ids[50], "i", Value::Null).unwrap();
    }
    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    assert_eq!(db.node_count(), 90);
    let stats = db.analyze();
    assert_eq!(stats.total_nodes, 90);
}

#[test]
fn automatic_checkpoint_truncates_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::persistent(dir.path())
        .with_checkpoint_interval_ms(10)
        .with_checkpoint_wal_threshold(1024);
    let db = QuiverDB::with_config(config.clone()).unwrap();
    let first_segment = newest_segment(dir.path());
    let mut session = db.session();
    for i in 0..200 {
        session.create_node(&["Person"], [("i", Value::Int64(i))]).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while first_segment.exists() {
        assert!(Instant::now() < deadline, "checkpoint never ran");
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(session);
    drop(db);
    let db = QuiverDB::with_config(config).unwrap();
    assert_eq!(db.node_count(), 200);
}

#[test]
fn nested_values_survive_maintenance_replay_and_checkpoint() {
    let profile = || {
        Value::map([
            ("tags", Value::list([Value::from("admin"), Value::Null, Value::Int64(7)])),
            (
                "address",
                Value::map([("city", Value::from("Utrecht")), ("zip", Value::list([]))]),
            ),
            ("scores", Value::list([Value::Float64(0.5), Value::list([Value::Bool(true)])])),
        ])
    };
    let history = || Value::list([profile(), Value::map(Vec::<(&str, Value)>::new())]);

    let dir = tempfile::tempdir().unwrap();
    let (alice, bob) = {
        let db = QuiverDB::with_config(config(dir.path()).without_checkpoint_on_close()).unwrap();
        let mut session = db.session();
        let alice = session
            .create_node(&["Person"], [("profile", profile())])
            .unwrap();
        let bob = session.create_node(&["Person"], []).unwrap();
        session.set_node_property(bob, "history", history()).unwrap();

        assert_eq!(property(&db, alice, "profile"), profile());
        db.maintain();
        assert_eq!(property(&db, alice, "profile"), profile());
        assert_eq!(property(&db, bob, "history"), history());
        (alice, bob)
    };

    // Replayed from the WAL alone.
    {
        let db = QuiverDB::with_config(config(dir.path())).unwrap();
        assert_eq!(property(&db, alice, "profile"), profile());
        assert_eq!(property(&db, bob, "history"), history());
        db.checkpoint().unwrap();
    }

    // Loaded from the checkpoint image.
    let db = QuiverDB::with_config(config(dir.path())).unwrap();
    assert_eq!(property(&db, alice, "profile"), profile());
    assert_eq!(property(&db, bob, "history"), history());
}
