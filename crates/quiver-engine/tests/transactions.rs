//! Snapshot isolation and conflict detection through sessions.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use quiver_common::types::{NodeId, PropertyKey, Value};
use quiver_common::utils::error::{Error, TransactionError};
use quiver_engine::QuiverDB;
use quiver_engine::query::plan::{LogicalExpression as E, LogicalOperator};

fn is_conflict(err: &Error) -> bool {
    matches!(err, Error::Transaction(TransactionError::WriteConflict { .. }))
}

fn age(db: &QuiverDB, id: NodeId) -> Option<Value> {
    db.session()
        .node(id)
        .and_then(|n| n.properties.get(&PropertyKey::new("age")).cloned())
}

#[test]
fn first_committer_wins() {
    let db = QuiverDB::new_in_memory().unwrap();
    let id = db
        .session()
        .create_node(&["Person"], [("age", Value::from(30))])
        .unwrap();

    let mut t1 = db.session();
    let mut t2 = db.session();
    t1.begin_tx().unwrap();
    t2.begin_tx().unwrap();
    t1.set_node_property(id, "age", 31).unwrap();
    t2.set_node_property(id, "age", 32).unwrap();

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(is_conflict(&err));
    assert!(!t2.in_transaction());
    assert_eq!(age(&db, id), Some(Value::Int64(31)));
    assert_eq!(db.transaction_stats().conflicts, 1);
}

#[test]
fn disjoint_writes_both_commit() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut setup = db.session();
    let a = setup.create_node(&["Person"], []).unwrap();
    let b = setup.create_node(&["Person"], []).unwrap();

    let mut t1 = db.session();
    let mut t2 = db.session();
    t1.begin_tx().unwrap();
    t2.begin_tx().unwrap();
    t1.set_node_property(a, "age", 1).unwrap();
    t2.set_node_property(b, "age", 2).unwrap();
    t1.commit().unwrap();
    t2.commit().unwrap();
    assert_eq!(age(&db, a), Some(Value::Int64(1)));
    assert_eq!(age(&db, b), Some(Value::Int64(2)));
}

#[test]
fn edge_to_concurrently_deleted_node_conflicts() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut setup = db.session();
    let a = setup.create_node(&["Person"], []).unwrap();
    let b = setup.create_node(&["Person"], []).unwrap();

    let mut t1 = db.session();
    t1.begin_tx().unwrap();
    let mut t2 = db.session();
    t2.begin_tx().unwrap();
    t2.delete_node(b).unwrap();
    t2.commit().unwrap();

    // Still visible in t1's snapshot, so the edge is created...
    t1.create_edge(a, b, "KNOWS", []).unwrap();
    // ...but it would dangle once committed.
    assert!(is_conflict(&t1.commit().unwrap_err()));
    assert_eq!(db.edge_count(), 0);
}

#[test]
fn deleting_a_node_with_edges_needs_detach() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    let a = session.create_node(&["Person"], []).unwrap();
    let b = session.create_node(&["Person"], []).unwrap();
    session.create_edge(a, b, "KNOWS", []).unwrap();
    session.create_edge(b, a, "KNOWS", []).unwrap();

    let err = session.delete_node(a).unwrap_err();
    assert!(matches!(err, Error::EdgeConstraintViolation { edges: 2, .. }));
    assert_eq!(session.detach_delete_node(a).unwrap(), 2);
    assert_eq!(db.node_count(), 1);
    assert_eq!(db.edge_count(), 0);
}

#[test]
fn commit_without_transaction_is_invalid() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction(TransactionError::InvalidState(_))));
    session.begin_tx().unwrap();
    assert!(session.begin_tx().is_err());
}

#[test]
fn concurrent_increments_never_lose_updates() {
    let db = Arc::new(QuiverDB::new_in_memory().unwrap());
    let id = db
        .session()
        .create_node(&["Counter"], [("n", Value::from(0))])
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut session = db.session();
                let mut done = 0;
                while done < 25 {
                    session.begin_tx().unwrap();
                    let n = session
                        .node(id)
                        .and_then(|n| n.properties[&PropertyKey::new("n")].as_int64())
                        .unwrap();
                    session.set_node_property(id, "n", n + 1).unwrap();
                    match session.commit() {
                        Ok(_) => done += 1,
                        Err(e) => assert!(is_conflict(&e), "{e}"),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let n = db.session().node(id).unwrap().properties[&PropertyKey::new("n")].clone();
    assert_eq!(n, Value::Int64(100));
    assert_eq!(db.transaction_manager().active_count(), 0);
}

#[test]
fn long_reader_keeps_its_versions_through_maintenance() {
    let db = QuiverDB::new_in_memory().unwrap();
    let id = db
        .session()
        .create_node(&["Person"], [("age", Value::from(30))])
        .unwrap();

    let mut reader = db.session();
    reader.begin_tx().unwrap();
    let mut writer = db.session();
    for age in 31..40 {
        writer.set_node_property(id, "age", age).unwrap();
    }
    db.maintain();

    let node = reader.node(id).unwrap();
    assert_eq!(node.properties[&PropertyKey::new("age")], Value::Int64(30));
    reader.commit().unwrap();
    db.maintain();
    assert_eq!(age(&db, id), Some(Value::Int64(39)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn filtered_count_matches_direct_count(
        ages in proptest::collection::vec(0i64..100, 1..200),
        threshold in 0i64..100,
    ) {
        let db = QuiverDB::new_in_memory().unwrap();
        let mut session = db.session();
        let batch = ages
            .iter()
            .map(|a| (vec!["Person".to_string()], vec![("age".into(), Value::Int64(*a))]))
            .collect();
        session.create_nodes_batch(batch).unwrap();

        let result = session
            .execute(
                LogicalOperator::node_scan("p", Some("Person"))
                    .filter(E::property("p", "age").ge(E::literal(threshold)))
                    .into_plan(),
            )
            .unwrap();
        let expected = ages.iter().filter(|a| **a >= threshold).count();
        prop_assert_eq!(result.row_count(), expected);
    }
}
