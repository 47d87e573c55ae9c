//! End-to-end query scenarios over a live database.

use quiver_common::types::Value;
use quiver_common::utils::error::Error;
use quiver_core::IndexKind;
use quiver_engine::query::Optimizer;
use quiver_engine::query::plan::{AggregateExpr, LogicalExpression as E, LogicalOperator, LogicalPlan};
use quiver_engine::{Config, QuiverDB, Session};

fn count_label(session: &Session, label: &str) -> i64 {
    session
        .execute(
            LogicalOperator::node_scan("n", Some(label))
                .aggregate(vec![], vec![AggregateExpr::count_star().alias("c")])
                .into_plan(),
        )
        .unwrap()
        .scalar::<i64>()
        .unwrap()
}

#[test]
fn filter_scan_returns_matching_person() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    let alice = session
        .create_node(&["Person"], [("name", Value::from("Alice")), ("age", Value::from(30))])
        .unwrap();
    let bob = session
        .create_node(&["Person"], [("name", Value::from("Bob")), ("age", Value::from(25))])
        .unwrap();
    session.create_edge(alice, bob, "KNOWS", []).unwrap();

    let result = session
        .execute(
            LogicalOperator::node_scan("p", Some("Person"))
                .filter(E::property("p", "age").gt(E::literal(26)))
                .project(vec![(E::property("p", "name"), Some("name"))])
                .into_plan(),
        )
        .unwrap();
    assert_eq!(result.column_names(), vec!["name"]);
    assert_eq!(result.rows, vec![vec![Value::from("Alice")]]);
}

#[test]
fn snapshot_isolation_hides_concurrent_commit() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut setup = db.session();
    setup.create_node(&["Person"], [("name", Value::from("Alice"))]).unwrap();
    setup.create_node(&["Person"], [("name", Value::from("Bob"))]).unwrap();

    let mut t1 = db.session();
    t1.begin_tx().unwrap();
    assert_eq!(count_label(&t1, "Person"), 2);

    let mut t2 = db.session();
    t2.begin_tx().unwrap();
    t2.create_node(&["Person"], [("name", Value::from("Carol"))]).unwrap();
    t2.commit().unwrap();

    assert_eq!(count_label(&t1, "Person"), 2);
    t1.commit().unwrap();

    t1.begin_tx().unwrap();
    assert_eq!(count_label(&t1, "Person"), 3);
    t1.commit().unwrap();
}

fn chain_join(order: [usize; 3]) -> LogicalPlan {
    let scans = [
        LogicalOperator::node_scan("p", Some("Person")),
        LogicalOperator::node_scan("c", Some("City")),
        LogicalOperator::node_scan("k", Some("Country")),
    ];
    let conditions = |a: usize, b: usize| match (a.min(b), a.max(b)) {
        (0, 1) => vec![(E::property("p", "city"), E::property("c", "name"))],
        (1, 2) => vec![(E::property("c", "country"), E::property("k", "name"))],
        _ => vec![],
    };
    let [first, second, third] = order;
    let mut scans = scans.map(Some);
    let left = scans[first].take().unwrap();
    let middle = scans[second].take().unwrap();
    let right = scans[third].take().unwrap();
    let mut tail = conditions(first, third);
    tail.extend(conditions(second, third));
    left.join(middle, conditions(first, second))
        .join(right, tail)
        .into_plan()
}

fn populate_geography(session: &mut Session) {
    for k in 0..3 {
        session
            .create_node(&["Country"], [("name", Value::from(format!("country-{k}")))])
            .unwrap();
    }
    for c in 0..30 {
        session
            .create_node(
                &["City"],
                [
                    ("name", Value::from(format!("city-{c}"))),
                    ("country", Value::from(format!("country-{}", c % 3))),
                ],
            )
            .unwrap();
    }
    let batch = (0..600)
        .map(|p| {
            (
                vec!["Person".to_string()],
                vec![("city".into(), Value::from(format!("city-{}", p % 30)))],
            )
        })
        .collect();
    session.create_nodes_batch(batch).unwrap();
}

#[test]
fn join_ordering_is_no_worse_than_any_written_order() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    populate_geography(&mut session);
    let stats = db.analyze();

    let chosen = Optimizer::new()
        .with_statistics(stats.clone())
        .optimize(chain_join([0, 1, 2]))
        .unwrap();
    // Orders that never need a cross product.
    for order in [[0, 1, 2], [1, 0, 2], [1, 2, 0], [2, 1, 0]] {
        let written = Optimizer::new()
            .with_statistics(stats.clone())
            .with_join_reorder(false)
            .optimize(chain_join(order))
            .unwrap();
        assert!(
            chosen.cost().total() <= written.cost().total() + 1e-6,
            "{order:?}: chosen {} > written {}",
            chosen.cost().total(),
            written.cost().total()
        );
    }

    // Every person lives in exactly one city of exactly one country.
    let rows = session.execute(chain_join([2, 0, 1])).unwrap().row_count();
    assert_eq!(rows, 600);
}

#[test]
fn limit_stops_the_scan_early() {
    let config = Config::in_memory()
        .with_threads(1)
        .with_morsel_size(256);
    let db = QuiverDB::with_config(config).unwrap();
    let mut session = db.session();
    let batch = (0..10_000)
        .map(|i| (vec!["Item".to_string()], vec![("n".into(), Value::Int64(i))]))
        .collect();
    session.create_nodes_batch(batch).unwrap();

    let result = session
        .execute(
            LogicalOperator::node_scan("i", Some("Item"))
                .project(vec![(E::property("i", "n"), Some("n"))])
                .limit(5)
                .into_plan(),
        )
        .unwrap();
    assert_eq!(result.row_count(), 5);
    assert!(result.stats.morsels_total >= 10_000 / 256);
    assert!(
        result.stats.morsels_processed < result.stats.morsels_total,
        "{:?}",
        result.stats
    );
}

#[test]
fn cancelled_query_reports_cancellation() {
    let config = Config::in_memory()
        .with_morsel_size(16)
        .with_result_queue_capacity(1);
    let db = QuiverDB::with_config(config).unwrap();
    let mut session = db.session();
    let batch = (0..3000)
        .map(|i| (vec!["N".to_string()], vec![("v".into(), Value::Int64(i))]))
        .collect();
    session.create_nodes_batch(batch).unwrap();

    let mut stream = session
        .query(
            LogicalOperator::node_scan("a", Some("N"))
                .join(LogicalOperator::node_scan("b", Some("N")), vec![])
                .into_plan(),
        )
        .unwrap();
    assert!(stream.next().is_some());
    let handle = stream.handle();
    handle.cancel();
    assert!(handle.is_cancelled());

    let outcome = stream.find(Result::is_err);
    assert!(matches!(outcome, Some(Err(Error::Cancelled))));
    assert_eq!(db.transaction_manager().active_count(), 0);
}

#[test]
fn aggregates_group_by_property() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    populate_geography(&mut session);

    let result = session
        .execute(
            LogicalOperator::node_scan("c", Some("City"))
                .aggregate(
                    vec![(E::property("c", "country"), Some("country"))],
                    vec![AggregateExpr::count_star().alias("cities")],
                )
                .sort(vec![(
                    E::variable("country"),
                    quiver_engine::query::plan::SortOrder::Ascending,
                )])
                .into_plan(),
        )
        .unwrap();
    assert_eq!(result.row_count(), 3);
    for row in &result.rows {
        assert_eq!(row[1], Value::Int64(10));
    }
    assert_eq!(result.rows[0][0], Value::from("country-0"));
}

fn sorted_ages(session: &Session, predicate: E) -> Vec<Value> {
    let result = session
        .execute(
            LogicalOperator::node_scan("p", Some("Person"))
                .filter(predicate)
                .project(vec![(E::property("p", "age"), Some("age"))])
                .into_plan(),
        )
        .unwrap();
    let mut ages: Vec<Value> = result.rows.into_iter().map(|mut row| row.remove(0)).collect();
    ages.sort_by(|a, b| a.total_cmp(b).then_with(|| a.type_name().cmp(b.type_name())));
    ages
}

#[test]
fn index_seek_matches_full_scan_over_mixed_numbers() {
    let db = QuiverDB::new_in_memory().unwrap();
    let mut session = db.session();
    let mut batch: Vec<(Vec<String>, Vec<(_, Value)>)> = (0..1000i64)
        .map(|i| {
            let age = if i % 2 == 0 { Value::Int64(i) } else { Value::Float64(i as f64) };
            (vec!["Person".to_string()], vec![("age".into(), age)])
        })
        .collect();
    batch.push((vec!["Person".to_string()], vec![("age".into(), Value::Float64(990.0))]));
    batch.push((vec!["Person".to_string()], vec![("age".into(), Value::Float64(989.5))]));
    session.create_nodes_batch(batch).unwrap();

    let predicates = || {
        vec![
            E::property("p", "age").ge(E::literal(990.0)),
            E::property("p", "age").gt(E::literal(989)),
            E::property("p", "age").lt(E::literal(2.0)),
            E::property("p", "age").eq(E::literal(990.0)),
            E::property("p", "age").eq(E::literal(991)),
        ]
    };
    let run = |session: &Session| -> Vec<Vec<Value>> {
        predicates().into_iter().map(|p| sorted_ages(session, p)).collect()
    };
    let scanned = run(&session);
    assert_eq!(scanned[0].len(), 11);
    assert_eq!(scanned[1].len(), 12);
    assert_eq!(scanned[3], vec![Value::Float64(990.0), Value::Int64(990)]);
    assert_eq!(scanned[4], vec![Value::Float64(991.0)]);

    assert!(db.create_index("age", IndexKind::BTree).unwrap());
    let stats = db.analyze();
    let plan = Optimizer::new()
        .with_statistics(stats)
        .with_indexes(db.store().property_indexes())
        .optimize(
            LogicalOperator::node_scan("p", Some("Person"))
                .filter(E::property("p", "age").ge(E::literal(990.0)))
                .into_plan(),
        )
        .unwrap();
    assert!(plan.to_string().contains("IndexSeek"), "{plan}");

    assert_eq!(run(&session), scanned);
}
