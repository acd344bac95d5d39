use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::thread;

use postgres::{Client, NoTls};
use uuid::Uuid;

use nestedset_core::{DeleteMode, Error, Forest, ForestConfig, Placement, RootPosition};
use nestedset_postgres::{drop_table_for_tests, ensure_schema, PgStore};
use nestedset_test_support::{init_tracing, run_suite};

fn url() -> Option<String> {
    std::env::var("NESTEDSET_POSTGRES_URL").ok()
}

fn connect() -> Option<Rc<RefCell<Client>>> {
    let client = Client::connect(&url()?, NoTls).ok()?;
    Some(Rc::new(RefCell::new(client)))
}

fn fresh_table(client: &Rc<RefCell<Client>>) -> String {
    let table = format!("nested_set_{}", Uuid::new_v4().simple());
    ensure_schema(&mut client.borrow_mut(), &table).unwrap();
    table
}

fn forest(client: &Rc<RefCell<Client>>, config: ForestConfig) -> Forest<PgStore> {
    let store = PgStore::new(client.clone(), &config).unwrap();
    Forest::with_config(store, config).unwrap()
}

#[test]
fn postgres_conformance_suite() {
    let Some(client) = connect() else {
        return;
    };
    let mut tables = Vec::new();
    run_suite(|| {
        let table = fresh_table(&client);
        tables.push(table.clone());
        let config = ForestConfig {
            verify_mutations: true,
            delete_batch: 2,
            ..ForestConfig::default()
        }
        .with_table(table);
        forest(&client, config)
    });
    for table in tables {
        drop_table_for_tests(&mut client.borrow_mut(), &table).unwrap();
    }
}

#[test]
fn postgres_ensure_schema_is_idempotent() {
    let Some(client) = connect() else {
        return;
    };
    let table = fresh_table(&client);
    ensure_schema(&mut client.borrow_mut(), &table).unwrap();
    assert!(ensure_schema(&mut client.borrow_mut(), "bad name").is_err());
    drop_table_for_tests(&mut client.borrow_mut(), &table).unwrap();
}

#[test]
fn postgres_locked_tree_times_out() {
    init_tracing();
    let (Some(client), Some(holder)) = (connect(), connect()) else {
        return;
    };
    let table = fresh_table(&client);
    let config = ForestConfig {
        lock_timeout_ms: Some(100),
        ..ForestConfig::default()
    }
    .with_table(table.clone());
    let mut forest = forest(&client, config);
    let root = forest.insert_root().unwrap();

    {
        let mut h = holder.borrow_mut();
        h.batch_execute("BEGIN").unwrap();
        h.query(&format!("SELECT id FROM {table} FOR UPDATE"), &[])
            .unwrap();
    }

    let err = forest.insert_child(root.id).unwrap_err();
    assert!(matches!(err, Error::LockTimeout(_)), "{err}");
    assert_eq!(forest.get(root.id).unwrap().right, 2);

    holder.borrow_mut().batch_execute("ROLLBACK").unwrap();
    forest.insert_child(root.id).unwrap();
    assert_eq!(forest.get(root.id).unwrap().right, 4);

    drop_table_for_tests(&mut client.borrow_mut(), &table).unwrap();
}

#[test]
fn postgres_concurrent_sessions_keep_invariants() {
    init_tracing();
    let Some(url) = url() else {
        return;
    };
    let Some(client) = connect() else {
        return;
    };
    let table = fresh_table(&client);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let url = url.clone();
            let table = table.clone();
            thread::spawn(move || {
                let client = Rc::new(RefCell::new(Client::connect(&url, NoTls).unwrap()));
                let config = ForestConfig {
                    lock_timeout_ms: Some(10_000),
                    ..ForestConfig::default()
                }
                .with_table(table);
                let mut forest = forest(&client, config);
                for _ in 0..5 {
                    let root = forest.insert_root().unwrap();
                    let a = forest.insert_child(root.id).unwrap();
                    let b = forest.insert_child(root.id).unwrap();
                    forest.relocate(b.id, Placement::FirstChildOf(a.id)).unwrap();
                    forest
                        .relocate(a.id, Placement::Root(RootPosition::Last))
                        .unwrap();
                    forest.relocate(a.id, Placement::LastChildOf(root.id)).unwrap();
                    forest.delete(b.id, DeleteMode::Cascade).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let forest = forest(&client, ForestConfig::default().with_table(table.clone()));
    forest.validate().unwrap();
    assert_eq!(forest.query().roots().unwrap().len(), 20);

    drop_table_for_tests(&mut client.borrow_mut(), &table).unwrap();
}

#[test]
fn postgres_opposing_cross_tree_moves_do_not_deadlock() {
    init_tracing();
    let Some(url) = url() else {
        return;
    };
    let Some(client) = connect() else {
        return;
    };
    let table = fresh_table(&client);
    let config = ForestConfig::default().with_table(table.clone());

    let (x, y, from_x, from_y) = {
        let mut forest = forest(&client, config.clone());
        let x = forest.insert_root().unwrap();
        let y = forest.insert_root().unwrap();
        let from_x = forest.insert_child(x.id).unwrap();
        forest.insert_child(from_x.id).unwrap();
        let from_y = forest.insert_child(y.id).unwrap();
        forest.insert_child(from_y.id).unwrap();
        (x.id, y.id, from_x.id, from_y.id)
    };

    let start = Arc::new(Barrier::new(2));
    let workers: Vec<_> = [(from_x, y, x), (from_y, x, y)]
        .into_iter()
        .map(|(node, away, home)| {
            let url = url.clone();
            let start = start.clone();
            let config = ForestConfig {
                lock_timeout_ms: Some(10_000),
                ..config.clone()
            };
            thread::spawn(move || {
                let client = Rc::new(RefCell::new(Client::connect(&url, NoTls).unwrap()));
                let mut forest = forest(&client, config);
                start.wait();
                for _ in 0..100 {
                    for parent in [away, home] {
                        let moved = forest
                            .relocate(node, Placement::LastChildOf(parent))
                            .unwrap_or_else(|e| panic!("moving {node} under {parent}: {e}"));
                        assert_eq!(moved.root, parent);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let forest = forest(&client, config);
    forest.validate().unwrap();
    assert_eq!(forest.get(from_x).unwrap().root, x);
    assert_eq!(forest.get(from_y).unwrap().root, y);
    assert_eq!(forest.get(x).unwrap().right, 6);
    assert_eq!(forest.get(y).unwrap().right, 6);

    drop_table_for_tests(&mut client.borrow_mut(), &table).unwrap();
}
