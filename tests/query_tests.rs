use std::thread;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use bucketdb::{Config, Database, ErrorKind, Field, Plan, Predicate, Record, RecordMeta, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    meta: RecordMeta,
    x: i64,
    y: i64,
    tags: Vec<String>,
}

impl Record for Point {
    const BUCKET: &'static str = "points";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("X", |p: &Point| Value::from(p.x)).alias("x"),
            Field::new("Y", |p: &Point| Value::from(p.y)).alias("y"),
            Field::new("Tags", |p: &Point| Value::from(p.tags.clone())).alias("tags"),
        ]
    }
}

fn point(id: &str, x: i64, y: i64) -> Point {
    Point {
        meta: RecordMeta::new(id),
        x,
        y,
        tags: vec!["t".to_string()],
    }
}

/// Sleeps in the accessor of its list field so scans can be made slow
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slow {
    meta: RecordMeta,
    labels: Vec<String>,
}

impl Record for Slow {
    const BUCKET: &'static str = "slow";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("Labels", |s: &Slow| {
            thread::sleep(Duration::from_millis(50));
            Value::from(s.labels.clone())
        })
        .alias("labels")]
    }
}

/// Counts views in a `usize`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Page {
    meta: RecordMeta,
    views: usize,
}

impl Record for Page {
    const BUCKET: &'static str = "pages";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("Views", |p: &Page| Value::from(p.views)).alias("views")]
    }
}

fn ids<R: Record>(records: &[R]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().map(|r| r.meta().id.clone()).collect();
    ids.sort();
    ids
}

#[test]
fn test_multi_criteria_intersection() {
    let db = Database::in_memory().unwrap();
    db.save(&mut point("a", 1, 2)).unwrap();
    db.save(&mut point("b", 1, 3)).unwrap();
    db.save(&mut point("c", 2, 2)).unwrap();

    let predicate = Predicate::eq("x", 1).and_eq("y", 2);
    assert!(db.explain::<Point>("points", &predicate).unwrap().is_index_hit());

    let found: Vec<Point> = db.find_where(&predicate).unwrap();
    assert_eq!(ids(&found), vec!["a"]);

    let found: Vec<Point> = db.find_where(&Predicate::eq("x", 1)).unwrap();
    assert_eq!(ids(&found), vec!["a", "b"]);
}

#[test]
fn test_declared_name_and_alias_both_resolve() {
    let db = Database::in_memory().unwrap();
    db.save(&mut point("a", 7, 0)).unwrap();

    let by_alias: Vec<Point> = db.find_where(&Predicate::eq("x", 7)).unwrap();
    let by_name: Vec<Point> = db.find_where(&Predicate::eq("X", 7)).unwrap();
    assert_eq!(by_alias, by_name);
    assert_eq!(by_alias.len(), 1);
}

#[test]
fn test_unknown_field_matches_nothing() {
    let db = Database::in_memory().unwrap();
    db.save(&mut point("a", 1, 2)).unwrap();

    let predicate = Predicate::eq("z", 1);
    assert_eq!(db.explain::<Point>("points", &predicate).unwrap(), Plan::Empty);
    let found: Vec<Point> = db.find_where(&predicate).unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_empty_predicate_returns_everything() {
    let db = Database::in_memory().unwrap();
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        db.save(&mut point(id, i as i64, 0)).unwrap();
    }

    let found: Vec<Point> = db.find_where(&Predicate::all()).unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(db.find_all::<Point>().unwrap().len(), 3);
}

#[test]
fn test_missing_bucket_is_reported() {
    let db = Database::in_memory().unwrap();
    let err = db.find_where::<Point>(&Predicate::eq("x", 1)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BucketNotFound);
}

#[test]
fn test_list_field_is_scanned_not_indexed() {
    let db = Database::in_memory().unwrap();
    db.save(&mut point("a", 1, 1)).unwrap();

    let stats = db.stats().unwrap();
    let bucket = stats.buckets.iter().find(|b| b.name == "points").unwrap();
    assert!(bucket.indexed_fields.contains(&"x".to_string()));
    assert!(!bucket.indexed_fields.contains(&"tags".to_string()));

    let predicate = Predicate::eq("tags", vec!["t"]);
    assert_eq!(db.explain::<Point>("points", &predicate).unwrap(), Plan::Scan);
    let found: Vec<Point> = db.find_where(&predicate).unwrap();
    assert_eq!(ids(&found), vec!["a"]);
}

#[test]
fn test_scan_agrees_with_index_across_worker_counts() {
    for workers in [1, 3, 8] {
        for n in [0usize, 1, 17, 120] {
            let db = Database::open(Config::default().scan_workers(workers)).unwrap();
            db.create_bucket("points").unwrap();
            for i in 0..n {
                db.save(&mut point(&format!("p{:03}", i), (i % 4) as i64, 0)).unwrap();
            }

            let indexed: Vec<Point> = db.find_where(&Predicate::eq("x", 2)).unwrap();
            // tags is a list, so this predicate always goes through the scan engine
            let scanned: Vec<Point> = db
                .find_where(&Predicate::eq("x", 2).and_eq("tags", vec!["t"]))
                .unwrap();

            let expected = (0..n).filter(|i| i % 4 == 2).count();
            assert_eq!(indexed.len(), expected, "workers={} n={}", workers, n);
            assert_eq!(ids(&scanned), ids(&indexed), "workers={} n={}", workers, n);
        }
    }
}

#[test]
fn test_slow_workers_trip_item_timeout() {
    let config = Config::default()
        .scan_workers(1)
        .queue_depth_per_worker(1)
        .item_timeout(Duration::from_millis(10));
    let db = Database::open(config).unwrap();
    for i in 0..10 {
        let mut record = Slow {
            meta: RecordMeta::new(format!("s{}", i)),
            labels: vec!["x".to_string()],
        };
        db.save(&mut record).unwrap();
    }

    let err = db
        .find_where::<Slow>(&Predicate::eq("labels", vec!["x"]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[test]
fn test_scan_timeout_aborts_whole_scan() {
    let config = Config::default()
        .scan_workers(1)
        .scan_timeout(Duration::from_millis(5));
    let db = Database::open(config).unwrap();
    for i in 0..10 {
        let mut record = Slow {
            meta: RecordMeta::new(format!("s{}", i)),
            labels: vec!["x".to_string()],
        };
        db.save(&mut record).unwrap();
    }

    let err = db
        .find_where::<Slow>(&Predicate::eq("labels", vec!["x"]))
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_soft_deleted_records_queryable_by_deleted_at() {
    let db = Database::in_memory().unwrap();
    let mut a = point("a", 1, 0);
    db.save(&mut a).unwrap();
    db.save(&mut point("b", 1, 0)).unwrap();

    db.soft_delete(&mut a).unwrap();
    assert!(db.find::<Point>("a").unwrap().meta.is_deleted());

    let live: Vec<Point> = db.find_where(&Predicate::eq("deleted_at", Value::Null)).unwrap();
    assert_eq!(ids(&live), vec!["b"]);

    // soft delete hides nothing on its own
    let all: Vec<Point> = db.find_where(&Predicate::eq("x", 1)).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_hard_delete_removes_from_index() {
    let db = Database::in_memory().unwrap();
    let mut a = point("a", 5, 0);
    db.save(&mut a).unwrap();
    db.delete(&a).unwrap();

    assert!(db.find::<Point>("a").unwrap_err().is_not_found());
    let found: Vec<Point> = db.find_where(&Predicate::eq("x", 5)).unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_update_moves_index_entry() {
    let db = Database::in_memory().unwrap();
    let mut a = point("a", 1, 0);
    db.save(&mut a).unwrap();
    a.x = 9;
    db.save(&mut a).unwrap();

    assert!(db.find_where::<Point>(&Predicate::eq("x", 1)).unwrap().is_empty());
    assert_eq!(db.find_where::<Point>(&Predicate::eq("x", 9)).unwrap().len(), 1);
}

#[test]
fn test_integer_literal_matches_unsigned_field() {
    let db = Database::in_memory().unwrap();
    for (id, views) in [("home", 3usize), ("about", 5)] {
        let mut page = Page {
            meta: RecordMeta::new(id),
            views,
        };
        db.save(&mut page).unwrap();
    }

    let predicate = Predicate::eq("views", 3);
    assert!(db.explain::<Page>("pages", &predicate).unwrap().is_index_hit());
    let found: Vec<Page> = db.find_where(&predicate).unwrap();
    assert_eq!(ids(&found), vec!["home"]);
}
