//! Integration tests for the fact store

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use reticle_foundation::{ErrorKind, Value, ValueKind};
use reticle_memory::{FactStore, TypeRegistry};

struct Gauge {
    level: AtomicI64,
    label: &'static str,
}

fn gauge(level: i64, label: &'static str) -> Arc<Gauge> {
    Arc::new(Gauge {
        level: AtomicI64::new(level),
        label,
    })
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.declare_type("Gauge");
    registry.declare_type("Other");
    registry
        .declare_typed_field("Gauge", "level", ValueKind::Numeric, |g: &Gauge| {
            Value::Int(g.level.load(Ordering::SeqCst))
        })
        .unwrap();
    registry
        .declare_typed_field("Gauge", "label", ValueKind::String, |g: &Gauge| {
            Value::from(g.label)
        })
        .unwrap();
    registry
}

// =============================================================================
// Insert / Delete
// =============================================================================

#[test]
fn insert_indexes_by_type() {
    let registry = registry();
    let mut store = FactStore::new();
    let gauge_ty = registry.resolve("Gauge").unwrap();
    let other_ty = registry.resolve("Other").unwrap();

    let a = store.insert(gauge_ty, gauge(1, "a"));
    let b = store.insert(other_ty, Arc::new(()));
    let c = store.insert(gauge_ty, gauge(2, "c"));

    assert_eq!(store.len(), 3);
    assert_eq!(store.count_of_type(gauge_ty.id()), 2);
    let gauges: Vec<_> = store.of_type(gauge_ty.id()).map(|f| f.handle()).collect();
    assert_eq!(gauges, vec![a, c]);
    assert_eq!(store.get(b).unwrap().type_id(), other_ty.id());
}

#[test]
fn delete_forgets_fact() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let h = store.insert(ty, gauge(1, "a"));

    let removed = store.delete(h).unwrap();
    assert_eq!(removed.handle(), h);
    assert!(!store.contains(h));
    assert_eq!(store.count_of_type(ty.id()), 0);
    assert!(matches!(
        store.delete(h).unwrap_err().kind,
        ErrorKind::InvalidHandle(_)
    ));
    assert!(store.get(h).is_err());
}

// =============================================================================
// Update / Replace
// =============================================================================

#[test]
fn update_reports_changed_fields_only() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let level = ty.field("level").unwrap().clone();
    let label = ty.field("label").unwrap().clone();

    let payload = gauge(5, "tank");
    let h = store.insert(ty, payload.clone());
    let fact = store.get(h).unwrap();
    assert_eq!(fact.value(&level), Value::Int(5));
    assert_eq!(fact.value(&label), Value::from("tank"));

    payload.level.store(6, Ordering::SeqCst);
    // The cache still holds the old reading until the fact is updated
    assert_eq!(store.get(h).unwrap().value(&level), Value::Int(5));

    let changed = store.update(h, &registry).unwrap();
    assert_eq!(changed.fields(), &[level.id()]);
    assert!(!changed.identity_changed());
    assert_eq!(store.get(h).unwrap().value(&level), Value::Int(6));

    assert!(store.update(h, &registry).unwrap().is_empty());
}

#[test]
fn unread_fields_never_report_changes() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let payload = gauge(1, "x");
    let h = store.insert(ty, payload.clone());

    payload.level.store(2, Ordering::SeqCst);
    assert!(store.update(h, &registry).unwrap().is_empty());
    assert!(store.get(h).unwrap().cached(ty.field("level").unwrap().id()).is_none());
}

#[test]
fn replace_reports_identity_change() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let level = ty.field("level").unwrap().clone();
    let h = store.insert(ty, gauge(1, "x"));
    let _ = store.get(h).unwrap().value(&level);

    let changed = store.replace(h, gauge(1, "y"), &registry).unwrap();
    assert!(changed.identity_changed());
    assert!(changed.fields().is_empty());
    assert!(!changed.is_empty());

    let changed = store.replace(h, gauge(9, "y"), &registry).unwrap();
    assert!(changed.contains(level.id()));
}

#[test]
fn update_unknown_handle_fails() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let h = store.insert(ty, gauge(1, "x"));
    store.delete(h).unwrap();
    assert!(matches!(
        store.update(h, &registry).unwrap_err().kind,
        ErrorKind::InvalidHandle(_)
    ));
}

#[test]
fn facts_can_be_read_from_several_threads() {
    let registry = registry();
    let mut store = FactStore::new();
    let ty = registry.resolve("Gauge").unwrap();
    let level = ty.field("level").unwrap().clone();
    for i in 0..64 {
        store.insert(ty, gauge(i, "g"));
    }

    let total: i64 = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    store
                        .iter()
                        .filter_map(|f| f.value(&level).as_int())
                        .sum::<i64>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });
    assert_eq!(total, 4 * (0..64).sum::<i64>());
}
