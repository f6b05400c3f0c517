#![allow(missing_docs)]

mod common;

use common::{open, page};
use pagekeep::{ObjectId, Result, StoreError, VersionCursor};
use tempfile::tempdir;

#[test]
fn back_navigation_discards_forward_history() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for version in 0..3 {
        store.store("sess", page("main", 1, version, 0))?;
        store.access("sess", Some("main"), ObjectId(1), version)?;
    }

    store.access("sess", Some("main"), ObjectId(1), 0)?;

    assert!(store.contains("sess", Some("main"), ObjectId(1), 0)?);
    assert!(!store.contains("sess", Some("main"), ObjectId(1), 1)?);
    assert!(!store.contains("sess", Some("main"), ObjectId(1), 2)?);
    let latest = store
        .get("sess", Some("main"), ObjectId(1), None, None)?
        .expect("surviving version");
    assert_eq!(latest.version, 0);
    assert!(store
        .get("sess", Some("main"), ObjectId(1), Some(2), Some(0))?
        .is_none());
    Ok(())
}

#[test]
fn objects_only_reachable_forward_are_removed() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    store.store("sess", page("main", 1, 0, 0))?;
    store.access("sess", Some("main"), ObjectId(1), 0)?;
    store.store("sess", page("main", 2, 0, 0))?;
    store.access("sess", Some("main"), ObjectId(2), 0)?;
    store.store("sess", page("main", 2, 1, 0))?;
    store.access("sess", Some("main"), ObjectId(2), 1)?;

    store.access("sess", Some("main"), ObjectId(1), 0)?;

    assert!(!store.contains("sess", Some("main"), ObjectId(2), 0)?);
    assert!(!store.contains("sess", Some("main"), ObjectId(2), 1)?);
    assert!(store
        .get("sess", Some("main"), ObjectId(2), None, None)?
        .is_none());
    assert!(store
        .get("sess", Some("main"), ObjectId(1), None, None)?
        .is_some());
    Ok(())
}

#[test]
fn rollback_in_other_namespace_is_isolated() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for ns in ["main", "popup"] {
        for version in 0..2 {
            store.store("sess", page(ns, 1, version, 0))?;
            store.access("sess", Some(ns), ObjectId(1), version)?;
        }
    }
    store.access("sess", Some("popup"), ObjectId(1), 0)?;
    assert!(!store.contains("sess", Some("popup"), ObjectId(1), 1)?);
    assert!(store.contains("sess", Some("main"), ObjectId(1), 1)?);
    Ok(())
}

#[test]
fn cursor_rollback_crosses_one_version() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for sub in 0..=3 {
        store.store("sess", page("main", 7, 1, sub))?;
    }
    for sub in 0..=1 {
        store.store("sess", page("main", 7, 2, sub))?;
    }
    let cursor = VersionCursor::new(2, 1, 3);

    let one_back = store
        .rollback("sess", Some("main"), ObjectId(7), cursor, 1)?
        .expect("2.0");
    assert_eq!((one_back.version, one_back.sub), (2, 0));

    let crossed = store
        .rollback("sess", Some("main"), ObjectId(7), cursor, 3)?
        .expect("1.1");
    assert_eq!((crossed.version, crossed.sub), (1, 1));

    assert!(matches!(
        store.rollback("sess", Some("main"), ObjectId(7), cursor, 5),
        Err(StoreError::RollbackTooFar { steps: 5, .. })
    ));
    Ok(())
}
