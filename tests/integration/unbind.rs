#![allow(missing_docs)]

mod common;

use std::time::Duration;

use common::{open, page, wait_until};
use pagekeep::primitives::io::DiskStore;
use pagekeep::{ObjectId, Result};
use tempfile::tempdir;

#[test]
fn unbind_removes_memory_and_disk_state() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for ns in ["main", "popup"] {
        for id in 0..4 {
            store.store("doomed", page(ns, id, 0, 0))?;
            store.access("doomed", Some(ns), ObjectId(id), 0)?;
        }
    }
    store.store("survivor", page("main", 1, 0, 0))?;
    let disk = DiskStore::open(dir.path())?;
    let session_dir = disk.session_dir("doomed");
    assert!(wait_until(Duration::from_secs(5), || {
        disk.record_names("doomed").map(|names| names.len() == 8).unwrap_or(false)
    }));

    store.unbind("doomed")?;

    assert!(!session_dir.exists());
    for ns in ["main", "popup"] {
        for id in 0..4 {
            assert!(store
                .get("doomed", Some(ns), ObjectId(id), None, None)?
                .is_none());
            assert!(!store.contains("doomed", Some(ns), ObjectId(id), 0)?);
        }
    }
    assert_eq!(store.stats().sessions, 1);
    assert!(store
        .get("survivor", Some("main"), ObjectId(1), Some(0), Some(0))?
        .is_some());
    Ok(())
}

#[test]
fn unbind_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    store.unbind("never-bound")?;
    store.store("s", page("main", 1, 0, 0))?;
    store.unbind("s")?;
    store.unbind("s")?;
    assert!(store.get("s", Some("main"), ObjectId(1), None, None)?.is_none());
    Ok(())
}

#[test]
fn unbind_wins_over_queued_work() -> Result<()> {
    let dir = tempdir()?;
    let disk = DiskStore::open(dir.path())?;
    {
        let store = open(dir.path())?;
        for id in 0..200 {
            store.store("busy", page("main", id, 0, 0))?;
        }
        store.unbind("busy")?;
        store.destroy();
    }
    assert!(!disk.session_dir("busy").exists());
    Ok(())
}

#[test]
fn remove_drops_one_object_or_a_namespace() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for id in 0..3 {
        store.store("s", page("main", id, 0, 0))?;
        store.store("s", page("popup", id, 0, 0))?;
    }
    store.remove("s", Some("main"), Some(ObjectId(1)))?;
    assert!(!store.contains("s", Some("main"), ObjectId(1), 0)?);
    assert!(store.contains("s", Some("main"), ObjectId(2), 0)?);

    store.remove("s", Some("popup"), None)?;
    for id in 0..3 {
        assert!(!store.contains("s", Some("popup"), ObjectId(id), 0)?);
    }
    assert!(store.contains("s", Some("main"), ObjectId(0), 0)?);
    Ok(())
}
