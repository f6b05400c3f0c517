#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{open, page, Page};
use pagekeep::{ObjectId, Result, SessionPageStore};
use tempfile::tempdir;

fn body(store: &SessionPageStore<Page>, id: u32, v: Option<u32>, s: Option<u32>) -> Result<Option<String>> {
    Ok(store
        .get("sess", Some("main"), ObjectId(id), v, s)?
        .map(|page| page.body.clone()))
}

#[test]
fn every_stored_version_is_readable_immediately() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for version in 0..20 {
        store.store("sess", page("main", 1, version, 0))?;
        store.access("sess", Some("main"), ObjectId(1), version)?;
    }
    for version in 0..20 {
        assert_eq!(
            body(&store, 1, Some(version), Some(0))?,
            Some(format!("main/1@{version}.0"))
        );
    }
    Ok(())
}

#[test]
fn reader_drains_queued_objects_of_its_session() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    for id in 0..50 {
        store.store("sess", page("main", id, 0, 0))?;
    }
    // The oldest object is the last one the LIFO worker would reach.
    assert_eq!(body(&store, 0, Some(0), Some(0))?, Some("main/0@0.0".into()));
    assert_eq!(store.stats().queued, 0);
    for id in 0..50 {
        assert!(store.contains("sess", Some("main"), ObjectId(id), 0)?);
    }
    Ok(())
}

#[test]
fn latest_version_follows_the_newest_store() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    store.store("sess", page("main", 3, 1, 0))?;
    store.store("sess", page("main", 3, 2, 0))?;
    store.store("sess", page("main", 3, 2, 1))?;
    store.store("sess", page("main", 4, 0, 0))?;

    assert_eq!(body(&store, 3, None, None)?, Some("main/3@2.1".into()));
    assert_eq!(body(&store, 3, Some(2), None)?, Some("main/3@2.1".into()));
    assert_eq!(body(&store, 3, Some(1), None)?, Some("main/3@1.0".into()));
    assert_eq!(body(&store, 3, None, Some(0))?, Some("main/3@2.0".into()));
    assert_eq!(body(&store, 5, None, None)?, None);
    Ok(())
}

#[test]
fn restoring_a_queued_version_keeps_the_newest_object() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let mut edited = (*page("main", 8, 0, 0)).clone();
    store.store("sess", page("main", 8, 0, 0))?;
    edited.body = "edited".into();
    store.store("sess", Arc::new(edited))?;
    store.access("sess", Some("main"), ObjectId(9), 0)?;
    assert_eq!(body(&store, 8, Some(0), Some(0))?, Some("edited".into()));
    Ok(())
}

#[test]
fn default_namespace_accepts_none_and_empty() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    store.store("sess", page("", 1, 0, 0))?;
    let via_none = store.get("sess", None, ObjectId(1), Some(0), Some(0))?;
    let via_empty = store.get("sess", Some(""), ObjectId(1), Some(0), Some(0))?;
    assert_eq!(via_none.map(|p| p.body.clone()), Some("/1@0.0".into()));
    assert_eq!(via_empty.map(|p| p.body.clone()), Some("/1@0.0".into()));
    Ok(())
}

#[test]
fn sessions_do_not_see_each_other() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    store.store("a", page("main", 1, 0, 0))?;
    assert!(store.get("b", Some("main"), ObjectId(1), Some(0), Some(0))?.is_none());
    assert!(store.get("a", Some("main"), ObjectId(1), Some(0), Some(0))?.is_some());
    Ok(())
}

#[test]
fn accessed_then_reopen_reads_from_disk() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open(dir.path())?;
        let stored = page("main", 2, 4, 1);
        store.store("sess", Arc::clone(&stored))?;
        store.accessed("sess", &stored)?;
        store.destroy();
    }
    let store = open(dir.path())?;
    assert_eq!(body(&store, 2, Some(4), Some(1))?, Some("main/2@4.1".into()));
    assert_eq!(body(&store, 2, Some(4), None)?, Some("main/2@4.1".into()));
    // Nothing indexes the object after a restart, so "latest" is unknown.
    assert_eq!(body(&store, 2, None, None)?, None);
    Ok(())
}
