#![allow(missing_docs)]

mod common;

use std::fs;
use std::sync::Arc;

use common::{open, page};
use pagekeep::primitives::io::{decode_record, DiskStore, RecordName, RECORD_HEADER_LEN};
use pagekeep::{ObjectId, Result, VersionKey};
use tempfile::tempdir;

#[test]
fn file_names_follow_the_documented_layout() -> Result<()> {
    let key = VersionKey::new("sess-1", Some("main"), ObjectId(42), 3, 1);
    assert_eq!(
        DiskStore::file_name(&key),
        format!("pm-{}-p-42-v-3-s-1.page", hex::encode("main"))
    );
    let default_ns = VersionKey::new("sess-1", None, ObjectId(1), 0, 0);
    assert_eq!(DiskStore::file_name(&default_ns), "pm--p-1-v-0-s-0.page");

    let parsed = RecordName::parse(&DiskStore::file_name(&key)).expect("parse");
    assert_eq!(parsed.namespace, "main");
    assert_eq!(parsed.object_id, ObjectId(42));
    assert_eq!((parsed.version, parsed.sub_version), (3, 1));
    Ok(())
}

#[test]
fn each_version_gets_its_own_file_written_once() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let pages = [
        page("main", 1, 0, 0),
        page("main", 1, 0, 1),
        page("main", 1, 1, 0),
    ];
    for stored in &pages {
        store.store("sess", Arc::clone(stored))?;
        store.accessed("sess", stored)?;
    }
    // Reads after persistence must not trigger rewrites.
    for stored in &pages {
        let _ = store.get("sess", Some("main"), ObjectId(1), Some(stored.version), Some(stored.sub))?;
    }
    store.destroy();
    assert_eq!(store.stats().pipeline.records_saved, 3);

    let disk = DiskStore::open(dir.path())?;
    for stored in &pages {
        let key = VersionKey::new("sess", Some("main"), ObjectId(1), stored.version, stored.sub);
        let path = disk.record_path(&key);
        assert_eq!(path.parent(), Some(disk.session_dir("sess").as_path()));
        let image = fs::read(&path)?;
        assert!(image.len() > RECORD_HEADER_LEN);
        let payload = decode_record(&image).expect("valid record");
        let decoded: common::Page = serde_json::from_slice(payload).expect("json");
        assert_eq!(decoded, **stored);
    }
    let session_dir = disk.session_dir("sess");
    assert_eq!(session_dir.file_name().and_then(|n| n.to_str()), Some(&*hex::encode("sess")));
    Ok(())
}

#[test]
fn corrupt_or_truncated_records_read_as_missing() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open(dir.path())?;
        store.store("sess", page("main", 1, 0, 0))?;
        store.store("sess", page("main", 2, 0, 0))?;
        store.destroy();
    }
    let disk = DiskStore::open(dir.path())?;
    let first = disk.record_path(&VersionKey::new("sess", Some("main"), ObjectId(1), 0, 0));
    let mut image = fs::read(&first)?;
    image[RECORD_HEADER_LEN] ^= 0x55;
    fs::write(&first, image)?;
    let second = disk.record_path(&VersionKey::new("sess", Some("main"), ObjectId(2), 0, 0));
    let image = fs::read(&second)?;
    fs::write(&second, &image[..RECORD_HEADER_LEN + 1])?;

    let store = open(dir.path())?;
    assert!(store
        .get("sess", Some("main"), ObjectId(1), Some(0), Some(0))?
        .is_none());
    assert!(store
        .get("sess", Some("main"), ObjectId(2), Some(0), Some(0))?
        .is_none());
    Ok(())
}

#[test]
fn session_ids_with_path_characters_stay_inside_the_root() -> Result<()> {
    let dir = tempdir()?;
    let store = open(dir.path())?;
    let hostile = "../../etc/passwd";
    store.store(hostile, page("main", 1, 0, 0))?;
    store.destroy();
    let disk = DiskStore::open(dir.path())?;
    let session_dir = disk.session_dir(hostile);
    assert!(session_dir.starts_with(dir.path()));
    assert_eq!(disk.record_names(hostile)?.len(), 1);
    Ok(())
}
