use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::error::require_root;
use crate::admin::Result;
use crate::primitives::io::{decode_session_dir, RecordName};

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub root: String,
    pub session_count: usize,
    pub record_count: u64,
    pub size_bytes: u64,
    pub unrecognized_entries: u64,
    pub sessions: Vec<SessionStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub record_count: u64,
    pub size_bytes: u64,
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceStats {
    pub objects: usize,
    pub record_count: u64,
    pub size_bytes: u64,
    pub newest_version: u32,
}

/// Summarises what a store keeps on disk under `root`.
pub fn stats(root: impl AsRef<Path>) -> Result<StatsReport> {
    let root = root.as_ref();
    require_root(root)?;
    let mut sessions = Vec::new();
    let mut unrecognized = 0u64;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let dir_name = entry.file_name();
        let session_id = match dir_name.to_str().and_then(decode_session_dir) {
            Some(id) if entry.file_type()?.is_dir() => id,
            _ => {
                unrecognized += 1;
                continue;
            }
        };
        let (session, stray) = session_stats(&entry.path(), session_id)?;
        unrecognized += stray;
        sessions.push(session);
    }
    sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));

    Ok(StatsReport {
        root: root.display().to_string(),
        session_count: sessions.len(),
        record_count: sessions.iter().map(|s| s.record_count).sum(),
        size_bytes: sessions.iter().map(|s| s.size_bytes).sum(),
        unrecognized_entries: unrecognized,
        sessions,
    })
}

fn session_stats(dir: &Path, session_id: String) -> Result<(SessionStats, u64)> {
    let mut namespaces: BTreeMap<String, NamespaceStats> = BTreeMap::new();
    let mut objects: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    let mut stray = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().and_then(RecordName::parse) else {
            stray += 1;
            continue;
        };
        let size = entry.metadata()?.len();
        let ns = namespaces.entry(name.namespace.clone()).or_default();
        ns.record_count += 1;
        ns.size_bytes += size;
        ns.newest_version = ns.newest_version.max(name.version);
        let ids = objects.entry(name.namespace).or_default();
        if !ids.contains(&name.object_id.0) {
            ids.push(name.object_id.0);
        }
    }
    for (namespace, ids) in objects {
        if let Some(ns) = namespaces.get_mut(&namespace) {
            ns.objects = ids.len();
        }
    }
    let session = SessionStats {
        session_id,
        record_count: namespaces.values().map(|ns| ns.record_count).sum(),
        size_bytes: namespaces.values().map(|ns| ns.size_bytes).sum(),
        namespaces,
    };
    Ok((session, stray))
}
