#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use pagekeep::{JsonSerializer, ObjectId, SessionPageStore, StoreOptions, VersionedObject};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub namespace: String,
    pub id: u32,
    pub version: u32,
    pub sub: u32,
    pub body: String,
}

impl VersionedObject for Page {
    fn namespace(&self) -> &str {
        &self.namespace
    }
    fn object_id(&self) -> ObjectId {
        ObjectId(self.id)
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn sub_version(&self) -> u32 {
        self.sub
    }
}

pub fn page(namespace: &str, id: u32, version: u32, sub: u32) -> Arc<Page> {
    Arc::new(Page {
        namespace: namespace.to_owned(),
        id,
        version,
        sub,
        body: format!("{namespace}/{id}@{version}.{sub}"),
    })
}

pub fn options(root: &Path) -> StoreOptions {
    StoreOptions::new(root).idle_interval(Duration::from_millis(10))
}

pub fn open(root: &Path) -> pagekeep::Result<SessionPageStore<Page>> {
    init_tracing();
    SessionPageStore::open(options(root), JsonSerializer::new())
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Polls `condition` until it holds or `limit` elapses.
pub fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
