#![forbid(unsafe_code)]

//! File-per-record disk layout.
//!
//! Every session owns one directory under the store root; every
//! [`VersionKey`] maps to exactly one file inside it. File names are derived
//! from the key, so no catalog file is needed and deleting an object or a
//! namespace is a prefix match over the directory listing.
//!
//! ```text
//! <root>/<hex(session)>/pm-<hex(namespace)>-p-<id>-v-<version>-s-<sub>.page
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::types::{record_crc32, ObjectId, Result, StoreError, VersionKey};

const RECORD_MAGIC: [u8; 4] = *b"PKP1";
const RECORD_FORMAT_VERSION: u16 = 1;
/// Length of the header preceding every record payload.
pub const RECORD_HEADER_LEN: usize = 16;
const RECORD_EXT: &str = "page";
const TMP_EXT: &str = "tmp";

/// Header written in front of every record payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length in bytes.
    pub payload_len: u32,
    /// [`record_crc32`] of the payload.
    pub payload_crc32: u32,
}

impl RecordHeader {
    fn for_payload(payload: &[u8]) -> Result<Self> {
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| StoreError::Invalid("record too large"))?;
        Ok(Self {
            payload_len,
            payload_crc32: record_crc32(payload),
        })
    }

    fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        buf[0..4].copy_from_slice(&RECORD_MAGIC);
        buf[4..6].copy_from_slice(&RECORD_FORMAT_VERSION.to_be_bytes());
        buf[6..8].fill(0);
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.payload_crc32.to_be_bytes());
        buf
    }

    fn decode(src: &[u8]) -> std::result::Result<Self, RecordError> {
        if src.len() < RECORD_HEADER_LEN {
            return Err(RecordError::Truncated);
        }
        if src[0..4] != RECORD_MAGIC {
            return Err(RecordError::BadMagic);
        }
        let version = u16::from_be_bytes([src[4], src[5]]);
        if version != RECORD_FORMAT_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }
        if src[6..8] != [0, 0] {
            return Err(RecordError::ReservedBytes);
        }
        Ok(Self {
            payload_len: u32::from_be_bytes([src[8], src[9], src[10], src[11]]),
            payload_crc32: u32::from_be_bytes([src[12], src[13], src[14], src[15]]),
        })
    }
}

/// Reasons a record file fails validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// File shorter than its header or declared payload.
    Truncated,
    /// Magic bytes do not match.
    BadMagic,
    /// Unknown record format version.
    UnsupportedVersion(u16),
    /// Reserved header bytes are not zero.
    ReservedBytes,
    /// Payload longer than declared.
    TrailingBytes,
    /// Payload checksum mismatch.
    ChecksumMismatch,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::Truncated => write!(f, "record truncated"),
            RecordError::BadMagic => write!(f, "record magic mismatch"),
            RecordError::UnsupportedVersion(v) => write!(f, "unsupported record version {v}"),
            RecordError::ReservedBytes => write!(f, "reserved header bytes non-zero"),
            RecordError::TrailingBytes => write!(f, "trailing bytes after payload"),
            RecordError::ChecksumMismatch => write!(f, "payload checksum mismatch"),
        }
    }
}

/// Validates a complete record file image and returns its payload.
pub fn decode_record(image: &[u8]) -> std::result::Result<&[u8], RecordError> {
    let header = RecordHeader::decode(image)?;
    let payload = &image[RECORD_HEADER_LEN..];
    let declared = header.payload_len as usize;
    if payload.len() < declared {
        return Err(RecordError::Truncated);
    }
    if payload.len() > declared {
        return Err(RecordError::TrailingBytes);
    }
    if record_crc32(payload) != header.payload_crc32 {
        return Err(RecordError::ChecksumMismatch);
    }
    Ok(payload)
}

/// Identity fields recovered from a record file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordName {
    /// Decoded namespace.
    pub namespace: String,
    /// Object identifier.
    pub object_id: ObjectId,
    /// Full version.
    pub version: u32,
    /// Sub-version.
    pub sub_version: u32,
}

impl RecordName {
    /// Parses a file name produced by [`DiskStore::file_name`].
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{RECORD_EXT}"))?;
        let rest = stem.strip_prefix("pm-")?;
        let (ns_hex, rest) = rest.split_once("-p-")?;
        let (id, rest) = rest.split_once("-v-")?;
        let (version, sub) = rest.split_once("-s-")?;
        let namespace = String::from_utf8(hex::decode(ns_hex).ok()?).ok()?;
        Some(Self {
            namespace,
            object_id: ObjectId(id.parse().ok()?),
            version: version.parse().ok()?,
            sub_version: sub.parse().ok()?,
        })
    }
}

/// Decodes a session directory name back into the session id.
pub fn decode_session_dir(dir_name: &str) -> Option<String> {
    String::from_utf8(hex::decode(dir_name).ok()?).ok()
}

/// Raw byte storage for page records.
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "disk.open");
        Ok(Self { root })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every record of `session_id`.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(hex::encode(session_id))
    }

    /// Deterministic file name for `key`.
    pub fn file_name(key: &VersionKey) -> String {
        format!(
            "{}v-{}-s-{}.{RECORD_EXT}",
            object_prefix(key.namespace(), key.object_id()),
            key.version(),
            key.sub_version()
        )
    }

    /// Full path of the record for `key`.
    pub fn record_path(&self, key: &VersionKey) -> PathBuf {
        self.session_dir(key.session_id()).join(Self::file_name(key))
    }

    /// Writes `payload` as the record for `key`, returning bytes written.
    ///
    /// The record is written to a temporary file and renamed into place, so a
    /// concurrent reader sees either the previous state or the full record.
    pub fn write(&self, key: &VersionKey, payload: &[u8]) -> Result<u64> {
        let dir = self.session_dir(key.session_id());
        fs::create_dir_all(&dir)?;
        let path = dir.join(Self::file_name(key));
        let tmp = path.with_extension(TMP_EXT);
        let header = RecordHeader::for_payload(payload)?;
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&header.encode())?;
            file.write_all(payload)?;
            file.sync_data()?;
        }
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        let written = (RECORD_HEADER_LEN + payload.len()) as u64;
        trace!(key = %key, bytes = written, "disk.write");
        Ok(written)
    }

    /// Reads the payload stored for `key`.
    ///
    /// A missing file or a record failing validation yields `Ok(None)`.
    pub fn read(&self, key: &VersionKey) -> Result<Option<Bytes>> {
        let path = self.record_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut image = Vec::new();
        file.read_to_end(&mut image)?;
        match decode_record(&image) {
            Ok(payload) => {
                trace!(key = %key, bytes = payload.len(), "disk.read");
                Ok(Some(Bytes::copy_from_slice(payload)))
            }
            Err(reason) => {
                warn!(key = %key, %reason, "disk.read.invalid_record");
                Ok(None)
            }
        }
    }

    /// Whether a record file exists for `key`.
    pub fn exists(&self, key: &VersionKey) -> bool {
        self.record_path(key).is_file()
    }

    /// Sub-versions of `(namespace, object_id, version)` present on disk, ascending.
    pub fn sub_versions(
        &self,
        session_id: &str,
        namespace: &str,
        object_id: ObjectId,
        version: u32,
    ) -> Result<Vec<u32>> {
        let mut subs: Vec<u32> = self
            .record_names(session_id)?
            .into_iter()
            .filter(|name| {
                name.namespace == namespace
                    && name.object_id == object_id
                    && name.version == version
            })
            .map(|name| name.sub_version)
            .collect();
        subs.sort_unstable();
        Ok(subs)
    }

    /// Every record name found in the session directory.
    pub fn record_names(&self, session_id: &str) -> Result<Vec<RecordName>> {
        let dir = self.session_dir(session_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str().and_then(RecordName::parse) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Deletes every record of `object_id`.
    pub fn remove_object(&self, session_id: &str, namespace: &str, object_id: ObjectId) -> usize {
        self.remove_prefix(session_id, &object_prefix(namespace, object_id))
    }

    /// Deletes every sub-version of one version of `object_id`.
    pub fn remove_version(
        &self,
        session_id: &str,
        namespace: &str,
        object_id: ObjectId,
        version: u32,
    ) -> usize {
        let prefix = format!("{}v-{version}-", object_prefix(namespace, object_id));
        self.remove_prefix(session_id, &prefix)
    }

    /// Deletes every record in `namespace`.
    pub fn remove_namespace(&self, session_id: &str, namespace: &str) -> usize {
        self.remove_prefix(session_id, &namespace_prefix(namespace))
    }

    /// Deletes the whole session directory. Missing directories are fine.
    pub fn remove_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(session = session_id, "disk.remove_session");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort deletion of files whose name starts with `prefix`.
    fn remove_prefix(&self, session_id: &str, prefix: &str) -> usize {
        let dir = self.session_dir(session_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(session = session_id, error = %err, "disk.remove.list_failed");
                }
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(session = session_id, file = name, error = %err, "disk.remove.failed")
                }
            }
        }
        debug!(session = session_id, prefix, removed, "disk.remove_prefix");
        removed
    }
}

fn namespace_prefix(namespace: &str) -> String {
    format!("pm-{}-", hex::encode(namespace))
}

fn object_prefix(namespace: &str, object_id: ObjectId) -> String {
    format!("{}p-{}-", namespace_prefix(namespace), object_id.0)
}
