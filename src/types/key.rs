#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identifier of a view object inside a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps an absent namespace onto the empty one so both compare equal.
pub fn normalize_namespace(namespace: Option<&str>) -> &str {
    namespace.unwrap_or("")
}

/// Identity of one persisted object version.
///
/// Equality and hashing cover `session_id`, `namespace`, `object_id`,
/// `version` and `sub_version`. The type name is carried for diagnostics only.
#[derive(Clone, Debug)]
pub struct VersionKey {
    session_id: String,
    namespace: String,
    object_id: ObjectId,
    version: u32,
    sub_version: u32,
    type_name: Option<String>,
}

impl VersionKey {
    /// Builds a key. `None` and `Some("")` namespaces are the same namespace.
    pub fn new(
        session_id: impl Into<String>,
        namespace: Option<&str>,
        object_id: ObjectId,
        version: u32,
        sub_version: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            namespace: normalize_namespace(namespace).to_owned(),
            object_id,
            version,
            sub_version,
            type_name: None,
        }
    }

    /// Attaches a diagnostic type name.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Owning session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Namespace, empty for the default namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Object identifier.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Full version number.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Sub-version within `version`.
    pub fn sub_version(&self) -> u32 {
        self.sub_version
    }

    /// Diagnostic type name, if one was attached.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// `(version, sub_version)` pair, ordered by allocation time.
    pub fn revision(&self) -> (u32, u32) {
        (self.version, self.sub_version)
    }

    /// True when both keys name the same object, ignoring versions.
    pub fn same_object(&self, other: &VersionKey) -> bool {
        self.object_id == other.object_id
            && self.namespace == other.namespace
            && self.session_id == other.session_id
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
            && self.version == other.version
            && self.sub_version == other.sub_version
            && self.namespace == other.namespace
            && self.session_id == other.session_id
    }
}

impl Eq for VersionKey {}

impl Hash for VersionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
        self.version.hash(state);
        self.sub_version.hash(state);
        self.namespace.hash(state);
        self.session_id.hash(state);
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}#{}@{}.{}",
            self.session_id, self.namespace, self.object_id, self.version, self.sub_version
        )?;
        if let Some(type_name) = &self.type_name {
            write!(f, " ({type_name})")?;
        }
        Ok(())
    }
}
