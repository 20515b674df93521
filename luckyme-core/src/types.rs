//! Domain types exchanged with the dissemination daemon.
//!
//! Everything here is plain data: serializable with serde so the socket
//! transport can put it on the wire, cloneable so readers always work on
//! their own copy.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Session identifier handed out by the daemon on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Liveness of the daemon process as seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    NotRunning,
    Running,
    /// A pid file exists but no process owns that pid any more.
    Crashed,
    Error,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonStatus::NotRunning => write!(f, "not running"),
            DaemonStatus::Running => write!(f, "running"),
            DaemonStatus::Crashed => write!(f, "crashed"),
            DaemonStatus::Error => write!(f, "error"),
        }
    }
}

/// Tag of an [`Event`]; handlers are registered per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Shutdown,
    NeighborUpdate,
    InterestListUpdate,
    NewDataObject,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Shutdown,
        EventKind::NeighborUpdate,
        EventKind::InterestListUpdate,
        EventKind::NewDataObject,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Shutdown => write!(f, "shutdown"),
            EventKind::NeighborUpdate => write!(f, "neighbor_update"),
            EventKind::InterestListUpdate => write!(f, "interest_list_update"),
            EventKind::NewDataObject => write!(f, "new_data_object"),
        }
    }
}

// ---------------------------------------------------------------------------
// Attributes and nodes
// ---------------------------------------------------------------------------

fn default_weight() -> u64 {
    1
}

/// A weighted `name=value` tag describing content or expressing interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    #[serde(default = "default_weight")]
    pub weight: u64,
}

impl Attribute {
    /// Attribute with the default weight of 1.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::weighted(name, value, default_weight())
    }

    pub fn weighted(name: impl Into<String>, value: impl Into<String>, weight: u64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            weight,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.name, self.value, self.weight)
    }
}

/// One network interface of a neighbor node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInterface {
    /// Interface type, e.g. `ethernet` or `bluetooth`.
    pub kind: String,
    pub identifier: String,
    pub up: bool,
}

/// A device currently reachable by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub interfaces: Vec<NodeInterface>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            interfaces: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Data objects
// ---------------------------------------------------------------------------

/// A unit of content published to, or received from, the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Lowercase hex SHA-256 of the file content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for DataObject {
    fn default() -> Self {
        Self::new()
    }
}

impl DataObject {
    /// An object without file content, stamped with the current time.
    pub fn new() -> Self {
        Self {
            file: None,
            attributes: Vec::new(),
            content_hash: None,
            created_at: Utc::now(),
        }
    }

    /// An object carrying `path`, with the SHA-256 of its bytes attached.
    ///
    /// Fails with [`ClientError::ObjectConstructionFailed`] when the file
    /// cannot be read.
    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let hash = hash_file(path).map_err(|err| ClientError::ObjectConstructionFailed {
            reason: format!("cannot hash {}: {err}", path.display()),
        })?;
        Ok(Self {
            file: Some(path.to_path_buf()),
            content_hash: Some(hash),
            ..Self::new()
        })
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The `n`-th attribute called `name`, in insertion order.
    pub fn attribute(&self, name: &str, n: usize) -> Option<&Attribute> {
        self.attributes.iter().filter(|attr| attr.name == name).nth(n)
    }

    pub fn attributes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Attribute> {
        self.attributes.iter().filter(move |attr| attr.name == name)
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(std::io::Error::other("not a regular file"));
    }
    let mut hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Events and client messages
// ---------------------------------------------------------------------------

/// Asynchronous notification pushed by the daemon to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Shutdown { reason: i32 },
    NeighborUpdate { nodes: Vec<Node> },
    InterestListUpdate { interests: Vec<Attribute> },
    NewDataObject { object: DataObject },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Shutdown { .. } => EventKind::Shutdown,
            Event::NeighborUpdate { .. } => EventKind::NeighborUpdate,
            Event::InterestListUpdate { .. } => EventKind::InterestListUpdate,
            Event::NewDataObject { .. } => EventKind::NewDataObject,
        }
    }
}

/// Message relayed to a bound consumer (usually a UI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "count", rename_all = "snake_case")]
pub enum ClientMessage {
    NeighborUpdate,
    ObjectsSent(u64),
    ObjectsReceived(u64),
    ServiceStarted,
    ServiceStopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn attribute_weight_defaults_to_one() {
        assert_eq!(Attribute::new("LuckyMe", "7").weight, 1);

        let parsed: Attribute =
            serde_json::from_str(r#"{"name":"LuckyMe","value":"7"}"#).expect("parse attribute");
        assert_eq!(parsed.weight, 1);
    }

    #[test]
    fn attribute_lookup_by_name_and_index() {
        let object = DataObject::new()
            .with_attribute(Attribute::new("Picture", "a.jpg"))
            .with_attribute(Attribute::new("LuckyMe", "3"))
            .with_attribute(Attribute::new("LuckyMe", "9"));

        assert_eq!(object.attribute("LuckyMe", 1).map(|a| a.value.as_str()), Some("9"));
        assert!(object.attribute("LuckyMe", 2).is_none());
        assert!(object.attribute("Missing", 0).is_none());
    }

    #[test]
    fn attribute_outlives_the_lookup_name() {
        let object = DataObject::new().with_attribute(Attribute::new("LuckyMe", "4"));
        let found = {
            let name = String::from("LuckyMe");
            object.attribute(&name, 0)
        };
        assert_eq!(found.map(|a| a.value.as_str()), Some("4"));
    }

    #[test]
    fn from_file_attaches_sha256() {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(b"abc").expect("write");

        let object = DataObject::from_file(file.path()).expect("construct");
        assert_eq!(object.file.as_deref(), Some(file.path()));
        assert_eq!(
            object.content_hash.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn from_missing_file_is_construction_failure() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let err = DataObject::from_file(&dir.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, ClientError::ObjectConstructionFailed { .. }), "got: {err}");
    }

    #[test]
    fn event_wire_format_is_tagged() {
        let event = Event::Shutdown { reason: 2 };
        let json = serde_json::to_string(&event).expect("encode");
        assert_eq!(json, r#"{"type":"shutdown","reason":2}"#);
        assert_eq!(event.kind(), EventKind::Shutdown);
    }
}
