//! Core types for bundle-mirror

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Platform tag of a downloadable artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    /// Android packages
    Android,
    /// Soundtracks and other audio
    Audio,
    /// Books and comics
    Ebook,
    /// Linux builds
    Linux,
    /// macOS builds
    Mac,
    /// Windows builds
    Windows,
    /// Anything the catalog reports outside the known set
    Other,
}

impl Platform {
    /// All platform tags, in display order
    pub const ALL: [Platform; 7] = [
        Platform::Android,
        Platform::Audio,
        Platform::Ebook,
        Platform::Linux,
        Platform::Mac,
        Platform::Windows,
        Platform::Other,
    ];

    /// Lowercase tag used in paths and records
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Audio => "audio",
            Platform::Ebook => "ebook",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Other => "other",
        }
    }

    /// Map an upstream platform string; unknown strings become [`Platform::Other`]
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "android" => Platform::Android,
            "audio" => Platform::Audio,
            "ebook" => Platform::Ebook,
            "linux" => Platform::Linux,
            "mac" => Platform::Mac,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        }
    }

    /// Whether this platform carries game builds (excluded by `nogames`)
    pub fn is_game(&self) -> bool {
        matches!(
            self,
            Platform::Linux | Platform::Mac | Platform::Windows | Platform::Android
        )
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Platform::from_tag(&tag))
    }
}

/// Platform filter as given on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformSelector {
    /// A single literal platform
    Only(Platform),
    /// Every platform observed in the catalog
    All,
    /// Every observed platform except game builds
    NoGames,
}

/// Error for an unrecognized platform selector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}', expected one of android, audio, ebook, linux, mac, windows, other, all, nogames")]
pub struct UnknownPlatform(pub String);

impl std::str::FromStr for PlatformSelector {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(PlatformSelector::All),
            "nogames" => Ok(PlatformSelector::NoGames),
            other => Platform::ALL
                .iter()
                .find(|p| p.as_str() == other)
                .map(|p| PlatformSelector::Only(*p))
                .ok_or_else(|| UnknownPlatform(s.to_string())),
        }
    }
}

/// Identity of an artifact: content hash plus byte size
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// Lowercase hex MD5 of the file contents
    pub md5: String,
    /// Exact byte size
    pub size: u64,
}

impl ItemKey {
    /// Create a key, normalizing the hash to lowercase
    pub fn new(md5: impl Into<String>, size: u64) -> Self {
        Self {
            md5: md5.into().to_ascii_lowercase(),
            size,
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.md5, self.size)
    }
}

/// One downloadable artifact.
///
/// Equality and hashing look at the [`ItemKey`] only, so the same file listed
/// under two orders (or two platforms) collapses into one set entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    #[serde(flatten)]
    key: ItemKey,
    /// Display name of the product
    pub name: String,
    /// Upstream machine-readable download identifier
    #[serde(default)]
    pub machine_name: String,
    /// Platform tag
    pub platform: Platform,
    /// Source URL (signed, may carry a query string)
    pub url: String,
    /// Display name of the owning order
    pub bundle_name: String,
    /// Timestamp of the owning order
    pub date: NaiveDateTime,
    /// Set once the on-disk file has been checked against the key
    #[serde(default)]
    pub verified: bool,
}

/// Field set used to construct an [`Item`]
#[derive(Clone, Debug)]
pub struct NewItem {
    /// Lowercase hex MD5
    pub md5: String,
    /// Byte size
    pub size: u64,
    /// Display name of the product
    pub name: String,
    /// Upstream machine-readable download identifier
    pub machine_name: String,
    /// Platform tag
    pub platform: Platform,
    /// Source URL
    pub url: String,
    /// Display name of the owning order
    pub bundle_name: String,
    /// Timestamp of the owning order
    pub date: NaiveDateTime,
}

impl From<NewItem> for Item {
    fn from(new: NewItem) -> Self {
        Self {
            key: ItemKey::new(new.md5, new.size),
            name: new.name,
            machine_name: new.machine_name,
            platform: new.platform,
            url: new.url,
            bundle_name: new.bundle_name,
            date: new.date,
            verified: false,
        }
    }
}

impl Item {
    /// Identity key
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    /// Expected MD5
    pub fn md5(&self) -> &str {
        &self.key.md5
    }

    /// Expected byte size
    pub fn size(&self) -> u64 {
        self.key.size
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Unique identifier of a purchase order
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One purchase transaction
#[derive(Clone, Debug)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Display name
    pub name: String,
    /// Purchase timestamp; the ordering key for the purchase window
    pub date: NaiveDateTime,
    /// Items in listing order, deduplicated by key
    pub items: Vec<Item>,
}

/// Per-item pipeline state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    /// Not started
    Pending,
    /// Hashing an existing local file
    VerifyingLocal,
    /// Transfer in progress
    Fetching,
    /// Checking the received bytes
    VerifyingDownload,
    /// File present and verified
    Satisfied,
    /// Gave up on this item for this run
    Failed,
}

/// Progress and outcome events emitted during a run
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Order identifiers were listed
    OrdersListed {
        /// Number of orders
        count: usize,
    },
    /// One order's metadata arrived
    OrderFetched {
        /// Orders fetched so far
        done: usize,
        /// Total orders
        total: usize,
    },
    /// One order was skipped because its metadata could not be used
    OrderSkipped {
        /// The order
        id: OrderId,
        /// Why
        error: String,
    },
    /// A local file already matched, no transfer needed
    ItemSatisfied {
        /// Product name
        name: String,
        /// Target path
        path: PathBuf,
    },
    /// A file was transferred and verified
    ItemFetched {
        /// Product name
        name: String,
        /// Target path
        path: PathBuf,
        /// Bytes written
        size: u64,
    },
    /// An item failed for this run
    ItemFailed {
        /// Product name
        name: String,
        /// Failure description
        error: String,
    },
    /// An orphaned file was moved out of the mirror
    OrphanRelocated {
        /// Previous location
        from: PathBuf,
        /// New location
        to: PathBuf,
    },
    /// Periodic byte progress
    Progress {
        /// Bytes accounted for so far
        fetched_bytes: u64,
        /// Bytes in the to-fetch set
        total_bytes: u64,
    },
}
