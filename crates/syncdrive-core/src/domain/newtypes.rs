//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for domain identifiers and values. Each newtype
//! validates its invariants at construction time so malformed values cannot
//! travel through the engine's pure functions.

use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

/// A generic unique identifier wrapper around UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(Uuid);

impl UniqueId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Deterministically derive a `UniqueId` from a provider item id, so
    /// audit entries for the same remote item always correlate under the
    /// same key without the store having to track a second identifier.
    #[must_use]
    pub fn from_item_id(item_id: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, item_id.as_bytes()))
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for UniqueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniqueId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid UUID: {e}")))
    }
}

impl From<Uuid> for UniqueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for ConflictRecord entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ConflictId: {e}")))
    }
}

impl From<Uuid> for ConflictId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for SyncSession entities (one per engine cycle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CycleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CycleId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid CycleId: {e}")))
    }
}

impl From<Uuid> for CycleId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for audit log entries (database row ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(i64);

impl AuditId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for AuditId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid AuditId: {e}")))
    }
}

impl From<i64> for AuditId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Path type
// ============================================================================

/// A forward-slash relative path from the sync root.
///
/// Each segment is NFC-normalized Unicode. The empty string denotes the
/// root itself. Paths are case-preserving but compared byte-for-byte as
/// stored; the remote drive service is case-insensitive, which callers must
/// account for separately (see the planner's path-view construction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncPath(String);

impl SyncPath {
    /// Create a new `SyncPath`, NFC-normalizing each segment.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is absolute, contains
    /// `.`/`..` components, or has empty interior segments.
    pub fn new(path: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = path.as_ref();
        if raw.is_empty() {
            return Ok(Self(String::new()));
        }
        if raw.starts_with('/') || raw.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative and have no trailing slash: {raw}"
            )));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains an empty segment: {raw}"
                    )))
                }
                "." | ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains a traversal segment: {raw}"
                    )))
                }
                s => segments.push(s.nfc().collect::<String>()),
            }
        }

        Ok(Self(segments.join("/")))
    }

    /// The root path (empty string).
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a single NFC-normalized segment under this path.
    ///
    /// # Errors
    /// Returns an error if the segment itself is invalid.
    pub fn join(&self, segment: &str) -> Result<Self, DomainError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path segment: {segment}"
            )));
        }
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// The parent path, or `None` if this is the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The final path segment (file or directory name).
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    /// True if `other` is this path or a descendant of it (used by the
    /// folder-delete-cascade and child-delete dependency rule).
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.0.is_empty() {
            return !other.0.is_empty();
        }
        other.0.starts_with(self.0.as_str())
            && other.0.as_bytes().get(self.0.len()) == Some(&b'/')
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SyncPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SyncPath> for String {
    fn from(path: SyncPath) -> Self {
        path.0
    }
}

// ============================================================================
// Remote identity types
// ============================================================================

/// A drive identifier, canonicalized to lowercase hex zero-padded to 16
/// characters for same-drive items. Case is preserved verbatim for items
/// belonging to a foreign (shared) drive; callers distinguish the two by
/// comparing against the account's own canonical drive id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveId(String);

impl DriveId {
    /// Create a `DriveId` from a raw server value without canonicalizing it.
    /// Use [`DriveId::canonical`] to build the caller's own canonical drive id.
    ///
    /// # Errors
    /// Returns an error if the value is empty.
    pub fn new(raw: String) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::InvalidId("Drive ID cannot be empty".into()));
        }
        Ok(Self(raw))
    }

    /// Build the canonical representation: lowercase hex, zero-padded to 16
    /// characters. Non-hex input is lowercased and left unpadded.
    ///
    /// # Errors
    /// Returns an error if `raw` is empty.
    pub fn canonical(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::InvalidId("Drive ID cannot be empty".into()));
        }
        let lower = raw.to_lowercase();
        if lower.chars().all(|c| c.is_ascii_hexdigit()) && lower.len() <= 16 {
            Ok(Self(format!("{lower:0>16}")))
        } else {
            Ok(Self(lower))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DriveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DriveId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DriveId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DriveId> for String {
    fn from(id: DriveId) -> Self {
        id.0
    }
}

/// An opaque server-assigned item identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// # Errors
    /// Returns an error if `id` is empty.
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidId("Item ID cannot be empty".into()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// The remote service's change-sequence tag for an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ETag(String);

impl ETag {
    /// # Errors
    /// Returns an error if `tag` is empty.
    pub fn new(tag: String) -> Result<Self, DomainError> {
        if tag.is_empty() {
            return Err(DomainError::InvalidId("ETag cannot be empty".into()));
        }
        Ok(Self(tag))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ETag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ETag {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ETag> for String {
    fn from(tag: ETag) -> Self {
        tag.0
    }
}

/// The remote service's folder-content-sequence tag (changes only when a
/// folder's children change, not on metadata-only edits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CTag(String);

impl CTag {
    /// # Errors
    /// Returns an error if `tag` is empty.
    pub fn new(tag: String) -> Result<Self, DomainError> {
        if tag.is_empty() {
            return Err(DomainError::InvalidId("CTag cannot be empty".into()));
        }
        Ok(Self(tag))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CTag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for CTag {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CTag> for String {
    fn from(tag: CTag) -> Self {
        tag.0
    }
}

/// A content hash in the remote service's Base64-encoded 20-byte format
/// (quickXorHash). Treated as an opaque byte producer by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    const EXPECTED_DECODED_LEN: usize = 20;

    /// # Errors
    /// Returns an error if the hash is not valid Base64 or is the wrong length.
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }

        if !hash
            .chars()
            .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
        {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not valid Base64: {hash}"
            )));
        }

        let decoded_len = Self::base64_decoded_len(&hash);
        if decoded_len != Self::EXPECTED_DECODED_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} bytes, got {} bytes",
                Self::EXPECTED_DECODED_LEN,
                decoded_len
            )));
        }

        Ok(Self(hash))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn base64_decoded_len(s: &str) -> usize {
        let len = s.len();
        let padding = s.chars().rev().take_while(|&c| c == '=').count();
        (len * 3 / 4).saturating_sub(padding)
    }
}

impl Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

/// An opaque delta-feed continuation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeltaToken(String);

impl DeltaToken {
    /// # Errors
    /// Returns an error if the token is empty.
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidDeltaToken(
                "Delta token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeltaToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeltaToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DeltaToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DeltaToken> for String {
    fn from(token: DeltaToken) -> Self {
        token.0
    }
}

// ============================================================================
// Email type
// ============================================================================

/// Validated email address (RFC 5322 basic validation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// # Errors
    /// Returns an error if the email format is invalid.
    pub fn new(email: String) -> Result<Self, DomainError> {
        Self::validate(&email)?;
        Ok(Self(email.to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or("")
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or("")
    }

    fn validate(email: &str) -> Result<(), DomainError> {
        if email.is_empty() {
            return Err(DomainError::InvalidEmail(
                "Email cannot be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() != 2 {
            return Err(DomainError::InvalidEmail(format!(
                "Email must contain exactly one '@': {email}"
            )));
        }

        let local = parts[0];
        let domain = parts[1];

        if local.is_empty() {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part cannot be empty: {email}"
            )));
        }
        if local.len() > 64 {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part too long (max 64 chars): {email}"
            )));
        }
        if !local
            .chars()
            .all(|c| c.is_alphanumeric() || ".+-_".contains(c))
        {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part contains invalid characters: {email}"
            )));
        }

        if domain.is_empty() {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain cannot be empty: {email}"
            )));
        }
        if domain.len() > 255 {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain too long (max 255 chars): {email}"
            )));
        }
        if !domain.contains('.') {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain must contain at least one dot: {email}"
            )));
        }
        if !domain
            .chars()
            .all(|c| c.is_alphanumeric() || ".-".contains(c))
        {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain contains invalid characters: {email}"
            )));
        }
        for label in domain.split('.') {
            if label.is_empty() {
                return Err(DomainError::InvalidEmail(format!(
                    "Email domain contains empty label: {email}"
                )));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(DomainError::InvalidEmail(format!(
                    "Email domain label cannot start or end with hyphen: {email}"
                )));
            }
        }

        Ok(())
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Email {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl Hash for Email {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

// ============================================================================
// Tests
// ============================================================================
