use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub type UserId = Uuid;
/// Lowercase hex SHA-256 digest of the artwork's bytes.
pub type ArtworkId = String;

/// Server clock, truncated to the microsecond precision Postgres stores so
/// timestamps handed to clients compare equal when they come back as cursors.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Whether `id` has the shape of a content hash (64 lowercase hex chars).
pub fn is_content_hash(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub alias: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub enum ArtworkType {
    #[default]
    Painting,
    Drawing,
    Sculpture,
    Architecture,
    Photograph,
}

impl ArtworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkType::Painting => "Painting",
            ArtworkType::Drawing => "Drawing",
            ArtworkType::Sculpture => "Sculpture",
            ArtworkType::Architecture => "Architecture",
            ArtworkType::Photograph => "Photograph",
        }
    }
}

impl FromStr for ArtworkType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Painting" => Ok(ArtworkType::Painting),
            "Drawing" => Ok(ArtworkType::Drawing),
            "Sculpture" => Ok(ArtworkType::Sculpture),
            "Architecture" => Ok(ArtworkType::Architecture),
            "Photograph" => Ok(ArtworkType::Photograph),
            other => Err(ParseEnumError { kind: "artwork type", value: other.to_string() }),
        }
    }
}

/// Binary formats accepted for upload, detected from the payload itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
    Webp,
}

impl ImageFormat {
    pub const ACCEPTED_MIME: [&'static str; 3] = ["image/jpeg", "image/png", "image/webp"];

    /// File extension, also the value stored in the catalog.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" => Some(ImageFormat::Jpg),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "png" => Ok(ImageFormat::Png),
            "jpg" => Ok(ImageFormat::Jpg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(ParseEnumError { kind: "image format", value: other.to_string() }),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Perplexed,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "Like",
            ReactionKind::Perplexed => "Perplexed",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Like" => Ok(ReactionKind::Like),
            "Perplexed" => Ok(ReactionKind::Perplexed),
            other => Err(ParseEnumError { kind: "reaction", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artwork {
    pub id: ArtworkId,
    pub author_id: UserId,
    pub kind: ArtworkType,
    pub format: ImageFormat,
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub location: Option<String>,
    pub created: Option<DateTime<Utc>>, // author's estimate, not server time
    pub added: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct NewArtwork {
    pub id: ArtworkId,
    pub author_id: UserId,
    pub kind: ArtworkType,
    pub format: ImageFormat,
    pub title: Option<String>,
    pub added: DateTime<Utc>,
}

/// Owner edits; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ArtworkPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub location: Option<String>,
    #[serde(rename = "Type")]
    pub kind: Option<ArtworkType>,
    pub created: Option<DateTime<Utc>>,
}

impl ArtworkPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self { title: Some(title.into()), ..Default::default() }
    }

    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.year.is_none()
            && self.location.is_none()
            && self.kind.is_none()
            && self.created.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("Nothing to update".into());
        }
        if let Some(title) = &self.title {
            let len = title.trim().chars().count();
            if len == 0 || len > 250 {
                return Err("Title must be between 1 and 250 characters".into());
            }
        }
        if let Some(desc) = &self.description {
            if desc.chars().count() > 3000 {
                return Err("Description must not exceed 3000 characters".into());
            }
        }
        if let Some(year) = self.year {
            if !(-10000..=10000).contains(&year) {
                return Err("Year must lie between -10000 and 10000".into());
            }
        }
        Ok(())
    }
}

/// Catalog row plus feedback counters, as read by listings.
#[derive(Debug, Clone)]
pub struct ArtworkEntry {
    pub artwork: Artwork,
    pub comments: i64,
    pub reactions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub artwork_id: ArtworkId,
    pub author_id: UserId,
    pub text: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reaction {
    pub artwork_id: ArtworkId,
    pub user_id: UserId,
    pub kind: ReactionKind,
    pub date: DateTime<Utc>,
}

/// Result of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed(DateTime<Utc>),
    Unchanged,
}

// ---------------- API shapes ----------------

pub const COMMENT_MIN_CHARS: usize = 10;
pub const COMMENT_MAX_CHARS: usize = 3000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ArtworkSummary {
    pub id: ArtworkId,
    pub title: Option<String>,
    pub author_alias: String,
    pub author_name: String,
    pub format: ImageFormat,
    pub added: DateTime<Utc>,
    pub comments: i64,
    pub reactions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ArtworkDetail {
    pub id: ArtworkId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub location: Option<String>,
    #[serde(rename = "Type")]
    pub kind: ArtworkType,
    pub format: ImageFormat,
    pub created: Option<DateTime<Utc>>,
    pub added: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub author_alias: String,
    pub author_name: String,
    pub comments: i64,
    pub reactions: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Stream {
    pub artworks: Vec<ArtworkSummary>,
    pub new_artworks: Vec<ArtworkSummary>,
    pub deleted_ids: Vec<ArtworkId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorArtworks {
    pub artworks: Vec<ArtworkSummary>,
    pub new_artworks: Vec<ArtworkSummary>,
    pub deleted_ids: Vec<ArtworkId>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct CommentView {
    pub id: Uuid,
    pub author_alias: String,
    pub author_name: String,
    pub comment: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ReactionView {
    pub author_alias: String,
    pub author_name: String,
    pub reaction: ReactionKind,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SetReactionRequest {
    pub reaction: ReactionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AddCommentRequest {
    pub comment: String,
}

impl AddCommentRequest {
    pub fn validate(&self) -> Result<(), String> {
        let len = self.comment.chars().count();
        if !(COMMENT_MIN_CHARS..=COMMENT_MAX_CHARS).contains(&len) {
            return Err(format!(
                "Comment must be between {COMMENT_MIN_CHARS} and {COMMENT_MAX_CHARS} characters"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SetTitleRequest {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PublishResponse {
    pub id: ArtworkId,
    pub updated: DateTime<Utc>,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ReactionStatus {
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl From<Change> for ReactionStatus {
    fn from(c: Change) -> Self {
        match c {
            Change::Changed(date) => ReactionStatus { status: ChangeStatus::Changed, date: Some(date) },
            Change::Unchanged => ReactionStatus { status: ChangeStatus::Unchanged, date: None },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct CommentCreated {
    pub id: Uuid,
    pub date: DateTime<Utc>,
}
