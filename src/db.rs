mod schema;

pub use schema::Database;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access to all resources.
    Admin,
    /// Regular author/reader account.
    User,
}

impl Role {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Unique username.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// User role.
    pub role: Role,
    /// Public profile description.
    pub description: Option<String>,
    /// Avatar asset path.
    pub avatar_path: Option<String>,
    /// Twitter profile URL.
    pub twitter: Option<String>,
    /// Facebook profile URL.
    pub facebook: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Authored book, container for chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Book ID.
    pub id: String,
    /// Owning author's user ID.
    pub user_id: String,
    /// Book title.
    pub title: String,
    /// Unique URL slug derived from the title.
    pub slug: String,
    /// Back-cover description.
    pub description: String,
    /// Category (closed enum, stored as text).
    pub category: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Cover asset path.
    pub cover_path: Option<String>,
    /// Whether the book is visible to readers.
    pub is_published: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Chapter of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter ID.
    pub id: String,
    /// Parent book ID.
    pub book_id: String,
    /// Owning author's user ID (same as the parent book's).
    pub user_id: String,
    /// Chapter title.
    pub title: String,
    /// Unique URL slug derived from the title.
    pub slug: String,
    /// Author-assigned position in the book.
    pub chapter_order: i64,
    /// Chapter body (rich text).
    pub content: String,
    /// Whether the chapter is visible to readers.
    pub is_published: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Reader rating for a book. At most one per (user, book) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    /// Rating user ID.
    pub user_id: String,
    /// Rated book ID.
    pub book_id: String,
    /// Rating value in 0..=5.
    pub rate: i64,
}

/// Saved reading position. At most one per (user, chapter) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    /// User ID.
    pub user_id: String,
    /// Chapter ID.
    pub chapter_id: String,
    /// Parent book ID.
    pub book_id: String,
    /// Last-read position within the chapter.
    pub position: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Ephemeral password recovery record. At most one live per user.
#[derive(Debug, Clone)]
pub struct RecoveryToken {
    /// Record ID (used in the reset link).
    pub id: String,
    /// User ID.
    pub user_id: String,
    /// Random verification token.
    pub token: String,
    /// Expiration timestamp.
    pub expires_at: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
