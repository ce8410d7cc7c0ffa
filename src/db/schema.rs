use crate::catalog::{
    AuthorSummary, BookDetail, BookQuery, BookSummary, ChapterSummary, OwnBook, ProfileBook,
    UserProfile, UserSummary,
};
use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                description TEXT,
                avatar_path TEXT,
                twitter TEXT,
                facebook TEXT,
                created_at INTEGER NOT NULL
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                tags_json TEXT,
                cover_path TEXT,
                is_published INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            -- Tag index used by catalog filters
            CREATE TABLE IF NOT EXISTS book_tags (
                book_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (book_id, tag),
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            -- Chapters table
            CREATE TABLE IF NOT EXISTS chapters (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                chapter_order INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_published INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            -- Ratings: one per (user, book) by primary key
            CREATE TABLE IF NOT EXISTS ratings (
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                rate INTEGER NOT NULL DEFAULT 3 CHECK (rate BETWEEN 0 AND 5),
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            -- Favorites: set membership per (user, book)
            CREATE TABLE IF NOT EXISTS favorites (
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            -- Bookmarks: one reading position per (user, chapter)
            CREATE TABLE IF NOT EXISTS bookmarks (
                user_id TEXT NOT NULL,
                chapter_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, chapter_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (chapter_id) REFERENCES chapters(id)
            );

            -- Recovery tokens: one live record per user
            CREATE TABLE IF NOT EXISTS recovery_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT UNIQUE NOT NULL,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id);
            CREATE INDEX IF NOT EXISTS idx_books_published ON books(is_published);
            CREATE INDEX IF NOT EXISTS idx_chapters_book ON chapters(book_id);
            CREATE INDEX IF NOT EXISTS idx_ratings_book ON ratings(book_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Map a unique-constraint violation to a user-facing error.
    fn map_unique(e: rusqlite::Error, what: &str) -> AppError {
        let msg = e.to_string();
        if msg.contains("UNIQUE constraint") {
            if msg.contains("users.email") {
                AppError::BadRequest("Email already in use".to_string())
            } else if msg.contains("users.username") {
                AppError::BadRequest("Username already taken".to_string())
            } else if msg.contains(".slug") {
                AppError::BadRequest("Slug already in use, try again".to_string())
            } else {
                AppError::BadRequest(format!("{} already exists", what))
            }
        } else if msg.contains("CHECK constraint") {
            AppError::BadRequest(format!("Invalid value for {}", what))
        } else {
            AppError::Internal(format!("Failed to save {}: {}", what, msg))
        }
    }

    // ========== USER OPERATIONS ==========

    /// Register a new user.
    ///
    /// The first user ever created becomes admin. The count check and the
    /// insert run under the same connection lock so two racing registrations
    /// cannot both observe an empty table.
    pub fn register_user(&self, user: &mut User) -> Result<()> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to count users: {}", e)))?;

        if count == 0 {
            user.role = Role::Admin;
        }

        Self::insert_user(&conn, user)
    }

    /// Create a user with an explicit role (CLI / tests).
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        Self::insert_user(&conn, user)
    }

    fn insert_user(conn: &Connection, user: &User) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, description,
                                avatar_path, twitter, facebook, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.description,
                user.avatar_path,
                user.twitter,
                user.facebook,
                user.created_at,
            ],
        )
        .map_err(|e| Self::map_unique(e, "user"))?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        let role: String = row.get(4)?;
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: Role::from_str_opt(&role).unwrap_or(Role::User),
            description: row.get(5)?,
            avatar_path: row.get(6)?,
            twitter: row.get(7)?,
            facebook: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    const USER_COLUMNS: &'static str = "id, username, email, password_hash, role, description,
                                        avatar_path, twitter, facebook, created_at";

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::USER_COLUMNS),
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM users WHERE username = ?1",
                Self::USER_COLUMNS
            ),
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", Self::USER_COLUMNS),
            params![email],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users (projection only).
    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, username, email, role FROM users ORDER BY username")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], |row| {
                let role: String = row.get(3)?;
                Ok(UserSummary {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    role: Role::from_str_opt(&role).unwrap_or(Role::User),
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user profile fields and credential.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, description = ?4,
                              twitter = ?5, facebook = ?6
             WHERE id = ?7",
            params![
                user.username,
                user.email,
                user.password_hash,
                user.description,
                user.twitter,
                user.facebook,
                user.id,
            ],
        )
        .map_err(|e| Self::map_unique(e, "user"))?;
        Ok(())
    }

    /// Update user password by user ID.
    pub fn update_user_password(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user avatar path.
    pub fn update_user_avatar(&self, user_id: &str, avatar_path: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET avatar_path = ?1 WHERE id = ?2",
                params![avatar_path, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update avatar: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete user by ID.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== BOOK OPERATIONS ==========

    /// Create a book and index its tags.
    pub fn create_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books (id, user_id, title, slug, description, category, tags_json,
                                cover_path, is_published, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                book.id,
                book.user_id,
                book.title,
                book.slug,
                book.description,
                book.category,
                Self::tags_to_json(&book.tags),
                book.cover_path,
                book.is_published,
                book.created_at,
                book.updated_at,
            ],
        )
        .map_err(|e| Self::map_unique(e, "book"))?;

        Self::reindex_tags(&conn, &book.id, &book.tags)?;
        Ok(())
    }

    /// Update a book and rebuild its tag index.
    pub fn update_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE books SET title = ?1, slug = ?2, description = ?3, category = ?4,
                              tags_json = ?5, is_published = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                book.title,
                book.slug,
                book.description,
                book.category,
                Self::tags_to_json(&book.tags),
                book.is_published,
                book.updated_at,
                book.id,
            ],
        )
        .map_err(|e| Self::map_unique(e, "book"))?;

        Self::reindex_tags(&conn, &book.id, &book.tags)?;
        Ok(())
    }

    fn tags_to_json(tags: &[String]) -> Option<String> {
        if tags.is_empty() {
            None
        } else {
            serde_json::to_string(tags).ok()
        }
    }

    fn reindex_tags(conn: &Connection, book_id: &str, tags: &[String]) -> Result<()> {
        conn.execute("DELETE FROM book_tags WHERE book_id = ?1", params![book_id])
            .map_err(|e| AppError::Internal(format!("Failed to clear tags: {}", e)))?;

        for tag in tags {
            conn.execute(
                "INSERT OR IGNORE INTO book_tags (book_id, tag) VALUES (?1, ?2)",
                params![book_id, tag],
            )
            .map_err(|e| AppError::Internal(format!("Failed to index tag: {}", e)))?;
        }
        Ok(())
    }

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        let tags_json: Option<String> = row.get(6)?;
        Ok(Book {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            description: row.get(4)?,
            category: row.get(5)?,
            tags: tags_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok())
                .unwrap_or_default(),
            cover_path: row.get(7)?,
            is_published: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    const BOOK_COLUMNS: &'static str = "id, user_id, title, slug, description, category,
                                        tags_json, cover_path, is_published, created_at, updated_at";

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", Self::BOOK_COLUMNS),
            params![id],
            Self::row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Update a book's cover path.
    pub fn update_book_cover(&self, book_id: &str, cover_path: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET cover_path = ?1, updated_at = ?2 WHERE id = ?3",
                params![cover_path, now_timestamp(), book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update cover: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a book row and its tag index.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM book_tags WHERE book_id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete tags: {}", e)))?;
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== CATALOG QUERIES ==========

    /// List published books for the catalog.
    ///
    /// Each row carries the author projection, the mean rating (0 when
    /// unrated) and the viewer's favorite flag (false when anonymous).
    /// Returns the page plus the total count matching the filters.
    pub fn list_books(
        &self,
        query: &BookQuery,
        viewer: Option<&str>,
    ) -> Result<(Vec<BookSummary>, i64)> {
        let conn = self.conn.lock();

        let filter_sql = query.filter.filter_sql();
        let filter_params = query.filter.filter_params();
        let (limit, offset) = query.page.limit_offset();

        let favorite_expr = if viewer.is_some() {
            "EXISTS (SELECT 1 FROM favorites f WHERE f.user_id = ? AND f.book_id = b.id)"
        } else {
            "0"
        };

        let sql = format!(
            "SELECT b.id, b.title, b.slug, b.description, b.category, b.tags_json,
                    b.cover_path, b.created_at,
                    u.username, u.description, u.avatar_path,
                    COALESCE((SELECT AVG(r.rate) FROM ratings r WHERE r.book_id = b.id), 0.0) AS avg_rate,
                    {} AS favorite
             FROM books b
             JOIN users u ON u.id = b.user_id
             WHERE b.is_published = 1{}
             ORDER BY {}
             LIMIT ? OFFSET ?",
            favorite_expr,
            filter_sql,
            query.sort.order_sql(),
        );

        let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(v) = &viewer {
            bind.push(v);
        }
        for p in &filter_params {
            bind.push(p);
        }
        bind.push(&limit);
        bind.push(&offset);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                let tags_json: Option<String> = row.get(5)?;
                Ok(BookSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    description: row.get(3)?,
                    category: row.get(4)?,
                    tags: tags_json
                        .as_deref()
                        .and_then(|j| serde_json::from_str(j).ok())
                        .unwrap_or_default(),
                    cover_path: row.get(6)?,
                    created_at: row.get(7)?,
                    author: AuthorSummary {
                        username: row.get(8)?,
                        description: row.get(9)?,
                        avatar_path: row.get(10)?,
                    },
                    avg_rate: row.get(11)?,
                    favorite: row.get(12)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM books b WHERE b.is_published = 1{}",
            filter_sql
        );
        let count_bind: Vec<&dyn rusqlite::ToSql> =
            filter_params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let total: i64 = conn
            .query_row(&count_sql, rusqlite::params_from_iter(count_bind), |row| {
                row.get(0)
            })
            .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))?;

        Ok((books, total))
    }

    /// Single book with author and all chapters, any published state.
    pub fn get_book_detail_by_id(&self, id: &str) -> Result<Option<BookDetail>> {
        let conn = self.conn.lock();

        let detail = conn
            .query_row(
                "SELECT b.id, b.user_id, b.title, b.slug, b.description, b.category,
                        b.tags_json, b.cover_path, b.is_published, b.created_at,
                        u.username, u.description, u.avatar_path
                 FROM books b JOIN users u ON u.id = b.user_id
                 WHERE b.id = ?1",
                params![id],
                Self::row_to_detail,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))?;

        let Some(mut detail) = detail else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT id, title, slug, chapter_order, is_published
                 FROM chapters WHERE book_id = ?1
                 ORDER BY chapter_order, created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        detail.chapters = stmt
            .query_map(params![id], |row| {
                Ok(ChapterSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    chapter_order: row.get(3)?,
                    is_published: row.get(4)?,
                    content: None,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get chapters: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect chapters: {}", e)))?;

        Ok(Some(detail))
    }

    /// Published book by slug with mean rating, viewer favorite flag, and
    /// published chapters including their content.
    pub fn get_book_detail_by_slug(
        &self,
        slug: &str,
        viewer: Option<&str>,
    ) -> Result<Option<BookDetail>> {
        let conn = self.conn.lock();

        let favorite_expr = if viewer.is_some() {
            "EXISTS (SELECT 1 FROM favorites f WHERE f.user_id = ? AND f.book_id = b.id)"
        } else {
            "0"
        };

        let sql = format!(
            "SELECT b.id, b.user_id, b.title, b.slug, b.description, b.category,
                    b.tags_json, b.cover_path, b.is_published, b.created_at,
                    u.username, u.description, u.avatar_path,
                    COALESCE((SELECT AVG(r.rate) FROM ratings r WHERE r.book_id = b.id), 0.0),
                    {}
             FROM books b JOIN users u ON u.id = b.user_id
             WHERE b.slug = ? AND b.is_published = 1",
            favorite_expr
        );

        let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(v) = &viewer {
            bind.push(v);
        }
        bind.push(&slug);

        let detail = conn
            .query_row(&sql, rusqlite::params_from_iter(bind), |row| {
                let mut detail = Self::row_to_detail(row)?;
                detail.avg_rate = Some(row.get(13)?);
                detail.favorite = Some(row.get(14)?);
                Ok(detail)
            })
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))?;

        let Some(mut detail) = detail else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT id, title, slug, chapter_order, is_published, content
                 FROM chapters WHERE book_id = ?1 AND is_published = 1
                 ORDER BY chapter_order, created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        detail.chapters = stmt
            .query_map(params![detail.id], |row| {
                Ok(ChapterSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    chapter_order: row.get(3)?,
                    is_published: row.get(4)?,
                    content: Some(row.get(5)?),
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get chapters: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect chapters: {}", e)))?;

        Ok(Some(detail))
    }

    fn row_to_detail(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookDetail> {
        let tags_json: Option<String> = row.get(6)?;
        Ok(BookDetail {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            description: row.get(4)?,
            category: row.get(5)?,
            tags: tags_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok())
                .unwrap_or_default(),
            cover_path: row.get(7)?,
            is_published: row.get(8)?,
            created_at: row.get(9)?,
            author: AuthorSummary {
                username: row.get(10)?,
                description: row.get(11)?,
                avatar_path: row.get(12)?,
            },
            avg_rate: None,
            favorite: None,
            chapters: Vec::new(),
        })
    }

    /// Author dashboard: every owned book with chapter counts,
    /// published books first.
    pub fn list_own_books(&self, owner_id: &str) -> Result<Vec<OwnBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT b.id, b.title, b.category, b.is_published,
                        (SELECT COUNT(*) FROM chapters c WHERE c.book_id = b.id) AS chapters_total,
                        (SELECT COUNT(*) FROM chapters c
                          WHERE c.book_id = b.id AND c.is_published = 1) AS chapters_published
                 FROM books b
                 WHERE b.user_id = ?1
                 ORDER BY b.is_published DESC, b.created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![owner_id], |row| {
                Ok(OwnBook {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    category: row.get(2)?,
                    is_published: row.get(3)?,
                    chapters_total: row.get(4)?,
                    chapters_published: row.get(5)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list own books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect own books: {}", e)))?;

        Ok(books)
    }

    /// Public user profile with published books, each carrying the mean
    /// rating and whether the profile owner favorited it.
    pub fn get_user_profile(&self, id: &str) -> Result<Option<UserProfile>> {
        let user = match self.get_user_by_id(id)? {
            Some(u) => u,
            None => return Ok(None),
        };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT b.id, b.title, b.slug, b.category, b.cover_path,
                        COALESCE((SELECT AVG(r.rate) FROM ratings r WHERE r.book_id = b.id), 0.0),
                        EXISTS (SELECT 1 FROM favorites f
                                 WHERE f.user_id = ?1 AND f.book_id = b.id)
                 FROM books b
                 WHERE b.user_id = ?1 AND b.is_published = 1
                 ORDER BY b.created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![id], |row| {
                Ok(ProfileBook {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    category: row.get(3)?,
                    cover_path: row.get(4)?,
                    avg_rate: row.get(5)?,
                    favorite: row.get(6)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get profile books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect profile books: {}", e)))?;

        Ok(Some(UserProfile {
            id: user.id,
            username: user.username,
            email: user.email,
            description: user.description,
            avatar_path: user.avatar_path,
            twitter: user.twitter,
            facebook: user.facebook,
            books,
        }))
    }

    // ========== CHAPTER OPERATIONS ==========

    /// Create a chapter.
    pub fn create_chapter(&self, chapter: &Chapter) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chapters (id, book_id, user_id, title, slug, chapter_order,
                                   content, is_published, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                chapter.id,
                chapter.book_id,
                chapter.user_id,
                chapter.title,
                chapter.slug,
                chapter.chapter_order,
                chapter.content,
                chapter.is_published,
                chapter.created_at,
                chapter.updated_at,
            ],
        )
        .map_err(|e| Self::map_unique(e, "chapter"))?;
        Ok(())
    }

    fn row_to_chapter(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chapter> {
        Ok(Chapter {
            id: row.get(0)?,
            book_id: row.get(1)?,
            user_id: row.get(2)?,
            title: row.get(3)?,
            slug: row.get(4)?,
            chapter_order: row.get(5)?,
            content: row.get(6)?,
            is_published: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    const CHAPTER_COLUMNS: &'static str = "id, book_id, user_id, title, slug, chapter_order,
                                           content, is_published, created_at, updated_at";

    /// Get chapter by ID.
    pub fn get_chapter(&self, id: &str) -> Result<Option<Chapter>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM chapters WHERE id = ?1", Self::CHAPTER_COLUMNS),
            params![id],
            Self::row_to_chapter,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get chapter: {}", e)))
    }

    /// Get chapter by slug.
    pub fn get_chapter_by_slug(&self, slug: &str) -> Result<Option<Chapter>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM chapters WHERE slug = ?1",
                Self::CHAPTER_COLUMNS
            ),
            params![slug],
            Self::row_to_chapter,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get chapter: {}", e)))
    }

    /// Update a chapter.
    pub fn update_chapter(&self, chapter: &Chapter) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE chapters SET title = ?1, slug = ?2, chapter_order = ?3, content = ?4,
                                 is_published = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                chapter.title,
                chapter.slug,
                chapter.chapter_order,
                chapter.content,
                chapter.is_published,
                chapter.updated_at,
                chapter.id,
            ],
        )
        .map_err(|e| Self::map_unique(e, "chapter"))?;
        Ok(())
    }

    /// Delete a chapter.
    pub fn delete_chapter(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM chapters WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete chapter: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete all chapters of a book, returning how many were removed.
    pub fn delete_chapters_for_book(&self, book_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM chapters WHERE book_id = ?1", params![book_id])
            .map_err(|e| AppError::Internal(format!("Failed to delete chapters: {}", e)))?;
        Ok(rows)
    }

    /// Count chapters still referencing a book (saga verification).
    pub fn count_chapters_for_book(&self, book_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count chapters: {}", e)))
    }

    // ========== RATING OPERATIONS ==========

    /// Upsert a rating: the second rating from the same user overwrites
    /// the first. Values outside 0..=5 are rejected by the CHECK constraint.
    pub fn upsert_rating(&self, rating: &Rating) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ratings (user_id, book_id, rate) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, book_id) DO UPDATE SET rate = excluded.rate",
            params![rating.user_id, rating.book_id, rating.rate],
        )
        .map_err(|e| Self::map_unique(e, "rating"))?;
        Ok(())
    }

    /// Get a user's own rating for a book.
    pub fn get_rating(&self, user_id: &str, book_id: &str) -> Result<Option<Rating>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, book_id, rate FROM ratings WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
            |row| {
                Ok(Rating {
                    user_id: row.get(0)?,
                    book_id: row.get(1)?,
                    rate: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get rating: {}", e)))
    }

    /// Arithmetic mean over all ratings of a book; 0 over the empty set.
    pub fn mean_rating(&self, book_id: &str) -> Result<f64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COALESCE(AVG(rate), 0.0) FROM ratings WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to compute mean rating: {}", e)))
    }

    // ========== FAVORITE OPERATIONS ==========

    /// Toggle a favorite. Returns true when the book is now favorited.
    ///
    /// Remove-then-insert under one lock, so racing toggles for the same
    /// pair cannot produce duplicate entries.
    pub fn toggle_favorite(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to toggle favorite: {}", e)))?;

        if removed > 0 {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO favorites (user_id, book_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, book_id, now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to toggle favorite: {}", e)))?;
        Ok(true)
    }

    /// Check favorite membership.
    pub fn is_favorite(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM favorites WHERE user_id = ?1 AND book_id = ?2)",
            params![user_id, book_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to check favorite: {}", e)))
    }

    // ========== BOOKMARK OPERATIONS ==========

    /// Upsert the reading position for a chapter; latest write wins.
    pub fn set_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bookmarks (user_id, chapter_id, book_id, position, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, chapter_id) DO UPDATE SET
                book_id = excluded.book_id,
                position = excluded.position,
                updated_at = excluded.updated_at",
            params![
                bookmark.user_id,
                bookmark.chapter_id,
                bookmark.book_id,
                bookmark.position,
                bookmark.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to set bookmark: {}", e)))?;
        Ok(())
    }

    /// Get the bookmark for a chapter. Absence is a quiet None, not an
    /// error: callers legitimately probe chapters they never bookmarked.
    pub fn get_bookmark(&self, user_id: &str, chapter_id: &str) -> Result<Option<Bookmark>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, chapter_id, book_id, position, updated_at
             FROM bookmarks WHERE user_id = ?1 AND chapter_id = ?2",
            params![user_id, chapter_id],
            |row| {
                Ok(Bookmark {
                    user_id: row.get(0)?,
                    chapter_id: row.get(1)?,
                    book_id: row.get(2)?,
                    position: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get bookmark: {}", e)))
    }

    /// Count bookmarks for a (user, chapter) pair (test support).
    pub fn count_bookmarks(&self, user_id: &str, chapter_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM bookmarks WHERE user_id = ?1 AND chapter_id = ?2",
            params![user_id, chapter_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count bookmarks: {}", e)))
    }

    // ========== RECOVERY OPERATIONS ==========

    /// Store a recovery record, replacing any prior one for the user.
    pub fn replace_recovery(&self, recovery: &RecoveryToken) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM recovery_tokens WHERE user_id = ?1",
            params![recovery.user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to clear recovery: {}", e)))?;

        conn.execute(
            "INSERT INTO recovery_tokens (id, user_id, token, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                recovery.id,
                recovery.user_id,
                recovery.token,
                recovery.expires_at,
                recovery.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create recovery: {}", e)))?;
        Ok(())
    }

    /// Get a recovery record by its link ID.
    pub fn get_recovery(&self, id: &str) -> Result<Option<RecoveryToken>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, token, expires_at, created_at
             FROM recovery_tokens WHERE id = ?1",
            params![id],
            |row| {
                Ok(RecoveryToken {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    token: row.get(2)?,
                    expires_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get recovery: {}", e)))
    }

    /// Delete a recovery record.
    pub fn delete_recovery(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM recovery_tokens WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete recovery: {}", e)))?;
        Ok(rows > 0)
    }
}
