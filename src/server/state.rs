//! Application state shared across handlers.

use crate::assets::AssetStore;
use crate::auth::{self, AuthService};
use crate::catalog::{BookDetail, BookPage, BookQuery, OwnBook, PAGE_SIZE, UserProfile};
use crate::config::{Category, Config};
use crate::db::{
    Book, Bookmark, Chapter, Database, Rating, User, now_timestamp,
};
use crate::error::{AppError, Result};
use crate::mail::{Mail, Mailer};
use crate::slug::slugify;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Uploaded asset store.
    pub assets: AssetStore,
    /// Outgoing mail backend.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: Config,
        db: Database,
        auth: AuthService,
        assets: AssetStore,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            assets,
            mailer,
        }
    }

    // ========== CATALOG ==========

    /// Catalog page for a viewer. A page past the end of the catalog is
    /// NotFound, not an empty list.
    pub fn list_books(&self, query: &BookQuery, viewer: Option<&User>) -> Result<BookPage> {
        let viewer_id = viewer.map(|u| u.id.as_str());
        let (books, total) = self.db.list_books(query, viewer_id)?;

        if books.is_empty() {
            return Err(AppError::NotFound("No books found".to_string()));
        }

        Ok(BookPage {
            limit: PAGE_SIZE,
            total,
            books,
        })
    }

    /// Reader view of a published book by slug.
    pub fn get_book_by_slug(&self, slug: &str, viewer: Option<&User>) -> Result<BookDetail> {
        let viewer_id = viewer.map(|u| u.id.as_str());
        self.db
            .get_book_detail_by_slug(slug, viewer_id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Book by ID: any published state, all chapters without content.
    /// Open to any authenticated user; mutations stay gated.
    pub fn get_book_by_id(&self, id: &str) -> Result<BookDetail> {
        self.db
            .get_book_detail_by_id(id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Author dashboard. No books at all is NotFound.
    pub fn my_books(&self, actor: &User) -> Result<Vec<OwnBook>> {
        let books = self.db.list_own_books(&actor.id)?;
        if books.is_empty() {
            return Err(AppError::NotFound("You have no books yet".to_string()));
        }
        Ok(books)
    }

    // ========== BOOK LIFECYCLE ==========

    /// Create a book owned by the actor.
    pub fn create_book(
        &self,
        actor: &User,
        title: &str,
        description: &str,
        category: &str,
        tags: Vec<String>,
        is_published: bool,
    ) -> Result<Book> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("Title is required".to_string()));
        }

        let category = Category::from_str_opt(category)
            .ok_or_else(|| AppError::BadRequest("Unknown category".to_string()))?;

        let now = now_timestamp();
        let book = Book {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: actor.id.clone(),
            title: title.to_string(),
            slug: slugify(title),
            description: description.to_string(),
            category: category.as_str().to_string(),
            tags: normalize_tags(tags),
            cover_path: None,
            is_published,
            created_at: now,
            updated_at: now,
        };

        self.db.create_book(&book)?;
        Ok(book)
    }

    /// Update a book. Owner or admin only. The slug is regenerated only
    /// when the title changes, so reader links survive description edits.
    #[allow(clippy::too_many_arguments)]
    pub fn update_book(
        &self,
        actor: &User,
        id: &str,
        title: Option<String>,
        description: Option<String>,
        category: Option<String>,
        tags: Option<Vec<String>>,
        is_published: Option<bool>,
    ) -> Result<Book> {
        let mut book = self
            .db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        auth::check_permission(actor, &book.user_id)?;

        if let Some(title) = title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::BadRequest("Title is required".to_string()));
            }
            if title != book.title {
                book.slug = slugify(&title);
                book.title = title;
            }
        }

        if let Some(description) = description {
            book.description = description;
        }

        if let Some(category) = category {
            let category = Category::from_str_opt(&category)
                .ok_or_else(|| AppError::BadRequest("Unknown category".to_string()))?;
            book.category = category.as_str().to_string();
        }

        if let Some(tags) = tags {
            book.tags = normalize_tags(tags);
        }

        if let Some(is_published) = is_published {
            book.is_published = is_published;
        }

        book.updated_at = now_timestamp();
        self.db.update_book(&book)?;
        Ok(book)
    }

    /// Delete a book with its chapters and uploaded assets.
    ///
    /// Runs as a saga: chapters, then assets, then the book row. Each step is
    /// idempotent, so the whole request can be retried. A failed child step is
    /// logged and does not block the row delete; only a failure on the row
    /// itself fails the request.
    pub fn delete_book(&self, actor: &User, id: &str) -> Result<()> {
        let book = self
            .db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        auth::check_permission(actor, &book.user_id)?;

        let chapters = match self.db.delete_chapters_for_book(id) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(book_id = %id, error = %e, "Chapters not fully removed");
                0
            }
        };

        if let Err(e) = self.assets.delete_prefix(&format!("book-{}-", id)) {
            tracing::warn!(book_id = %id, error = %e, "Book assets not fully removed");
        }

        self.db.delete_book(id)?;
        tracing::info!(book_id = %id, chapters = chapters, "Deleted book");
        Ok(())
    }

    /// Store an uploaded cover image for a book.
    pub fn upload_cover(&self, actor: &User, book_id: &str, bytes: &[u8]) -> Result<String> {
        let book = self
            .db
            .get_book(book_id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        auth::check_permission(actor, &book.user_id)?;

        let ext = self.validate_image(bytes)?;
        // Drop any earlier cover with a different extension.
        self.assets.delete_prefix(&format!("book-{}-cover", book_id))?;
        let key = format!("book-{}-cover.{}", book_id, ext);
        let public = self.assets.save(&key, bytes)?;
        self.db.update_book_cover(book_id, &public)?;
        Ok(public)
    }

    /// Store an uploaded avatar image for the actor.
    pub fn upload_avatar(&self, actor: &User, bytes: &[u8]) -> Result<String> {
        let ext = self.validate_image(bytes)?;
        self.assets.delete_prefix(&format!("user-{}-avatar", actor.id))?;
        let key = format!("user-{}-avatar.{}", actor.id, ext);
        let public = self.assets.save(&key, bytes)?;
        self.db.update_user_avatar(&actor.id, &public)?;
        Ok(public)
    }

    /// Check size and decode the header; returns the canonical extension.
    fn validate_image(&self, bytes: &[u8]) -> Result<&'static str> {
        if bytes.len() > self.config.uploads.max_bytes {
            return Err(AppError::BadRequest(format!(
                "Image exceeds {} bytes",
                self.config.uploads.max_bytes
            )));
        }

        let format = image::guess_format(bytes)
            .map_err(|_| AppError::BadRequest("Unrecognized image format".to_string()))?;

        match format {
            image::ImageFormat::Jpeg => Ok("jpg"),
            image::ImageFormat::Png => Ok("png"),
            image::ImageFormat::WebP => Ok("webp"),
            _ => Err(AppError::BadRequest(
                "Only JPEG, PNG and WebP images are accepted".to_string(),
            )),
        }
    }

    // ========== CHAPTERS ==========

    /// Create a chapter in a book the actor owns.
    pub fn create_chapter(
        &self,
        actor: &User,
        book_id: &str,
        title: &str,
        content: &str,
        chapter_order: i64,
        is_published: bool,
    ) -> Result<Chapter> {
        let book = self
            .db
            .get_book(book_id)?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        // Writing into someone else's book is off-limits even for admins.
        if book.user_id != actor.id {
            return Err(AppError::Unauthorized(
                "Only the author can add chapters".to_string(),
            ));
        }

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("Title is required".to_string()));
        }

        let now = now_timestamp();
        let chapter = Chapter {
            id: uuid::Uuid::new_v4().to_string(),
            book_id: book.id,
            user_id: actor.id.clone(),
            title: title.to_string(),
            slug: slugify(title),
            chapter_order,
            content: content.to_string(),
            is_published,
            created_at: now,
            updated_at: now,
        };

        self.db.create_chapter(&chapter)?;
        Ok(chapter)
    }

    /// Reader view of a published chapter by slug, with its parent book
    /// published too.
    pub fn get_chapter_by_slug(&self, slug: &str) -> Result<Chapter> {
        let chapter = self
            .db
            .get_chapter_by_slug(slug)?
            .filter(|c| c.is_published)
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;

        let published_parent = self
            .db
            .get_book(&chapter.book_id)?
            .map(|b| b.is_published)
            .unwrap_or(false);

        if !published_parent {
            return Err(AppError::NotFound("Chapter not found".to_string()));
        }

        Ok(chapter)
    }

    /// Chapter by ID, any published state. Open to any authenticated user.
    pub fn get_chapter_by_id(&self, id: &str) -> Result<Chapter> {
        self.db
            .get_chapter(id)?
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))
    }

    /// Update a chapter. Owner or admin only; the slug is regenerated only
    /// when the title changes.
    pub fn update_chapter(
        &self,
        actor: &User,
        id: &str,
        title: Option<String>,
        content: Option<String>,
        chapter_order: Option<i64>,
        is_published: Option<bool>,
    ) -> Result<Chapter> {
        let mut chapter = self
            .db
            .get_chapter(id)?
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;

        auth::check_permission(actor, &chapter.user_id)?;

        if let Some(title) = title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::BadRequest("Title is required".to_string()));
            }
            if title != chapter.title {
                chapter.slug = slugify(&title);
                chapter.title = title;
            }
        }

        if let Some(content) = content {
            chapter.content = content;
        }

        if let Some(order) = chapter_order {
            chapter.chapter_order = order;
        }

        if let Some(is_published) = is_published {
            chapter.is_published = is_published;
        }

        chapter.updated_at = now_timestamp();
        self.db.update_chapter(&chapter)?;
        Ok(chapter)
    }

    /// Delete a chapter. Owner or admin only.
    pub fn delete_chapter(&self, actor: &User, id: &str) -> Result<()> {
        let chapter = self
            .db
            .get_chapter(id)?
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;

        auth::check_permission(actor, &chapter.user_id)?;
        self.db.delete_chapter(id)?;
        Ok(())
    }

    // ========== READER STATE ==========

    /// Rate a book 0..=5. A second rating from the same reader overwrites
    /// the first.
    pub fn rate_book(&self, actor: &User, book_id: &str, rate: i64) -> Result<f64> {
        if !(0..=5).contains(&rate) {
            return Err(AppError::BadRequest(
                "Rating must be between 0 and 5".to_string(),
            ));
        }

        self.db
            .get_book(book_id)?
            .filter(|b| b.is_published)
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        self.db.upsert_rating(&Rating {
            user_id: actor.id.clone(),
            book_id: book_id.to_string(),
            rate,
        })?;

        self.db.mean_rating(book_id)
    }

    /// The actor's own rating for a book. Never having rated is NotFound.
    pub fn get_own_rating(&self, actor: &User, book_id: &str) -> Result<Rating> {
        self.db
            .get_rating(&actor.id, book_id)?
            .ok_or_else(|| AppError::NotFound("You have not rated this book".to_string()))
    }

    /// Toggle a favorite; returns the new state.
    pub fn toggle_favorite(&self, actor: &User, book_id: &str) -> Result<bool> {
        self.db
            .get_book(book_id)?
            .filter(|b| b.is_published)
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        self.db.toggle_favorite(&actor.id, book_id)
    }

    /// Save the actor's reading position in a chapter.
    pub fn set_bookmark(&self, actor: &User, chapter_id: &str, position: i64) -> Result<Bookmark> {
        let chapter = self
            .db
            .get_chapter(chapter_id)?
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;

        let bookmark = Bookmark {
            user_id: actor.id.clone(),
            chapter_id: chapter.id,
            book_id: chapter.book_id,
            position,
            updated_at: now_timestamp(),
        };

        self.db.set_bookmark(&bookmark)?;
        Ok(bookmark)
    }

    /// The actor's bookmark in a chapter, or None if they never saved one.
    pub fn get_bookmark(&self, actor: &User, chapter_id: &str) -> Result<Option<Bookmark>> {
        self.db.get_bookmark(&actor.id, chapter_id)
    }

    // ========== USERS ==========

    /// Public profile with the user's published books.
    pub fn get_user_profile(&self, id: &str) -> Result<UserProfile> {
        self.db
            .get_user_profile(id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Update a profile. Owner or admin only, and the account's current
    /// password must be presented for any edit.
    #[allow(clippy::too_many_arguments)]
    pub fn update_user(
        &self,
        actor: &User,
        id: &str,
        patch: UserPatch,
        current_password: Option<String>,
    ) -> Result<User> {
        let mut user = self
            .db
            .get_user_by_id(id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        auth::check_permission(actor, &user.id)?;

        let current = current_password
            .ok_or_else(|| AppError::BadRequest("Current password is required".to_string()))?;
        if !auth::verify_password(&current, &user.password_hash)? {
            return Err(AppError::Unauthenticated("Wrong password".to_string()));
        }

        if let Some(username) = patch.username {
            let username = username.trim().to_string();
            if username.len() < 3 || username.len() > 50 {
                return Err(AppError::BadRequest(
                    "Username must be 3-50 characters".to_string(),
                ));
            }
            user.username = username;
        }
        if let Some(email) = patch.email {
            if !auth::is_valid_email(&email) {
                return Err(AppError::BadRequest("Invalid email address".to_string()));
            }
            user.email = email;
        }
        if let Some(description) = patch.description {
            user.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(twitter) = patch.twitter {
            user.twitter = Some(twitter).filter(|t| !t.is_empty());
        }
        if let Some(facebook) = patch.facebook {
            user.facebook = Some(facebook).filter(|f| !f.is_empty());
        }

        if let Some(new_password) = patch.new_password {
            if new_password.len() < 6 {
                return Err(AppError::BadRequest(
                    "Password must be at least 6 characters".to_string(),
                ));
            }
            user.password_hash = auth::hash_password(&new_password)?;
        }

        self.db.update_user(&user)?;
        Ok(user)
    }

    /// Delete an account and its uploaded avatar. Owner or admin only.
    pub fn delete_user(&self, actor: &User, id: &str) -> Result<()> {
        let user = self
            .db
            .get_user_by_id(id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        auth::check_permission(actor, &user.id)?;

        if let Err(e) = self.assets.delete_prefix(&format!("user-{}-", id)) {
            tracing::warn!(user_id = %id, error = %e, "User assets not fully removed");
        }

        self.db.delete_user(id)?;
        tracing::info!(user_id = %id, "Deleted user");
        Ok(())
    }

    // ========== RECOVERY ==========

    /// Start password recovery and mail the reset link.
    ///
    /// Answers OK whether or not the address has an account, so the endpoint
    /// cannot be used to probe for registered emails. Mail delivery is
    /// fire-and-forget; a failed send is logged.
    pub fn request_recovery(&self, email: &str) -> Result<()> {
        let (user, recovery) = match self.auth.request_recovery(email) {
            Ok(pair) => pair,
            Err(AppError::NotFound(_)) => {
                tracing::info!("Recovery requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let link = format!(
            "{}/reset/{}/{}",
            self.config.server.public_url, recovery.id, recovery.token
        );

        let mail = Mail {
            to: user.email.clone(),
            subject: format!("{}: password reset", self.config.server.site_name),
            body: format!(
                "Hello {},\n\nFollow this link to reset your password:\n{}\n\n\
                 The link expires in {} minutes. If you did not ask for a reset,\n\
                 you can ignore this mail.\n",
                user.username, link, self.config.auth.recovery_minutes
            ),
        };

        if let Err(e) = self.mailer.send(&mail) {
            tracing::warn!(user_id = %user.id, error = %e, "Recovery mail not sent");
        }

        Ok(())
    }

    /// Complete password recovery and open a fresh session.
    pub fn reset_password(
        &self,
        recovery_id: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(User, String)> {
        let user = self.auth.reset_password(recovery_id, token, new_password)?;
        let session = self.auth.create_session(&user)?;
        Ok((user, session))
    }
}

/// Optional profile edits; absent fields are left alone.
#[derive(Debug, Default)]
pub struct UserPatch {
    /// New username.
    pub username: Option<String>,
    /// New email address.
    pub email: Option<String>,
    /// New profile description; empty clears it.
    pub description: Option<String>,
    /// New Twitter link; empty clears it.
    pub twitter: Option<String>,
    /// New Facebook link; empty clears it.
    pub facebook: Option<String>,
    /// New password.
    pub new_password: Option<String>,
}

/// Trim, drop empties, dedupe preserving order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
