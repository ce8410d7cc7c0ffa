//! HTTP request handlers.

use crate::catalog::{BookFilter, BookPage, BookQuery, BookSort, OwnBook, Page, UserProfile};
use crate::db::{self, Role};
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    let user = state
        .auth
        .register(&req.username, &req.email, &req.password)?;
    let token = state.auth.create_session(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            user_id: user.id,
            username: user.username,
            role: user.role,
        }),
    ))
}

pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.email, &req.password)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

pub async fn auth_recover(
    State(state): State<AppState>,
    Json(req): Json<RecoverRequest>,
) -> Result<StatusCode> {
    state.request_recovery(&req.email)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub recovery_id: String,
    pub token: String,
    pub password: String,
}

pub async fn auth_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.reset_password(&req.recovery_id, &req.token, &req.password)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

// ============================================================================
// CATALOG
// ============================================================================

/// Catalog listing query string.
#[derive(Debug, Deserialize, Default)]
pub struct CatalogParams {
    /// 1-indexed page.
    pub page: Option<u32>,
    /// Sort mode: recent, popularity, favorite.
    pub sort: Option<String>,
    /// Comma-separated tag filter.
    pub tags: Option<String>,
    /// Comma-separated category filter.
    pub categories: Option<String>,
    /// Text search against title and description.
    pub search: Option<String>,
}

impl CatalogParams {
    fn into_query(self) -> BookQuery {
        BookQuery {
            filter: BookFilter {
                tags: split_csv(self.tags),
                categories: split_csv(self.categories),
                text: self.search.filter(|s| !s.trim().is_empty()),
            },
            sort: self
                .sort
                .as_deref()
                .map(BookSort::from_query)
                .unwrap_or_default(),
            page: Page(self.page.unwrap_or(1)),
        }
    }
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub async fn books_getall(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CatalogParams>,
) -> Result<Json<BookPage>> {
    let viewer = get_optional_user(&state, &headers).await?;
    let page = state.list_books(&params.into_query(), viewer.as_ref())?;
    Ok(Json(page))
}

pub async fn book_by_slug(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<crate::catalog::BookDetail>> {
    let viewer = get_optional_user(&state, &headers).await?;
    let detail = state.get_book_by_slug(&slug, viewer.as_ref())?;
    Ok(Json(detail))
}

pub async fn books_mine(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<OwnBook>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let books = state.my_books(&user)?;
    Ok(Json(books))
}

// ============================================================================
// BOOK LIFECYCLE
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_published: bool,
}

pub async fn book_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<db::Book>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = state.create_book(
        &user,
        &req.title,
        &req.description,
        &req.category,
        req.tags,
        req.is_published,
    )?;
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn book_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<crate::catalog::BookDetail>> {
    get_authenticated_user(&state, &headers).await?;
    let detail = state.get_book_by_id(&id)?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_published: Option<bool>,
}

pub async fn book_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateBookRequest>,
) -> Result<Json<db::Book>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let book = state.update_book(
        &user,
        &id,
        req.title,
        req.description,
        req.category,
        req.tags,
        req.is_published,
    )?;
    Ok(Json(book))
}

pub async fn book_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.delete_book(&user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub path: String,
}

pub async fn book_upload_cover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let path = state.upload_cover(&user, &id, &body)?;
    Ok(Json(UploadResponse { path }))
}

// ============================================================================
// RATINGS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rate: i64,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub avg_rate: f64,
}

pub async fn book_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RateRequest>,
) -> Result<Json<RateResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let avg_rate = state.rate_book(&user, &id, req.rate)?;
    Ok(Json(RateResponse { avg_rate }))
}

pub async fn user_own_rating(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<String>,
) -> Result<Json<db::Rating>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let rating = state.get_own_rating(&user, &book_id)?;
    Ok(Json(rating))
}

// ============================================================================
// CHAPTERS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateChapterRequest {
    pub book_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub chapter_order: i64,
    #[serde(default)]
    pub is_published: bool,
}

pub async fn chapter_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateChapterRequest>,
) -> Result<(StatusCode, Json<db::Chapter>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let chapter = state.create_chapter(
        &user,
        &req.book_id,
        &req.title,
        &req.content,
        req.chapter_order,
        req.is_published,
    )?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

pub async fn chapter_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<db::Chapter>> {
    let chapter = state.get_chapter_by_slug(&slug)?;
    Ok(Json(chapter))
}

pub async fn chapter_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<db::Chapter>> {
    get_authenticated_user(&state, &headers).await?;
    let chapter = state.get_chapter_by_id(&id)?;
    Ok(Json(chapter))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateChapterRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub chapter_order: Option<i64>,
    pub is_published: Option<bool>,
}

pub async fn chapter_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateChapterRequest>,
) -> Result<Json<db::Chapter>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let chapter = state.update_chapter(
        &user,
        &id,
        req.title,
        req.content,
        req.chapter_order,
        req.is_published,
    )?;
    Ok(Json(chapter))
}

pub async fn chapter_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.delete_chapter(&user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// READER STATE
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BookmarkRequest {
    pub chapter_id: String,
    pub position: i64,
}

pub async fn bookmark_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BookmarkRequest>,
) -> Result<Json<db::Bookmark>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let bookmark = state.set_bookmark(&user, &req.chapter_id, req.position)?;
    Ok(Json(bookmark))
}

/// A chapter never bookmarked answers 200 with a null body, not 404.
pub async fn bookmark_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chapter_id): Path<String>,
) -> Result<Json<Option<db::Bookmark>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let bookmark = state.get_bookmark(&user, &chapter_id)?;
    Ok(Json(bookmark))
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub favorite: bool,
}

pub async fn favorite_toggle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<String>,
) -> Result<Json<FavoriteResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let favorite = state.toggle_favorite(&user, &book_id)?;
    Ok(Json(FavoriteResponse { favorite }))
}

// ============================================================================
// USERS
// ============================================================================

pub async fn users_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::catalog::UserSummary>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    if user.role != Role::Admin {
        return Err(AppError::Unauthorized("Admin only".to_string()));
    }
    Ok(Json(state.db.list_users()?))
}

pub async fn user_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>> {
    Ok(Json(state.get_user_profile(&id)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub twitter: Option<String>,
    pub facebook: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn user_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let patch = crate::server::UserPatch {
        username: req.username,
        email: req.email,
        description: req.description,
        twitter: req.twitter,
        facebook: req.facebook,
        new_password: req.new_password,
    };
    let updated = state.update_user(&user, &id, patch, req.current_password)?;
    Ok(Json(updated))
}

pub async fn user_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.delete_user(&user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn user_upload_avatar(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let path = state.upload_avatar(&user, &body)?;
    Ok(Json(UploadResponse { path }))
}

// ============================================================================
// UPLOADED ASSETS
// ============================================================================

pub async fn serve_upload(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response<Body>> {
    let path = state.assets.resolve(&file)?;

    let f = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound("File not found".to_string()))?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };

    let stream = ReaderStream::new(f);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

// ============================================================================
// HELPERS
// ============================================================================

fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthenticated("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthenticated("Invalid or expired token".to_string()))
}

/// Anonymous access is fine, but a presented token must be valid.
async fn get_optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<db::User>> {
    match extract_token(headers) {
        None => Ok(None),
        Some(token) => state
            .auth
            .validate_token(&token)?
            .map(Some)
            .ok_or_else(|| AppError::Unauthenticated("Invalid or expired token".to_string())),
    }
}
