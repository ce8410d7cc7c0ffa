//! HTTP server and routes.

mod handlers;
mod state;

pub use state::{AppState, UserPatch};

use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth_register))
        .route("/login", post(handlers::auth_login))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me))
        .route("/recover", post(handlers::auth_recover))
        .route("/reset", post(handlers::auth_reset));

    let book_routes = Router::new()
        .route("/", get(handlers::books_getall))
        .route("/", post(handlers::book_create))
        .route("/mine", get(handlers::books_mine))
        .route("/byslug/{slug}", get(handlers::book_by_slug))
        .route("/{id}", get(handlers::book_get))
        .route("/{id}", patch(handlers::book_update))
        .route("/{id}", delete(handlers::book_delete))
        .route("/{id}/rate", post(handlers::book_rate))
        .route("/{id}/cover", post(handlers::book_upload_cover));

    let chapter_routes = Router::new()
        .route("/", post(handlers::chapter_create))
        .route("/byslug/{slug}", get(handlers::chapter_by_slug))
        .route("/{id}", get(handlers::chapter_get))
        .route("/{id}", patch(handlers::chapter_update))
        .route("/{id}", delete(handlers::chapter_delete));

    let user_routes = Router::new()
        .route("/", get(handlers::users_list))
        .route("/bookmark", post(handlers::bookmark_set))
        .route("/bookmark/{chapter_id}", get(handlers::bookmark_get))
        .route("/favorites/{book_id}", post(handlers::favorite_toggle))
        .route("/rate/{book_id}", get(handlers::user_own_rating))
        .route("/avatar", post(handlers::user_upload_avatar))
        .route("/{id}", get(handlers::user_get))
        .route("/{id}", patch(handlers::user_update))
        .route("/{id}", delete(handlers::user_delete));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .nest("/api/chapters", chapter_routes)
        .nest("/api/users", user_routes)
        .route("/uploads/{file}", get(handlers::serve_upload))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
