use axum::{
    routing::{get, post},
    Router,
};

use crate::{auth, notifications, workflow};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route(
            "/api/notifications",
            get(notifications::list_notifications),
        )
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .merge(workflow::routes())
}
