use axum::Router;
use tower_http::trace::TraceLayer;

pub fn create_app() -> Router {
    crate::routes::configure_routes().layer(TraceLayer::new_for_http())
}
