use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_scalar::{Scalar, Servable};

use crate::{handlers, AppState};

#[derive(OpenApi)]
struct ApiDoc;

#[allow(unreachable_pub)]
pub fn init(state: AppState) -> Router {
    let api = ApiDoc::openapi();

    // Separate the OpenAPI routes and the API documentation object
    let (openapi_routes, api_doc) = OpenApiRouter::with_openapi(api)
        .routes(routes!(handlers::stage))
        .routes(routes!(handlers::status))
        .routes(routes!(handlers::cancel))
        .routes(routes!(handlers::release))
        .routes(routes!(handlers::delete))
        .routes(routes!(handlers::archive_info))
        .routes(routes!(handlers::ready_take_over))
        .routes(routes!(handlers::take_over))
        .routes(routes!(handlers::in_progress))
        .routes(routes!(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .split_for_parts();

    // Create the Scalar UI routes
    let scalar_routes = Scalar::with_url("/api", api_doc);

    // Merge all routes and then apply the state to the final router
    Router::new().merge(openapi_routes).merge(scalar_routes)
}
