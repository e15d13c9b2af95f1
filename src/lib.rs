use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Authorization & scoping engine.
pub mod auth;
pub mod guard;
pub mod policy;
pub mod scope;

// Collaborators and shared types.
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod password;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::Caller;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::ApiError;
pub use mailer::{HttpMailer, MailerState, MockMailer};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json` and rendered by
/// Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::auth::register_association, handlers::auth::login, handlers::auth::get_me,
        handlers::associations::list_associations, handlers::associations::get_association,
        handlers::associations::get_my_association,
        handlers::campuses::list_campuses, handlers::campuses::get_campus,
        handlers::campuses::create_campus, handlers::campuses::update_campus,
        handlers::campuses::delete_campus,
        handlers::students::list_students, handlers::students::get_student,
        handlers::students::create_student, handlers::students::update_student,
        handlers::students::delete_student,
        handlers::admin::list_users, handlers::admin::create_user, handlers::admin::update_user,
        handlers::admin::delete_user, handlers::admin::reset_password,
        handlers::admin::assign_group, handlers::admin::assign_association,
        handlers::admin::list_user_groups, handlers::admin::get_user_group,
        handlers::admin::create_user_group, handlers::admin::update_user_group,
        handlers::admin::delete_user_group,
    ),
    components(
        schemas(
            models::Association, models::UserGroup, models::UserGroupDetail, models::Campus,
            models::CampusDetail, models::Student, models::User,
            models::RegisterAssociationRequest, models::LoginRequest, models::AuthResponse,
            models::CreateUserRequest, models::UpdateUserRequest, models::AssignGroupRequest,
            models::AssignAssociationRequest, models::CreateUserGroupRequest,
            models::UpdateUserGroupRequest, models::CreateCampusRequest,
            models::UpdateCampusRequest, models::CreateStudentRequest,
            models::UpdateStudentRequest, models::MyAssociationResponse, models::MessageResponse,
        )
    ),
    tags(
        (name = "campus-portal", description = "Multi-tenant campus and student management API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cloneable container of everything a request needs. Handlers pull the part
/// they use through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Persistence layer (Postgres or in-memory).
    pub repo: RepositoryState,
    /// Transactional email sender.
    pub mailer: MailerState,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 unless a `Caller` can be resolved from it. The handler
/// then extracts the `Caller` again for its own decisions.
async fn auth_middleware(_caller: Caller, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware, and registers
/// the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Admin handlers extract `Caller` themselves and check the tier via the policy.
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer`, correlating every log line of a request by its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
