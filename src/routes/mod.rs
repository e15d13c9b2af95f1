/// Router Module Index
///
/// Routing split by who may reach a route. Authentication is applied per module
/// (via Axum layers or the `Caller` extractor); finer decisions belong to the engine.

/// Routes reachable without credentials.
pub mod public;

/// Routes behind the `Caller` auth middleware.
pub mod authenticated;

/// User and user-group administration, gated by the role policy.
pub mod admin;
