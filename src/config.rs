use std::env;

const LOCAL_JWT_SECRET: &str = "campus-portal-local-development-secret";
const LOCAL_MAIL_API_URL: &str = "http://localhost:8025/api/send";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at startup and
/// immutable afterwards; pulled into request handling via FromRef (identity resolution
/// reads the JWT settings, the mailer the mail settings).
#[derive(Clone)]
pub struct AppConfig {
    // Runtime environment marker. Controls the local `x-user-id` bypass and log format.
    pub env: Env,
    // Database connection string (Postgres). Local runs without one use the in-memory store.
    pub db_url: Option<String>,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
    // HS256 secret used to sign and verify bearer tokens.
    pub jwt_secret: String,
    // Validity window of issued tokens.
    pub token_ttl_days: i64,
    // Transactional mail HTTP API endpoint and bearer key.
    pub mail_api_url: String,
    pub mail_api_key: String,
    // Sender address of outgoing mail.
    pub mail_from: String,
    // Base URL of the frontend, used for links in emails.
    pub frontend_url: String,
}

/// Env
///
/// Runtime context: development conveniences in `Local`, hardened defaults in `Production`.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// default
    ///
    /// Safe, non-panicking configuration for tests; no environment variables are read.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            mail_api_url: LOCAL_MAIL_API_URL.to_string(),
            mail_api_key: "test-mail-key".to_string(),
            mail_from: "no-reply@campus.local".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables (after `dotenv`).
    ///
    /// # Panics
    /// In `Production`, panics when `DATABASE_URL`, `JWT_SECRET`, `MAIL_API_URL` or
    /// `MAIL_API_KEY` is missing, and on a malformed `TOKEN_TTL_DAYS` in any mode.
    pub fn load() -> Self {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let token_ttl_days = match env::var("TOKEN_TTL_DAYS") {
            Ok(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .expect("FATAL: TOKEN_TTL_DAYS must be a positive integer."),
            Err(_) => DEFAULT_TOKEN_TTL_DAYS,
        };

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let mail_from =
            env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@campus.local".to_string());
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        match env {
            Env::Local => Self {
                env: Env::Local,
                db_url: env::var("DATABASE_URL").ok(),
                bind_addr,
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
                token_ttl_days,
                mail_api_url: env::var("MAIL_API_URL")
                    .unwrap_or_else(|_| LOCAL_MAIL_API_URL.to_string()),
                mail_api_key: env::var("MAIL_API_KEY").unwrap_or_else(|_| "local".to_string()),
                mail_from,
                frontend_url,
            },
            Env::Production => Self {
                env: Env::Production,
                db_url: Some(required("DATABASE_URL")),
                bind_addr,
                jwt_secret: required("JWT_SECRET"),
                token_ttl_days,
                mail_api_url: required("MAIL_API_URL"),
                mail_api_key: required("MAIL_API_KEY"),
                mail_from,
                frontend_url,
            },
        }
    }
}

fn required(var: &str) -> String {
    env::var(var).unwrap_or_else(|_| panic!("FATAL: {var} must be set in production."))
}
