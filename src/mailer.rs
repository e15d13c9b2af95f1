use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::config::AppConfig;

const WELCOME_SUBJECT: &str = "Welcome to Campus Management System - Account Created";
const PASSWORD_RESET_SUBJECT: &str = "Password Reset - Campus Management System";

/// WelcomeEmail
///
/// Sent when an administrator creates an account. Carries the temporary password in clear;
/// not `Debug`.
#[derive(Clone)]
pub struct WelcomeEmail {
    pub to: String,
    pub first_name: String,
    pub username: String,
    pub temporary_password: String,
}

/// PasswordResetEmail
#[derive(Clone)]
pub struct PasswordResetEmail {
    pub to: String,
    pub first_name: String,
    pub temporary_password: String,
}

// 1. Mailer Contract
/// Mailer
///
/// The transactional email collaborator. Both operations report success or failure, but
/// callers treat delivery as best-effort: a failure is logged and never undoes the write
/// that triggered the email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome_email(&self, email: &WelcomeEmail) -> Result<(), String>;
    async fn send_password_reset_email(&self, email: &PasswordResetEmail) -> Result<(), String>;
}

/// OutgoingMessage
///
/// The JSON body posted to the mail API.
#[derive(Debug, Serialize, PartialEq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn login_link(frontend_url: &str) -> String {
    format!("{}/login", frontend_url.trim_end_matches('/'))
}

pub fn render_welcome(email: &WelcomeEmail, from: &str, frontend_url: &str) -> OutgoingMessage {
    let login = login_link(frontend_url);
    OutgoingMessage {
        from: from.to_string(),
        to: email.to.clone(),
        subject: WELCOME_SUBJECT.to_string(),
        text: format!(
            "Welcome to Campus Management System!\n\n\
             Hello {first},\n\n\
             Your account has been created by an administrator.\n\n\
             Username: {user}\n\
             Temporary Password: {password}\n\n\
             Please change your password immediately after logging in.\n\n\
             You can log in at: {login}\n\n\
             If you did not request this account, please contact your administrator.\n\n\
             Best regards,\nCampus Management System\n",
            first = email.first_name,
            user = email.username,
            password = email.temporary_password,
        ),
        html: format!(
            "<h2>Welcome to Campus Management System!</h2>\
             <p>Hello {first},</p>\
             <p>Your account has been created by an administrator.</p>\
             <p><strong>Username:</strong> {user}</p>\
             <p><strong>Temporary Password:</strong> {password}</p>\
             <p><strong>Please change your password immediately after logging in.</strong></p>\
             <p>You can log in at: <a href=\"{login}\">Login Page</a></p>\
             <p>Best regards,<br>Campus Management System</p>",
            first = email.first_name,
            user = email.username,
            password = email.temporary_password,
        ),
    }
}

pub fn render_password_reset(email: &PasswordResetEmail, from: &str, frontend_url: &str) -> OutgoingMessage {
    let login = login_link(frontend_url);
    OutgoingMessage {
        from: from.to_string(),
        to: email.to.clone(),
        subject: PASSWORD_RESET_SUBJECT.to_string(),
        text: format!(
            "Password Reset\n\n\
             Hello {first},\n\n\
             Your password has been reset by an administrator.\n\n\
             New Temporary Password: {password}\n\n\
             Please change your password immediately after logging in.\n\n\
             You can log in at: {login}\n\n\
             If you did not request this password reset, please contact your administrator immediately.\n\n\
             Best regards,\nCampus Management System\n",
            first = email.first_name,
            password = email.temporary_password,
        ),
        html: format!(
            "<h2>Password Reset</h2>\
             <p>Hello {first},</p>\
             <p>Your password has been reset by an administrator.</p>\
             <p><strong>New Temporary Password:</strong> {password}</p>\
             <p><strong>Please change your password immediately after logging in.</strong></p>\
             <p>You can log in at: <a href=\"{login}\">Login Page</a></p>\
             <p>Best regards,<br>Campus Management System</p>",
            first = email.first_name,
            password = email.temporary_password,
        ),
    }
}

// 2. The Real Implementation (HTTP mail API)
/// HttpMailer
///
/// Posts messages to a transactional mail HTTP API, authenticated with a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
    frontend_url: String,
}

impl HttpMailer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.mail_api_url.clone(),
            api_key: config.mail_api_key.clone(),
            from: config.mail_from.clone(),
            frontend_url: config.frontend_url.clone(),
        }
    }

    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), String> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| format!("mail API unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("mail API rejected message: {}", response.status()));
        }
        tracing::debug!(subject = %message.subject, "email accepted by mail API");
        Ok(())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_welcome_email(&self, email: &WelcomeEmail) -> Result<(), String> {
        self.deliver(&render_welcome(email, &self.from, &self.frontend_url))
            .await
    }

    async fn send_password_reset_email(&self, email: &PasswordResetEmail) -> Result<(), String> {
        self.deliver(&render_password_reset(email, &self.from, &self.frontend_url))
            .await
    }
}

// 3. The Mock Implementation (For Tests)
/// SentEmail
#[derive(Clone)]
pub enum SentEmail {
    Welcome(WelcomeEmail),
    PasswordReset(PasswordResetEmail),
}

/// MockMailer
///
/// Records every email it is asked to send. A failing mock still records the attempt.
#[derive(Clone, Default)]
pub struct MockMailer {
    /// When true, every send returns a simulated failure.
    pub should_fail: bool,
    pub sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    fn record(&self, email: SentEmail) -> Result<(), String> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email);
        }
        if self.should_fail {
            return Err("Mock Mailer Error: Simulation requested".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_welcome_email(&self, email: &WelcomeEmail) -> Result<(), String> {
        self.record(SentEmail::Welcome(email.clone()))
    }

    async fn send_password_reset_email(&self, email: &PasswordResetEmail) -> Result<(), String> {
        self.record(SentEmail::PasswordReset(email.clone()))
    }
}

/// MailerState
///
/// The concrete type used to share the mailer across the application state.
pub type MailerState = Arc<dyn Mailer>;
