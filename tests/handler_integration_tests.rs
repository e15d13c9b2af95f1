mod common;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use campus_portal::{
    ApiError, MockMailer,
    handlers::{admin, associations, auth, campuses},
    mailer::SentEmail,
    models::{
        CreateCampusRequest, CreateUserRequest, DEFAULT_CAMPUS_IMAGE, LoginRequest,
        RegisterAssociationRequest, UpdateUserRequest,
    },
    password::verify_password,
};
use common::{TestApp, caller, unique};
use uuid::Uuid;

fn new_user_request(password: Option<&str>) -> CreateUserRequest {
    let username = unique("newbie");
    CreateUserRequest {
        email: format!("{username}@campus.test"),
        username,
        password: password.map(str::to_string),
        first_name: "New".to_string(),
        last_name: "Bie".to_string(),
        ..Default::default()
    }
}

// --- Registration & Login ---

#[tokio::test]
async fn test_register_association_then_login_by_username_or_email() {
    let app = TestApp::new();
    let username = unique("founder");
    let payload = RegisterAssociationRequest {
        association_name: unique("Acme"),
        association_description: Some("Test association".to_string()),
        username: username.clone(),
        email: format!("{username}@acme.test"),
        password: "correct-horse".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Founder".to_string(),
    };

    let (status, Json(registered)) =
        auth::register_association(State(app.state.clone()), Json(payload.clone()))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert!(registered.user.is_association_admin);
    assert!(registered.user.association_id.is_some());

    for login in [payload.username.clone(), payload.email.clone()] {
        let Json(session) = auth::login(
            State(app.state.clone()),
            Json(LoginRequest {
                username: login,
                password: "correct-horse".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(session.user.id, registered.user.id);
    }

    let err = auth::login(
        State(app.state.clone()),
        Json(LoginRequest {
            username: payload.username.clone(),
            password: "wrong-horse".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::Unauthenticated("Invalid credentials".into()));

    // Duplicate association names are rejected before anything is written.
    let duplicate = RegisterAssociationRequest {
        username: unique("second"),
        email: format!("{}@acme.test", unique("second")),
        ..payload
    };
    let err = auth::register_association(State(app.state.clone()), Json(duplicate))
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::Validation("Association name already exists".into()));
}

#[tokio::test]
async fn test_unknown_login_is_indistinguishable_from_wrong_password() {
    let app = TestApp::new();
    let err = auth::login(
        State(app.state.clone()),
        Json(LoginRequest {
            username: "nobody".to_string(),
            password: "whatever-pass".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::Unauthenticated("Invalid credentials".into()));
}

// --- User Administration ---

#[tokio::test]
async fn test_create_user_without_password_sends_welcome_email() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;

    let (status, Json(user)) = admin::create_user(
        caller(&admin),
        State(app.state.clone()),
        Json(new_user_request(None)),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user.association_id, Some(acme.id));

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    let SentEmail::Welcome(email) = &sent[0] else {
        panic!("expected a welcome email");
    };
    assert_eq!(email.to, user.email);
    assert_eq!(email.username, user.username);

    let stored = app.repo.get_user(user.id).await.unwrap().unwrap();
    assert!(verify_password(&email.temporary_password, &stored.password_hash).unwrap());
}

#[tokio::test]
async fn test_create_user_with_password_sends_nothing() {
    let app = TestApp::new();
    let (_, admin) = app.association("acme").await;

    let (status, _) = admin::create_user(
        caller(&admin),
        State(app.state.clone()),
        Json(new_user_request(Some("chosen-password"))),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_mail_failure_does_not_fail_user_creation() {
    let app = TestApp::with_mailer(MockMailer::new_failing());
    let (acme, admin) = app.association("acme").await;

    let (status, Json(user)) = admin::create_user(
        caller(&admin),
        State(app.state.clone()),
        Json(new_user_request(None)),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.mailer.sent().len(), 1);
    assert!(
        app.repo
            .list_users(acme.id)
            .await
            .unwrap()
            .iter()
            .any(|u| u.id == user.id)
    );
}

#[tokio::test]
async fn test_duplicate_username_is_a_validation_error() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;
    let existing = app.member(acme.id, None, "taken").await;

    let mut payload = new_user_request(Some("chosen-password"));
    payload.username = existing.username.clone();
    let err = admin::create_user(caller(&admin), State(app.state.clone()), Json(payload))
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::Validation("Username already exists".into()));
}

#[tokio::test]
async fn test_group_admin_cannot_grant_association_admin() {
    let app = TestApp::new();
    let (acme, _) = app.association("acme").await;
    let ga = app.group_admin(acme.id, None, "ga").await;
    let member = app.member(acme.id, None, "m").await;

    let mut payload = new_user_request(Some("chosen-password"));
    payload.is_association_admin = true;
    let err = admin::create_user(caller(&ga), State(app.state.clone()), Json(payload))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let err = admin::update_user(
        caller(&ga),
        State(app.state.clone()),
        Path(member.id),
        Json(UpdateUserRequest {
            is_association_admin: Some(true),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    // The group-admin flag is within a group admin's reach.
    let Json(promoted) = admin::update_user(
        caller(&ga),
        State(app.state.clone()),
        Path(member.id),
        Json(UpdateUserRequest {
            is_group_admin: Some(true),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert!(promoted.is_group_admin);
}

#[tokio::test]
async fn test_group_admin_cannot_manage_association_admin() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;
    let ga = app.group_admin(acme.id, None, "ga").await;

    let err = admin::update_user(
        caller(&ga),
        State(app.state.clone()),
        Path(admin.id),
        Json(UpdateUserRequest {
            first_name: Some("Demoted".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let err = admin::reset_password(caller(&ga), State(app.state.clone()), Path(admin.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_member_cannot_use_admin_operations() {
    let app = TestApp::new();
    let (acme, _) = app.association("acme").await;
    let member = app.member(acme.id, None, "m").await;

    let err = admin::create_user(
        caller(&member),
        State(app.state.clone()),
        Json(new_user_request(None)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let err = admin::list_users(caller(&member), State(app.state.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_cannot_delete_own_account() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;
    let member = app.member(acme.id, None, "m").await;

    let err = admin::delete_user(caller(&admin), State(app.state.clone()), Path(admin.id))
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::Validation("Cannot delete your own account".into()));

    let status = admin::delete_user(caller(&admin), State(app.state.clone()), Path(member.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.repo.get_user(member.id).await.unwrap().is_none());

    let err = admin::delete_user(caller(&admin), State(app.state.clone()), Path(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_reset_password_replaces_hash_and_mails_it() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;
    let member = app.member(acme.id, None, "m").await;

    let Json(response) =
        admin::reset_password(caller(&admin), State(app.state.clone()), Path(member.id))
            .await
            .unwrap();
    assert!(response.message.starts_with("Password reset successfully"));

    let sent = app.mailer.sent();
    let SentEmail::PasswordReset(email) = &sent[0] else {
        panic!("expected a password reset email");
    };
    assert_eq!(email.to, member.email);
    let stored = app.repo.get_user(member.id).await.unwrap().unwrap();
    assert_ne!(stored.password_hash, member.password_hash);
    assert!(verify_password(&email.temporary_password, &stored.password_hash).unwrap());
}

#[tokio::test]
async fn test_reset_password_survives_mail_failure() {
    let app = TestApp::with_mailer(MockMailer::new_failing());
    let (acme, admin) = app.association("acme").await;
    let member = app.member(acme.id, None, "m").await;

    let result = admin::reset_password(caller(&admin), State(app.state.clone()), Path(member.id)).await;
    assert!(result.is_ok());
    assert_eq!(app.mailer.sent().len(), 1);
}

// --- Campuses & Associations ---

#[tokio::test]
async fn test_only_association_admins_create_campuses() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;
    let ga = app.group_admin(acme.id, None, "ga").await;
    let request = CreateCampusRequest {
        name: "North".to_string(),
        address: "1 North Road".to_string(),
        description: None,
        image_url: None,
    };

    let err = campuses::create_campus(caller(&ga), State(app.state.clone()), Json(request.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let (status, Json(campus)) =
        campuses::create_campus(caller(&admin), State(app.state.clone()), Json(request))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campus.association_id, acme.id);
    assert_eq!(campus.image_url, DEFAULT_CAMPUS_IMAGE);
}

#[tokio::test]
async fn test_invalid_campus_input_is_rejected() {
    let app = TestApp::new();
    let (_, admin) = app.association("acme").await;

    let err = campuses::create_campus(
        caller(&admin),
        State(app.state.clone()),
        Json(CreateCampusRequest {
            name: "   ".to_string(),
            address: "1 Road".to_string(),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::Validation("name is required".into()));
}

#[tokio::test]
async fn test_association_lookup() {
    let app = TestApp::new();
    let (acme, admin) = app.association("acme").await;

    let Json(found) =
        associations::get_association(caller(&admin), State(app.state.clone()), Path(acme.id))
            .await
            .unwrap();
    assert_eq!(found.name, acme.name);

    let err = associations::get_association(
        caller(&admin),
        State(app.state.clone()),
        Path(Uuid::new_v4()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_user_without_association_has_no_my_association() {
    let app = TestApp::new();
    let (acme, _) = app.association("acme").await;
    let member = app.member(acme.id, None, "m").await;
    let mut orphan = caller(&member);
    orphan.association_id = None;

    let err = associations::get_my_association(orphan, State(app.state.clone()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::NotFound("User is not associated with any association".into())
    );
}
