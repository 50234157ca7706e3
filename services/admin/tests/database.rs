//! End-to-end tests against a live PostgreSQL server reachable through
//! `DATABASE_URL` (or the `DB_*` variables). Each test works on uniquely
//! named rows so runs do not interfere.

use admin::{
    audit::{AuditLogger, LOG_PAGE_SIZE, LogFilter, LogMetadata, LogQuery},
    identity::IdentityResolver,
    jwt::{JwtConfig, JwtService},
    models::{NewOrganization, NewProject, NewUser, UserRole},
    password::PasswordHasher,
    repositories::{OrganizationRepository, ProjectRepository, RepositoryError, UserRepository},
    routes::create_router,
    state::AppState,
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use common::database::{DatabaseConfig, init_pool, run_migrations};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::{PgPool, migrate::Migrator};
use tower::ServiceExt;
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn pool() -> PgPool {
    let config = DatabaseConfig::from_env().unwrap();
    let pool = init_pool(&config).await.unwrap();
    run_migrations(&pool, &MIGRATOR).await.unwrap();
    pool
}

fn app(pool: PgPool) -> Router {
    let jwt = JwtService::new(&JwtConfig {
        secret: "database-tests-secret-that-is-long-enough".to_string(),
        expiry: 3600,
    });
    create_router(AppState::new(
        pool,
        IdentityResolver::Token(jwt),
        PasswordHasher::new(false),
        None,
    ))
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn new_user(username: &str, role: UserRole) -> NewUser {
    NewUser {
        username: username.to_string(),
        password_hash: PasswordHasher::new(false).hash("pw123").unwrap(),
        email: format!("{}@example.com", username),
        full_name: username.to_string(),
        phone: String::new(),
        is_active: true,
        role,
        org_id: None,
        created_by: None,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_register_login_and_profile() {
    let app = app(pool().await);
    let username = unique("alice");

    let (status, body) = send(
        &app,
        post_json(
            "/api/register",
            None,
            json!({
                "username": username,
                "password": "pw123",
                "email": format!("{}@example.com", username),
                "full_name": "Alice",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert!(body["user_id"].is_string());

    let (status, _) = send(
        &app,
        post_json(
            "/api/login",
            None,
            json!({ "username": username, "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        post_json(
            "/api/login",
            None,
            json!({ "username": username, "password": "pw123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user"].get("password_hash").is_none());
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Request::get("/api/users/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], username.as_str());
    assert!(body.get("password_hash").is_none());
    assert!(!body.to_string().contains("argon2"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_registration_creates_one_user() {
    let app = app(pool().await);
    let username = unique("race");

    let attempts = (0..4).map(|i| {
        let app = app.clone();
        let request = post_json(
            "/api/register",
            None,
            json!({
                "username": username,
                "password": "pw123",
                "email": format!("{}_{}@example.com", username, i),
                "full_name": "Racer",
            }),
        );
        tokio::spawn(async move { send(&app, request).await.0 })
    });

    let mut created = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            StatusCode::CREATED => created += 1,
            status => assert_eq!(status, StatusCode::CONFLICT),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_organization_admin_insert_rolls_back_organization() {
    let pool = pool().await;
    let users = UserRepository::new(pool.clone());
    let organizations = OrganizationRepository::new(pool.clone());

    let creator = users.create(&new_user(&unique("creator"), UserRole::Admin)).await.unwrap();
    let taken = users.create(&new_user(&unique("taken"), UserRole::User)).await.unwrap();

    let name = unique("Org");
    let result = organizations
        .create_with_admin(
            &NewOrganization {
                name: name.clone(),
                description: String::new(),
                parent_id: None,
            },
            creator.id,
            new_user(&taken.username, UserRole::Admin),
        )
        .await;
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    assert!(!organizations.name_taken(&name, None).await.unwrap());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_organization_delete_is_refused_while_projects_exist() {
    let pool = pool().await;
    let users = UserRepository::new(pool.clone());
    let organizations = OrganizationRepository::new(pool.clone());
    let projects = ProjectRepository::new(pool.clone());

    let creator = users.create(&new_user(&unique("creator"), UserRole::Admin)).await.unwrap();
    let (organization, admin) = organizations
        .create_with_admin(
            &NewOrganization {
                name: unique("Org"),
                description: String::new(),
                parent_id: None,
            },
            creator.id,
            new_user(&unique("admin"), UserRole::Admin),
        )
        .await
        .unwrap();
    assert_eq!(admin.org_id, Some(organization.id));

    users.soft_delete(admin.id).await.unwrap();
    let project = projects
        .create(&NewProject {
            name: unique("Project"),
            description: String::new(),
            start_date: Utc::now(),
            end_date: None,
            status: "active".to_string(),
            organization_id: organization.id,
        })
        .await
        .unwrap();

    let refused = organizations.soft_delete(organization.id).await;
    assert!(matches!(refused, Err(RepositoryError::Invalid(_))));

    projects.soft_delete(project.id).await.unwrap();
    organizations.soft_delete(organization.id).await.unwrap();
    assert!(organizations.find_by_id(organization.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_audit_trail_is_filterable() {
    let pool = pool().await;
    let app = app(pool.clone());
    let username = unique("audited");

    let (status, _) = send(
        &app,
        post_json(
            "/api/register",
            None,
            json!({
                "username": username,
                "password": "pw123",
                "email": format!("{}@example.com", username),
                "full_name": "Audited",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let filter = LogFilter::try_from(LogQuery {
        level: Some("DB".to_string()),
        keyword: Some(username.clone()),
        ..LogQuery::default()
    })
    .unwrap();
    let facts = AuditLogger::new(pool.clone()).list(&filter).await.unwrap();
    assert!(!facts.is_empty());
    assert!(facts.iter().all(|entry| entry.message.contains(&username)));

    let filter = LogFilter::try_from(LogQuery {
        level: Some("INFO".to_string()),
        keyword: Some(username.clone()),
        ..LogQuery::default()
    })
    .unwrap();
    let entries = AuditLogger::new(pool).list(&filter).await.unwrap();
    assert_eq!(entries.len(), 1, "one registration is one audit entry");
    assert_eq!(entries[0].kind, "fact");
}

/// Sign in through the API as a freshly created admin
async fn admin_token(pool: &PgPool, app: &Router) -> String {
    let users = UserRepository::new(pool.clone());
    let admin = users.create(&new_user(&unique("root"), UserRole::Admin)).await.unwrap();

    let (status, body) = send(
        app,
        post_json(
            "/api/login",
            None,
            json!({ "username": admin.username, "password": "pw123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_organization_with_members_cannot_be_deleted() {
    let pool = pool().await;
    let app = app(pool.clone());
    let token = admin_token(&pool, &app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/organizations",
            Some(&token),
            json!({ "name": unique("Org") }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let org_id = body["organization"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["admin_user"]["user"]["org_id"], org_id.as_str());

    let delete = |uri: String| {
        Request::delete(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, delete(format!("/api/organizations/{}", org_id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Organization still has member users");

    let admin_id = sole_member_id(&pool, &org_id).await;
    let (status, _) = send(&app, delete(format!("/api/users/{}", admin_id))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, delete(format!("/api/organizations/{}", org_id))).await;
    assert_eq!(status, StatusCode::OK);
}

async fn sole_member_id(pool: &PgPool, org_id: &str) -> Uuid {
    let org_id: Uuid = org_id.parse().unwrap();
    let members = UserRepository::new(pool.clone()).list_by_org(org_id).await.unwrap();
    assert_eq!(members.len(), 1);
    members[0].id
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_error_logs_filtered_by_keyword() {
    let pool = pool().await;
    let app = app(pool.clone());
    let audit = AuditLogger::new(pool.clone());
    let marker = unique("intruder");

    let (status, _) = send(
        &app,
        post_json(
            "/api/login",
            None,
            json!({ "username": marker, "password": "guess" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    audit
        .error(
            "gateway",
            &format!("Rejected LOGIN burst from {}", marker),
            LogMetadata::new("throttle"),
        )
        .await;
    audit
        .info(
            "gateway",
            &format!("login page served to {}", marker),
            LogMetadata::new("render"),
        )
        .await;

    let filter = LogFilter::try_from(LogQuery {
        level: Some("ERROR".to_string()),
        keyword: Some("login".to_string()),
        ..LogQuery::default()
    })
    .unwrap();
    let entries = audit.list(&filter).await.unwrap();

    assert!(entries.len() as i64 <= LOG_PAGE_SIZE);
    assert!(entries.iter().all(|entry| entry.level == "ERROR"));
    assert!(entries.iter().all(|entry| {
        entry.message.to_lowercase().contains("login")
            || entry.metadata.to_string().to_lowercase().contains("login")
    }));
    assert!(
        entries
            .windows(2)
            .all(|pair| (pair[0].created_at, pair[0].id) >= (pair[1].created_at, pair[1].id))
    );

    let ours: Vec<_> = entries
        .iter()
        .filter(|entry| entry.message.contains(&marker))
        .collect();
    assert_eq!(ours.len(), 2, "failed login and upper-case LOGIN entry");
    assert!(ours[0].message.contains("LOGIN"));
    assert!(ours[1].message.starts_with("Login failed"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_organization_parent_can_be_cleared() {
    let pool = pool().await;
    let app = app(pool.clone());
    let token = admin_token(&pool, &app).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = send(
            &app,
            post_json(
                "/api/organizations",
                Some(&token),
                json!({ "name": unique("Org"), "parent_id": ids.first() }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        ids.push(body["organization"]["id"].as_str().unwrap().to_string());
    }

    let update = |payload: Value| {
        Request::put(format!("/api/organizations/{}", ids[1]))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let (status, body) = send(&app, update(json!({ "description": "kept" }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["parent_id"], ids[0].as_str());

    let (status, body) = send(&app, update(json!({ "parent_id": null }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body["parent_id"].is_null());
}
