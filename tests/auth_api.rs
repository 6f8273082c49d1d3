use actix_web::{cookie::Cookie, test, web, App};
use fintrack_server::{AppState, MemoryStore, Settings};
use serde_json::{json, Value};

fn state() -> AppState {
    let config = Settings::new_for_test().expect("Failed to load test config");
    AppState::in_memory(config, MemoryStore::new()).expect("Failed to build state")
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(fintrack_server::configure),
        )
        .await
    };
}

fn register_body() -> Value {
    json!({
        "email": "test@example.com",
        "password": "password123",
        "fullName": "Test User"
    })
}

#[actix_web::test]
async fn test_register_and_login() {
    let state = state();
    let app = app!(state);

    // Test registration
    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;

    assert_eq!(register_response.status(), 200);
    assert!(register_response.response().cookies().any(|c| c.name() == "refreshToken"));
    let register_body: Value = test::read_body_json(register_response).await;
    assert_eq!(register_body["success"], true);
    assert!(register_body["data"]["accessToken"].is_string());
    assert_eq!(register_body["data"]["type"], "Bearer");
    assert_eq!(register_body["data"]["fullName"], "Test User");

    // Test login
    let login_response = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({
            "email": "test@example.com",
            "password": "password123"
        }))
        .send_request(&app)
        .await;

    assert_eq!(login_response.status(), 200);
    let cookie = login_response
        .response()
        .cookies()
        .find(|c| c.name() == "refreshToken")
        .map(|c| c.into_owned())
        .expect("refresh cookie set");
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.path(), Some("/"));

    let login_body: Value = test::read_body_json(login_response).await;
    assert_eq!(login_body["message"], "Login successful");
    assert_eq!(login_body["data"]["refreshToken"], cookie.value());
}

#[actix_web::test]
async fn test_login_failures_look_alike() {
    let state = state();
    let app = app!(state);

    test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;

    let unknown = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "nonexistent@example.com", "password": "wrongpassword" }))
        .send_request(&app)
        .await;
    assert_eq!(unknown.status(), 401);
    let unknown_body: Value = test::read_body_json(unknown).await;

    let wrong = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "test@example.com", "password": "wrongpassword" }))
        .send_request(&app)
        .await;
    assert_eq!(wrong.status(), 401);
    let wrong_body: Value = test::read_body_json(wrong).await;

    assert_eq!(unknown_body["message"], wrong_body["message"]);
    assert_eq!(unknown_body["success"], false);
}

#[actix_web::test]
async fn test_repeated_failures_lock_account() {
    let state = state();
    let app = app!(state);

    test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;

    let mut last_status = 0;
    for _ in 0..5 {
        let response = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "test@example.com", "password": "wrong" }))
            .send_request(&app)
            .await;
        last_status = response.status().as_u16();
    }
    assert_eq!(last_status, 423);

    let response = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "test@example.com", "password": "password123" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 423);
}

#[actix_web::test]
async fn test_invalid_registration() {
    let state = state();
    let app = app!(state);

    let response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "email": "test@example.com",
            "password": "",  // Empty password should fail
            "fullName": "Test User"
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn test_duplicate_registration_conflicts() {
    let state = state();
    let app = app!(state);

    let first = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    assert_eq!(first.status(), 200);

    let second = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    assert_eq!(second.status(), 409);
}

#[actix_web::test]
async fn test_refresh_token_from_cookie() {
    let state = state();
    let app = app!(state);

    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    let register_body: Value = test::read_body_json(register_response).await;
    let refresh_token = register_body["data"]["refreshToken"].as_str().unwrap().to_string();

    let response = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .cookie(Cookie::new("refreshToken", refresh_token.clone()))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = test::read_body_json(response).await;
    assert!(body["data"]["accessToken"].is_string());
    assert_ne!(body["data"]["refreshToken"], refresh_token.as_str());

    // The rotated-out token no longer works
    let replay = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .cookie(Cookie::new("refreshToken", refresh_token))
        .send_request(&app)
        .await;
    assert_eq!(replay.status(), 401);
}

#[actix_web::test]
async fn test_refresh_token_from_body() {
    let state = state();
    let app = app!(state);

    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    let register_body: Value = test::read_body_json(register_response).await;
    let refresh_token = register_body["data"]["refreshToken"].as_str().unwrap();

    let response = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .set_json(json!({ "refreshToken": refresh_token }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
}

#[actix_web::test]
async fn test_refresh_token_missing() {
    let state = state();
    let app = app!(state);

    let response = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 403);
}

#[actix_web::test]
async fn test_logout() {
    let state = state();
    let app = app!(state);

    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    let register_body: Value = test::read_body_json(register_response).await;
    let refresh_token = register_body["data"]["refreshToken"].as_str().unwrap().to_string();

    // Test logout
    let logout_response = test::TestRequest::post()
        .uri("/api/auth/logout")
        .cookie(Cookie::new("refreshToken", refresh_token.clone()))
        .send_request(&app)
        .await;
    assert_eq!(logout_response.status(), 200);
    let cleared = logout_response
        .response()
        .cookies()
        .find(|c| c.name() == "refreshToken")
        .map(|c| c.into_owned())
        .expect("removal cookie set");
    assert_eq!(cleared.value(), "");

    // Verify the refresh token is revoked by trying to use it
    let refresh_response = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .cookie(Cookie::new("refreshToken", refresh_token))
        .send_request(&app)
        .await;
    assert_eq!(refresh_response.status(), 401);
}

#[actix_web::test]
async fn test_logout_without_cookie_is_ok() {
    let state = state();
    let app = app!(state);

    let response = test::TestRequest::post()
        .uri("/api/auth/logout")
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
}

#[actix_web::test]
async fn test_logout_all_requires_access_token() {
    let state = state();
    let app = app!(state);

    let anonymous = test::TestRequest::post()
        .uri("/api/auth/logout-all")
        .send_request(&app)
        .await;
    assert_eq!(anonymous.status(), 401);

    let forged = test::TestRequest::post()
        .uri("/api/auth/logout-all")
        .insert_header(("Authorization", "Bearer not-a-token"))
        .send_request(&app)
        .await;
    assert_eq!(forged.status(), 401);
}

#[actix_web::test]
async fn test_logout_all() {
    let state = state();
    let app = app!(state);

    let register_response = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(register_body())
        .send_request(&app)
        .await;
    let register_body: Value = test::read_body_json(register_response).await;
    let access_token = register_body["data"]["accessToken"].as_str().unwrap().to_string();
    let refresh_token = register_body["data"]["refreshToken"].as_str().unwrap().to_string();

    test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "test@example.com", "password": "password123" }))
        .send_request(&app)
        .await;

    let response = test::TestRequest::post()
        .uri("/api/auth/logout-all")
        .insert_header(("Authorization", format!("Bearer {}", access_token)))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["data"]["revoked"], 2);

    let refresh_response = test::TestRequest::post()
        .uri("/api/auth/refresh-token")
        .cookie(Cookie::new("refreshToken", refresh_token))
        .send_request(&app)
        .await;
    assert_eq!(refresh_response.status(), 401);
}
