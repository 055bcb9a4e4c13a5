use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginForm, PublicUser, SignupRequest, TokenResponse},
        extractors::CurrentUser,
        jwt::JwtKeys,
        password::hash_password,
        repo_types::User,
        services::{authenticate, is_valid_email},
    },
    dto::Message,
    error::{AppError, AppResult},
    extract::{FormBody, JsonBody},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(login_for_access_token))
        .route("/user/signup", post(signup))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/user/me", get(read_user_me))
}

#[instrument(skip(state, form), fields(username = %form.username))]
pub async fn login_for_access_token(
    State(state): State<AppState>,
    FormBody(form): FormBody<LoginForm>,
) -> AppResult<Json<TokenResponse>> {
    let user = authenticate(&state.users, form.username.trim(), &form.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let issued = keys.issue(&user.username)?;

    info!(username = %user.username, expires_at = %issued.expires_at, "token issued");
    Ok(Json(issued.into()))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<SignupRequest>,
) -> AppResult<Json<Message>> {
    payload.username = payload.username.trim().to_string();
    if payload.username.is_empty() {
        return Err(AppError::BadRequest("Username must not be empty".into()));
    }
    if payload.password.is_empty() {
        return Err(AppError::BadRequest("Password must not be empty".into()));
    }
    if let Some(email) = payload.email.as_deref() {
        if !is_valid_email(email) {
            warn!(%email, "invalid email");
            return Err(AppError::BadRequest("Invalid email".into()));
        }
    }

    if state.users.find_by_username(&payload.username).await?.is_some() {
        warn!("username already registered");
        return Err(AppError::Conflict(format!(
            "User {} already exists",
            payload.username
        )));
    }

    let hashed_password = hash_password(&payload.password).map_err(AppError::Internal)?;
    let user = User {
        username: payload.username,
        hashed_password,
        disabled: payload.disabled,
        full_name: payload.full_name,
        email: payload.email,
    };
    // a concurrent signup for the same name loses on the unique index
    let id = state.users.create(&user).await?;

    info!(username = %user.username, %id, "user registered");
    Ok(Json(Message::new(format!(
        "Successfully created new user {} and added to DB!",
        user.username
    ))))
}

#[instrument(skip_all, fields(username = %user.username))]
pub async fn read_user_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{app::build_app, state::AppState};

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn signup_req(body: Value) -> Request<Body> {
        Request::post("/user/signup")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn login_req(username: &str, password: &str) -> Request<Body> {
        Request::post("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password={password}")))
            .unwrap()
    }

    fn me_req(token: &str) -> Request<Body> {
        Request::get("/user/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn app() -> Router {
        build_app(AppState::fake().await)
    }

    #[tokio::test]
    async fn signup_then_login_returns_token() {
        let app = app().await;
        let (status, body) = send(
            &app,
            signup_req(json!({
                "username": "johndoe",
                "password": "secret",
                "disabled": false,
                "full_name": "John Doe",
                "email": "johndoe@example.com"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("johndoe"));

        let (status, body) = send(&app, login_req("johndoe", "secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["access_token"].as_str().unwrap().split('.').count() == 3);
        assert!(body["expires_in"].as_i64().unwrap() > 0);
        assert!(body["expires_at"].is_string());
        assert!(body["updated_at"].is_string());
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let app = app().await;
        send(&app, signup_req(json!({"username": "johndoe", "password": "secret"}))).await;

        let (status, body) = send(&app, login_req("johndoe", "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status_code"], 401);

        let (status, _) = send(&app, login_req("nobody", "secret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn incomplete_login_form_gets_a_json_error_body() {
        let app = app().await;
        let req = Request::post("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=johndoe"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status_code"], 422);

        let req = Request::post("/user/signup")
            .body(Body::from(r#"{"username":"johndoe"}"#))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["status_code"], 415);
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let app = app().await;
        let user = json!({"username": "johndoe", "password": "secret"});
        send(&app, signup_req(user.clone())).await;
        let (status, _) = send(&app, signup_req(user)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn signup_rejects_invalid_email() {
        let app = app().await;
        let (status, _) = send(
            &app,
            signup_req(json!({"username": "johndoe", "password": "secret", "email": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn me_returns_public_user_without_hash() {
        let app = app().await;
        send(
            &app,
            signup_req(json!({"username": "johndoe", "password": "secret", "full_name": "John Doe"})),
        )
        .await;
        let (_, token) = send(&app, login_req("johndoe", "secret")).await;
        let token = token["access_token"].as_str().unwrap();

        let (status, body) = send(&app, me_req(token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "johndoe");
        assert_eq!(body["full_name"], "John Doe");
        assert!(body.get("hashed_password").is_none());
    }

    #[tokio::test]
    async fn me_rejects_missing_and_forged_tokens() {
        let app = app().await;
        let req = Request::get("/user/me").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, me_req("johndoe")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disabled_user_can_login_but_not_use_me() {
        let app = app().await;
        send(
            &app,
            signup_req(json!({"username": "alice", "password": "secret", "disabled": true})),
        )
        .await;
        let (status, token) = send(&app, login_req("alice", "secret")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, me_req(token["access_token"].as_str().unwrap())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Inactive user");
    }
}
