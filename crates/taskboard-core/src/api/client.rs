//! API client for the taskboard REST API.
//!
//! Auth, board and task operations. Everything except login and signup goes
//! through the [`RequestGateway`], so an expired access token is refreshed
//! transparently.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use super::{ApiError, Navigator, RequestGateway};
use crate::auth::{CredentialStore, HttpRefreshClient};
use crate::config::Config;
use crate::models::{
    AuthRequest, Board, BoardUpdate, Me, NewBoard, NewTask, SignupResponse, Task, TaskQuery,
    TaskUpdate, TokenPair,
};

/// API client for the taskboard server.
/// Clone is cheap - the gateway shares its HTTP client, store and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    gateway: RequestGateway,
    base_url: Url,
}

impl ApiClient {
    pub fn new(gateway: RequestGateway, base_url: Url) -> Self {
        Self { gateway, base_url }
    }

    /// Wire up the HTTP client, refresh client and gateway from `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        let refresher = HttpRefreshClient::new(client.clone(), &base_url)
            .context("Failed to build refresh endpoint URL")?;
        let refresh_url = refresher.endpoint().clone();

        let gateway = RequestGateway::new(client, store, Arc::new(refresher), refresh_url)
            .with_navigator(navigator)
            .with_refresh_timeout(config.refresh_timeout())
            .with_logged_out_redirect(config.logged_out_redirect.as_str())
            .wipe_on_transient_failure(config.wipe_on_transient_refresh_failure);

        Ok(Self::new(gateway, base_url))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.gateway.store()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().is_authenticated()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid API path: {}", path))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.gateway.request(method, self.url(path)?))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to read response body from {}", url))?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// Send through the gateway: bearer header plus refresh on 401.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().context("Failed to build request")?;
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self
            .gateway
            .execute(request)
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send {} request to {}", method, url))?;
        Self::check_response(response).await
    }

    /// Send without credentials. A 401 here means bad email/password, not an
    /// expired session, so it must not trigger a refresh.
    async fn send_public(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().context("Failed to build request")?;
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self
            .gateway
            .execute_unauthenticated(request)
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send {} request to {}", method, url))?;
        Self::check_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        Self::parse_json(response).await
    }

    // ===== Auth =====

    /// Log in and store the returned token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let email = normalize_email(email);
        let builder = self.request(Method::POST, "login")?.json(&AuthRequest {
            email: &email,
            password,
        });
        let response = self.send_public(builder).await?;
        let tokens: TokenPair = Self::parse_json(response)
            .await
            .context("Failed to parse login response")?;

        self.store().set(tokens.access_token, tokens.refresh_token);
        info!("Logged in");
        Ok(())
    }

    /// Create an account. Tokens in the response are stored right away;
    /// otherwise the created account is returned and the caller logs in.
    pub async fn signup(&self, email: &str, password: &str) -> Result<SignupResponse> {
        let email = normalize_email(email);
        let builder = self.request(Method::POST, "signup")?.json(&AuthRequest {
            email: &email,
            password,
        });
        let response = self.send_public(builder).await?;
        let signup: SignupResponse = Self::parse_json(response)
            .await
            .context("Failed to parse signup response")?;

        if let SignupResponse::Tokens(ref tokens) = signup {
            self.store()
                .set(tokens.access_token.as_str(), tokens.refresh_token.as_str());
            info!("Signed up and logged in");
        } else {
            info!("Signed up");
        }
        Ok(signup)
    }

    /// End the session. Local credentials are cleared even when the server
    /// call fails.
    pub async fn logout(&self) -> Result<()> {
        let builder = self.request(Method::POST, "logout")?;
        match self.send(builder).await {
            Ok(_) => debug!("Server acknowledged logout"),
            Err(e) => warn!(error = %e, "Server-side logout failed, clearing local session anyway"),
        }
        self.store().clear();
        info!("Logged out");
        Ok(())
    }

    pub async fn me(&self) -> Result<Me> {
        self.get(self.request(Method::GET, "protected/me")?).await
    }

    // ===== Boards =====

    pub async fn list_boards(&self, search: Option<&str>) -> Result<Vec<Board>> {
        let mut builder = self.request(Method::GET, "GetBoards")?;
        if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
            builder = builder.query(&[("search", search)]);
        }
        // An empty list may come back as `null`
        let boards: Option<Vec<Board>> = self.get(builder).await?;
        Ok(boards.unwrap_or_default())
    }

    pub async fn create_board(&self, name: &str) -> Result<Board> {
        let builder = self
            .request(Method::POST, "CreateBoard")?
            .json(&NewBoard { name });
        self.get(builder).await
    }

    pub async fn update_board(&self, board_id: i64, update: &BoardUpdate) -> Result<Board> {
        let builder = self
            .request(Method::PATCH, &format!("boards/{}", board_id))?
            .json(update);
        self.get(builder).await
    }

    pub async fn delete_board(&self, board_id: i64) -> Result<()> {
        let builder = self.request(Method::DELETE, &format!("boards/{}", board_id))?;
        self.send(builder).await?;
        Ok(())
    }

    // ===== Tasks =====

    pub async fn list_tasks(&self, board_id: i64, query: &TaskQuery) -> Result<Vec<Task>> {
        let builder = self
            .request(Method::GET, &format!("boards/{}/GetTasks", board_id))?
            .query(query);
        let tasks: Option<Vec<Task>> = self.get(builder).await?;
        Ok(tasks.unwrap_or_default())
    }

    pub async fn create_task(&self, board_id: i64, task: &NewTask) -> Result<Task> {
        let builder = self
            .request(Method::POST, &format!("boards/{}/CreateTask", board_id))?
            .json(task);
        self.get(builder).await
    }

    pub async fn update_task(&self, board_id: i64, task_id: i64, update: &TaskUpdate) -> Result<Task> {
        let builder = self
            .request(Method::PATCH, &format!("boards/{}/tasks/{}", board_id, task_id))?
            .json(update);
        self.get(builder).await
    }

    pub async fn delete_task(&self, board_id: i64, task_id: i64) -> Result<()> {
        let builder = self.request(Method::DELETE, &format!("boards/{}/tasks/{}", board_id, task_id))?;
        self.send(builder).await?;
        Ok(())
    }
}

/// The server compares emails trimmed and lowercased.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::TracingNavigator;
    use crate::auth::{Credential, MemoryTokenPersistence};
    use crate::config::CredentialBackend;
    use crate::models::{SortBy, SortDir, TaskPriority, TaskStatus};

    fn api_for(server: &MockServer, credential: Credential) -> ApiClient {
        let config = Config {
            api_base_url: server.uri(),
            credential_backend: CredentialBackend::Memory,
            ..Config::default()
        };
        let store = Arc::new(CredentialStore::open(Arc::new(
            MemoryTokenPersistence::with_credential(credential),
        )));
        ApiClient::from_config(&config, store, Arc::new(TracingNavigator)).unwrap()
    }

    fn board_json(id: i64, name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "user_id": 1,
            "name": name,
            "created_at": "2025-03-01T10:00:00Z",
            "updated_at": "2025-03-01T10:00:00Z"
        })
    }

    fn task_json(id: i64, title: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "board_id": 4,
            "user_id": 1,
            "title": title,
            "status": "todo",
            "priority": "medium",
            "created_at": "2025-03-01T10:00:00Z",
            "updated_at": "2025-03-01T10:00:00Z"
        })
    }

    fn api_error(err: &anyhow::Error) -> &ApiError {
        err.downcast_ref::<ApiError>().expect("expected an ApiError")
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Kim@Example.COM "), "kim@example.com");
    }

    #[tokio::test]
    async fn test_login_stores_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(serde_json::json!({"email": "kim@example.com", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A1",
                "refresh_token": "R1",
                "expires_in": 900
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::default());
        api.login(" Kim@example.com", "hunter22").await.unwrap();
        assert_eq!(api.store().get(), Credential::new("A1", "R1"));
        assert!(api.is_authenticated());
    }

    #[tokio::test]
    async fn test_wrong_password_does_not_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid email or password\n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("old", "R-old"));
        let err = api.login("kim@example.com", "nope").await.unwrap_err();
        assert!(api_error(&err).is_unauthorized());
        // A failed login leaves the previous session alone
        assert_eq!(api.store().get(), Credential::new("old", "R-old"));
    }

    #[tokio::test]
    async fn test_signup_returning_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 12, "email": "kim@example.com"})),
            )
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::default());
        let signup = api.signup("kim@example.com", "hunter22").await.unwrap();
        assert!(matches!(signup, SignupResponse::Account(ref u) if u.id == 12));
        assert!(!api.is_authenticated());
    }

    #[tokio::test]
    async fn test_signup_returning_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A1",
                "refresh_token": "R1"
            })))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::default());
        api.signup("kim@example.com", "hunter22").await.unwrap();
        assert_eq!(api.store().get(), Credential::new("A1", "R1"));
    }

    #[tokio::test]
    async fn test_signup_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .respond_with(ResponseTemplate::new(409).set_body_string("user already exists\n"))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::default());
        let err = api.signup("kim@example.com", "hunter22").await.unwrap_err();
        assert!(matches!(api_error(&err), ApiError::Conflict(msg) if msg == "user already exists"));
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        api.logout().await.unwrap();
        assert!(api.store().get().is_empty());
    }

    #[tokio::test]
    async fn test_me() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/protected/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"user_id": 5})))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        assert_eq!(api.me().await.unwrap(), Me { user_id: 5 });
    }

    #[tokio::test]
    async fn test_list_boards_with_search_and_null_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/GetBoards"))
            .and(query_param("search", "sprint"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([board_json(1, "Sprint 1"), board_json(2, "Sprint 2")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/GetBoards"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let boards = api.list_boards(Some(" sprint ")).await.unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[1].name, "Sprint 2");

        assert!(api.list_boards(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_board_crud() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/CreateBoard"))
            .and(body_json(serde_json::json!({"name": "Roadmap"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(board_json(3, "Roadmap")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/boards/3"))
            .and(body_json(serde_json::json!({"name": "Roadmap 2026"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(board_json(3, "Roadmap 2026")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/boards/3"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let board = api.create_board("Roadmap").await.unwrap();
        assert_eq!(board.id, 3);

        let renamed = api
            .update_board(3, &BoardUpdate::rename("Roadmap 2026"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "Roadmap 2026");

        api.delete_board(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_tasks_sends_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boards/4/GetTasks"))
            .and(query_param("status", "in_progress"))
            .and(query_param("priority", "high"))
            .and(query_param("sort_by", "deadline"))
            .and(query_param("sort_dir", "asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([task_json(1, "Ship")])))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let query = TaskQuery {
            status: Some(TaskStatus::InProgress),
            priority: Some(TaskPriority::High),
            sort_by: Some(SortBy::Deadline),
            sort_dir: Some(SortDir::Asc),
            ..TaskQuery::default()
        };
        let tasks = api.list_tasks(4, &query).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Ship");
    }

    #[tokio::test]
    async fn test_task_crud() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/boards/4/CreateTask"))
            .and(body_json(serde_json::json!({"title": "Ship", "priority": "high"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json(8, "Ship")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/boards/4/tasks/8"))
            .and(body_json(serde_json::json!({"status": "done"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json(8, "Ship")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/boards/4/tasks/8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let new_task = NewTask {
            priority: Some(TaskPriority::High),
            ..NewTask::titled("Ship")
        };
        assert_eq!(api.create_task(4, &new_task).await.unwrap().id, 8);

        let update = TaskUpdate {
            status: Some(TaskStatus::Done),
            ..TaskUpdate::default()
        };
        api.update_task(4, 8, &update).await.unwrap();
        api.delete_task(4, 8).await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404).set_body_string("board not found"))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let err = api.delete_board(99).await.unwrap_err();
        assert!(matches!(api_error(&err), ApiError::NotFound(msg) if msg == "board not found"));
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed_transparently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/GetBoards"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "refresh_token": "R2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/GetBoards"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([board_json(1, "Inbox")])))
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let boards = api.list_boards(None).await.unwrap();
        assert_eq!(boards[0].name, "Inbox");
        assert_eq!(api.store().get(), Credential::new("A2", "R2"));
    }

    #[tokio::test]
    async fn test_dead_session_surfaces_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/GetBoards"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid refresh token"))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Credential::new("A1", "R1"));
        let err = api.list_boards(None).await.unwrap_err();
        assert!(api_error(&err).is_unauthorized());
        assert!(api.store().get().is_empty());
    }
}
