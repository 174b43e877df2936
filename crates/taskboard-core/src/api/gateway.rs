//! Authenticated request gateway.
//!
//! Every request leaving through [`RequestGateway::execute`] carries the
//! current access token as a bearer header. A 401 answer starts (or joins)
//! a token refresh; the request is then replayed exactly once with the new
//! token. Only one refresh is ever in flight: concurrent 401s share it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{header, Client, Method, Request, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, info, warn};
use url::Url;

use super::navigator::{Navigator, TracingNavigator};
use crate::auth::{Credential, CredentialStore, RefreshClient, RefreshError};

/// Default bound on how long requests wait for a refresh to settle.
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_LOGGED_OUT_REDIRECT: &str = "/dashboard";

type RefreshOutcome = Result<Credential, RefreshError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// What happens around a refresh: how long to wait, where to send the user
/// when it fails, and whether network failures count as a dead session.
#[derive(Debug, Clone)]
struct RefreshPolicy {
    timeout: Duration,
    logged_out_redirect: String,
    wipe_on_transient_failure: bool,
}

/// Clone is cheap; clones share the credential store and the pending
/// refresh slot.
#[derive(Clone)]
pub struct RequestGateway {
    client: Client,
    store: Arc<CredentialStore>,
    refresher: Arc<dyn RefreshClient>,
    navigator: Arc<dyn Navigator>,
    refresh_url: Url,
    policy: RefreshPolicy,
    pending: Arc<Mutex<Option<PendingRefresh>>>,
}

impl RequestGateway {
    /// `refresh_url` is the refresh endpoint; requests to it are never
    /// intercepted.
    pub fn new(
        client: Client,
        store: Arc<CredentialStore>,
        refresher: Arc<dyn RefreshClient>,
        refresh_url: Url,
    ) -> Self {
        Self {
            client,
            store,
            refresher,
            navigator: Arc::new(TracingNavigator),
            refresh_url,
            policy: RefreshPolicy {
                timeout: DEFAULT_REFRESH_TIMEOUT,
                logged_out_redirect: DEFAULT_LOGGED_OUT_REDIRECT.to_string(),
                wipe_on_transient_failure: true,
            },
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn with_logged_out_redirect(mut self, destination: impl Into<String>) -> Self {
        self.policy.logged_out_redirect = destination.into();
        self
    }

    /// When false, a refresh that fails for network reasons keeps the stored
    /// credentials and skips the logged-out redirect.
    pub fn wipe_on_transient_failure(mut self, wipe: bool) -> Self {
        self.policy.wipe_on_transient_failure = wipe;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Start building a request on the gateway's HTTP client. Send it with
    /// [`execute`](Self::execute) to get header injection and refresh.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send a request without touching credentials at all.
    pub async fn execute_unauthenticated(&self, request: Request) -> reqwest::Result<Response> {
        self.client.execute(request).await
    }

    /// Send `request` with the bearer token attached, recovering once from
    /// an expired token.
    ///
    /// Non-401 responses and transport errors come back unchanged. When the
    /// refresh fails the original 401 response is returned.
    pub async fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        let sent_token = self.store.access_token();
        if let Some(ref token) = sent_token {
            set_bearer(&mut request, token);
        }

        let method = request.method().clone();
        let url = request.url().clone();
        let is_refresh_call = self.is_refresh_endpoint(&url);

        // Streaming bodies cannot be replayed; those requests get no retry.
        let replay = if is_refresh_call {
            None
        } else {
            request.try_clone()
        };

        debug!(method = %method, url = %url, "Sending request");
        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!(method = %method, url = %url, status = %status, "Received response");

        if status != StatusCode::UNAUTHORIZED || is_refresh_call {
            return Ok(response);
        }

        let Some(mut retry) = replay else {
            warn!(method = %method, url = %url, "Got 401 for a request that cannot be replayed");
            return Ok(response);
        };

        warn!(method = %method, url = %url, "Got 401, refreshing access token");
        match self.refresh_once(sent_token.as_deref()).await {
            Ok(credential) => {
                if let Some(ref token) = credential.access_token {
                    set_bearer(&mut retry, token);
                }
                debug!(method = %method, url = %url, "Replaying request with refreshed token");
                // The replay is final: a second 401 goes back to the caller.
                self.client.execute(retry).await
            }
            Err(e) => {
                warn!(method = %method, url = %url, error = %e, "Token refresh failed, returning 401");
                Ok(response)
            }
        }
    }

    fn is_refresh_endpoint(&self, url: &Url) -> bool {
        url.origin() == self.refresh_url.origin()
            && url.path().trim_end_matches('/') == self.refresh_url.path().trim_end_matches('/')
    }

    /// Join the in-flight refresh, or start one.
    ///
    /// `stale` is the access token the failed request carried. If the store
    /// already holds a different token, another request finished a refresh
    /// in the meantime and that token is reused; if the store was emptied,
    /// the session is already over and nothing new is started.
    async fn refresh_once(&self, stale: Option<&str>) -> RefreshOutcome {
        let pending = {
            let mut slot = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let current = self.store.get();
                    if current.access_token.as_deref() != stale {
                        // The credential changed while this request was out.
                        return if current.is_authenticated() {
                            debug!("Access token was refreshed by another request");
                            Ok(current)
                        } else {
                            debug!("Session ended while the request was in flight");
                            Err(RefreshError::NoToken)
                        };
                    }
                    let refresh = self.spawn_refresh(current.refresh_token);
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };
        pending.await
    }

    /// Run the refresh on its own task so it settles even if every waiting
    /// request is dropped. The task updates the store and empties the
    /// pending slot before its result becomes visible.
    fn spawn_refresh(&self, refresh_token: Option<String>) -> PendingRefresh {
        let refresher = Arc::clone(&self.refresher);
        let store = Arc::clone(&self.store);
        let navigator = Arc::clone(&self.navigator);
        let pending = Arc::clone(&self.pending);
        let policy = self.policy.clone();

        let task = tokio::spawn(async move {
            let sent = refresh_token.filter(|t| !t.is_empty());
            let outcome = match sent.as_deref() {
                None => Err(RefreshError::NoToken),
                Some(token) => {
                    match tokio::time::timeout(policy.timeout, refresher.refresh(token)).await {
                        Ok(result) => result,
                        Err(_) => Err(RefreshError::Transient(format!(
                            "refresh timed out after {}s",
                            policy.timeout.as_secs_f32()
                        ))),
                    }
                }
            };

            // Writes are conditional on the store still holding the refresh
            // token that was sent: a logout or a new login during the refresh
            // wins over its result.
            match (&outcome, sent.as_deref()) {
                (Ok(credential), Some(sent)) => {
                    if let (Some(access), Some(refresh)) =
                        (&credential.access_token, &credential.refresh_token)
                    {
                        if store.set_if_refresh_token(sent, access.as_str(), refresh.as_str()) {
                            info!("Session refreshed");
                        } else {
                            info!("Session changed during refresh, refreshed tokens not stored");
                        }
                    }
                }
                (Ok(_), None) => {}
                (Err(e), _) if e.is_transient() && !policy.wipe_on_transient_failure => {
                    warn!(error = %e, "Token refresh failed transiently, keeping credentials");
                }
                (Err(e), Some(sent)) => {
                    if store.clear_if_refresh_token(sent) {
                        warn!(error = %e, "Token refresh failed, signing out");
                        navigator.redirect(&policy.logged_out_redirect);
                    } else {
                        debug!(error = %e, "Token refresh failed after the session had already changed");
                    }
                }
                (Err(e), None) => {
                    warn!(error = %e, "No refresh token available, signing out");
                    store.clear();
                    navigator.redirect(&policy.logged_out_redirect);
                }
            }

            pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Token refresh task failed");
                Err(RefreshError::Transient(format!("refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }
}

fn set_bearer(request: &mut Request, token: &str) {
    match header::HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Err(_) => warn!("Access token contains characters not allowed in a header, sending without it"),
    }
}
