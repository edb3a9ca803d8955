//! Account session and anti-forgery token cache.
//!
//! `AuthSession` is created once at start-up and shared (`Arc`) by every
//! worker. It owns the credential, the lazily loaded identity, and the
//! `TokenCache` that every mutating call consults first.

use secrecy::SecretString;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::http::endpoints::Endpoints;
use crate::http::normalizer::NormalizedBody;
use crate::http::{ApiRequest, TokenSink, Transport};
use crate::types::{IdentityInfo, SniperError};

/// Refresh the anti-forgery token at least this often.
pub const CSRF_TOKEN_TTL: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Token cache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    refreshed_at: Option<Instant>,
}

/// Holds one anti-forgery token for one credential.
///
/// Refreshes are single-flight: concurrent callers queue on `refresh_lock`
/// and re-check freshness before issuing their own bootstrap call.
#[derive(Debug)]
pub struct TokenCache {
    state: Mutex<TokenState>,
    refresh_lock: tokio::sync::Mutex<()>,
    ttl: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::with_ttl(CSRF_TOKEN_TTL)
    }
}

impl TokenCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(TokenState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            ttl,
        }
    }

    /// The cached token if present and younger than the TTL.
    fn fresh(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (&state.token, state.refreshed_at) {
            (Some(token), Some(at)) if at.elapsed() <= self.ttl => Some(token.clone()),
            _ => None,
        }
    }

    /// The cached token regardless of age.
    pub fn current(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    pub fn store(&self, token: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.token = Some(token.to_string());
        state.refreshed_at = Some(Instant::now());
    }

    /// Return a token, refreshing it first when absent or stale.
    ///
    /// A failed refresh is not fatal: the stale (or absent) token is
    /// returned and the Transport's 403 path takes over.
    pub async fn get(
        &self,
        transport: &Transport,
        endpoints: &Endpoints,
        cookie: &SecretString,
    ) -> Option<String> {
        if let Some(token) = self.fresh() {
            return Some(token);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.fresh() {
            return Some(token);
        }

        match fetch_csrf_token(transport, endpoints, cookie).await {
            Some(token) => {
                debug!("Anti-forgery token refreshed");
                self.store(&token);
                Some(token)
            }
            None => {
                warn!("Anti-forgery token refresh failed, using cached token");
                self.current()
            }
        }
    }
}

/// Bootstrap call: the logout endpoint answers 403 with a fresh token.
async fn fetch_csrf_token(
    transport: &Transport,
    endpoints: &Endpoints,
    cookie: &SecretString,
) -> Option<String> {
    let req = ApiRequest::post(endpoints.csrf_bootstrap())
        .cookie(cookie)
        .success_codes(&[403]);

    match transport.send(req).await {
        Ok(envelope) => envelope.headers.csrf_token,
        Err(e) => {
            warn!(error = %e, "Anti-forgery bootstrap request failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The logged-in account shared by all workers.
pub struct AuthSession {
    cookie: SecretString,
    identity: RwLock<IdentityInfo>,
    tokens: TokenCache,
    transport: Arc<Transport>,
    endpoints: Arc<Endpoints>,
}

impl AuthSession {
    /// `transport` is the channel used for session housekeeping
    /// (token bootstrap, identity lookup).
    pub fn new(cookie: SecretString, transport: Arc<Transport>, endpoints: Arc<Endpoints>) -> Self {
        Self::with_token_cache(cookie, transport, endpoints, TokenCache::default())
    }

    pub fn with_token_cache(
        cookie: SecretString,
        transport: Arc<Transport>,
        endpoints: Arc<Endpoints>,
        tokens: TokenCache,
    ) -> Self {
        Self {
            cookie,
            identity: RwLock::new(IdentityInfo::default()),
            tokens,
            transport,
            endpoints,
        }
    }

    pub fn cookie(&self) -> &SecretString {
        &self.cookie
    }

    /// Current anti-forgery token, refreshed when stale.
    pub async fn csrf_token(&self) -> Option<String> {
        self.tokens
            .get(&self.transport, &self.endpoints, &self.cookie)
            .await
    }

    pub fn user_id(&self) -> Option<u64> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .id
    }

    pub fn user_name(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .name
            .clone()
    }

    pub fn identity(&self) -> IdentityInfo {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_identified(&self) -> bool {
        let identity = self.identity.read().unwrap_or_else(PoisonError::into_inner);
        identity.id.is_some() && identity.name.is_some()
    }

    /// Look up the authenticated account and cache it.
    pub async fn populate_identity(&self) -> Result<IdentityInfo, SniperError> {
        let req = ApiRequest::get(self.endpoints.authenticated_user()).cookie(&self.cookie);
        let envelope = self.transport.send(req).await?;

        match envelope.into_body()? {
            NormalizedBody::Identity(info) => {
                info!(
                    user_id = ?info.id,
                    user_name = ?info.name,
                    "Authenticated account loaded"
                );
                *self.identity.write().unwrap_or_else(PoisonError::into_inner) = info.clone();
                Ok(info)
            }
            _ => Err(SniperError::UnusableBody {
                endpoint: self.endpoints.authenticated_user(),
            }),
        }
    }
}

impl TokenSink for AuthSession {
    fn store_csrf_token(&self, token: &str) {
        self.tokens.store(token);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
