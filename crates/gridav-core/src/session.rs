//! Authentication and per-connection session reuse.
//!
//! A [`Session`] is one authenticated grid connection owned by one transport
//! connection. The [`SessionManager`] logs in and decides whether an existing
//! session may serve the next request; the [`SessionStore`] keeps the
//! sessions of all live transport connections.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AnonymousSettings, AuthScheme, GridSettings, GridavConfig};
use crate::error::{GridavError, Result};
use crate::rpc::{GridConnection, GridConnector, Negotiation, RpcError};

/// Longest username or password the store accepts.
pub const MAX_CREDENTIAL_LEN: usize = 63;

/// Username and password taken from a request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One authenticated grid connection.
///
/// The password is kept only to compare against later requests on the same
/// transport connection. Dropping the session closes the RPC connection.
pub struct Session {
    conn: Box<dyn GridConnection>,
    username: String,
    password: String,
    scheme: AuthScheme,
    anonymous: bool,
}

impl Session {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn connection(&mut self) -> &mut dyn GridConnection {
        self.conn.as_mut()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("scheme", &self.scheme)
            .field("anonymous", &self.anonymous)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(user = %self.username, "Closing grid session");
        self.conn.disconnect();
    }
}

/// Logs in to the grid store and decides session reuse.
pub struct SessionManager {
    connector: Arc<dyn GridConnector>,
    grid: GridSettings,
    anonymous: AnonymousSettings,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn GridConnector>, config: &GridavConfig) -> Self {
        Self {
            connector,
            grid: config.grid.clone(),
            anonymous: config.dav.anonymous.clone(),
        }
    }

    /// Whether `session` may serve a request under the current configuration.
    ///
    /// Username and password are only compared when supplied.
    pub fn can_reuse(
        &self,
        session: &Session,
        username: Option<&str>,
        password: Option<&str>,
    ) -> bool {
        session.anonymous == self.anonymous.enabled
            && session.scheme == self.grid.auth_scheme
            && username.is_none_or(|u| u == session.username)
            && password.is_none_or(|p| p == session.password)
    }

    /// Make `slot` hold a session for the request's credentials.
    ///
    /// Without credentials the anonymous account is used when enabled. A
    /// session that cannot be reused is torn down before a new login.
    #[instrument(
        level = "debug",
        skip(self, slot, credentials),
        fields(user = tracing::field::Empty)
    )]
    pub fn authenticate<'s>(
        &self,
        slot: &'s mut Option<Session>,
        credentials: Option<&Credentials>,
    ) -> Result<&'s mut Session> {
        let (username, password, anonymous_login) = match credentials {
            Some(c) => (c.username.as_str(), c.password.as_str(), false),
            None if self.anonymous.enabled => (
                self.anonymous.username.as_str(),
                self.anonymous.password.as_str(),
                true,
            ),
            None => return Err(GridavError::AuthFailure),
        };
        tracing::Span::current().record("user", username);

        if let Some(existing) = slot.as_ref() {
            if self.can_reuse(existing, Some(username), Some(password)) {
                debug!("Reusing grid session");
            } else {
                debug!("Session does not match request, reconnecting");
                *slot = None;
            }
        }

        if slot.is_none() {
            let session = self.login(username, password).map_err(|e| match e {
                GridavError::AuthFailure if anonymous_login => {
                    error!(user = %username, "Anonymous login rejected by the grid store");
                    GridavError::Configuration(
                        "anonymous credentials were rejected".to_string(),
                    )
                }
                other => other,
            })?;
            *slot = Some(session);
        }

        slot.as_mut()
            .ok_or_else(|| GridavError::Infrastructure("session slot is empty".to_string()))
    }

    /// Open a connection and authenticate with the configured scheme.
    fn login(&self, username: &str, password: &str) -> Result<Session> {
        if username.len() > MAX_CREDENTIAL_LEN {
            return Err(GridavError::LengthLimit {
                what: "username".to_string(),
                limit: MAX_CREDENTIAL_LEN,
            });
        }
        if password.len() > MAX_CREDENTIAL_LEN {
            return Err(GridavError::LengthLimit {
                what: "password".to_string(),
                limit: MAX_CREDENTIAL_LEN,
            });
        }

        let mut conn = self.connector.connect(&self.grid, username).map_err(|e| {
            error!(
                host = %self.grid.host,
                port = self.grid.port,
                error = %e,
                "Could not connect to grid store"
            );
            GridavError::rpc(
                format!("connect to {}:{}", self.grid.host, self.grid.port),
                e,
            )
        })?;

        let negotiated_secure = conn.negotiation() == Negotiation::Secure;
        if negotiated_secure && !conn.is_secure() {
            return Err(GridavError::Infrastructure(
                "secure channel was negotiated but is not active".to_string(),
            ));
        }

        let scheme = self.grid.auth_scheme;
        if scheme == AuthScheme::Pam && !negotiated_secure {
            if conn.is_secure() {
                return Err(GridavError::Infrastructure(
                    "secure channel is active without negotiation".to_string(),
                ));
            }
            conn.start_secure()
                .map_err(|e| GridavError::rpc("start secure channel", e))?;
        }

        let outcome = match scheme {
            AuthScheme::Native => conn.login_password(password),
            AuthScheme::Pam => conn
                .request_temporary_password(password, self.grid.pam_ttl_hours.max(1))
                .and_then(|temporary| conn.login_password(&temporary)),
        };

        if let Err(e) = outcome {
            conn.disconnect();
            return Err(match e {
                RpcError::AuthDenied | RpcError::NotFound => {
                    warn!(user = %username, "Login rejected");
                    GridavError::AuthFailure
                }
                other => {
                    error!(user = %username, error = %other, "Login failed");
                    GridavError::rpc("login", other)
                }
            });
        }

        if conn.is_secure() && !negotiated_secure {
            if scheme != AuthScheme::Pam {
                warn!(?scheme, "Secure channel active after a non-proxied login");
            }
            conn.end_secure().map_err(|e| {
                error!(error = %e, "Could not end secure channel after login");
                GridavError::rpc("end secure channel", e)
            })?;
        }

        info!(user = %username, ?scheme, "Logged in to grid store");
        Ok(Session {
            conn,
            username: username.to_string(),
            password: password.to_string(),
            scheme,
            anonymous: self.anonymous.enabled,
        })
    }
}

/// Identity of one transport connection.
pub type ConnectionId = u64;

/// Shared slot holding the session of one transport connection.
pub type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Sessions of all live transport connections.
#[derive(Default)]
pub struct SessionStore {
    slots: DashMap<ConnectionId, SessionSlot>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `id`, created empty on first use.
    pub fn slot(&self, id: ConnectionId) -> SessionSlot {
        Arc::clone(self.slots.entry(id).or_default().value())
    }

    /// Drop the session of `id` but keep its slot.
    pub fn invalidate(&self, id: ConnectionId) {
        if let Some(slot) = self.slots.get(&id).map(|s| Arc::clone(s.value())) {
            slot.lock().take();
        }
    }

    /// Forget `id`, closing its session. Called when the transport closes.
    pub fn destroy(&self, id: ConnectionId) {
        if let Some((_, slot)) = self.slots.remove(&id) {
            slot.lock().take();
            debug!(connection = id, "Session slot destroyed");
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
