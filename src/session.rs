use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::api::{self, ApiError, Credentials, ProfileUpdate};
use crate::storage::{self, StoredSession};

#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: UserIdentity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn(UserIdentity),
    LoggedOut,
    /// The backend rejected the credential mid-flight. Emitted at most once
    /// per session, however many in-flight calls hit the 401; frontends show
    /// a single "session expired" notice and reload their views.
    Expired,
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// The process-wide session slot. Exactly one writer (the `Manager` plus the
/// gateway's 401 hook) mutates it; stores read it and subscribe to changes.
/// Listeners are invoked synchronously after the slot has been updated, so a
/// listener always observes the post-transition state.
pub struct SessionCell {
    current: RwLock<Option<Session>>,
    listeners: Mutex<Vec<Listener>>,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.current.read().as_ref().map(|s| s.user.clone())
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    /// Register a listener for session transitions. Listeners are registered
    /// once at wiring time and must not subscribe from inside a callback.
    pub fn subscribe(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    pub fn activate(&self, session: Session) {
        let user = session.user.clone();
        *self.current.write() = Some(session);
        self.emit(&SessionEvent::LoggedIn(user));
    }

    pub fn clear(&self, event: SessionEvent) {
        let had_session = self.current.write().take().is_some();
        if had_session {
            self.emit(&event);
        }
    }

    /// Refresh the cached identity (e.g. a new profile image) without a
    /// session transition.
    pub fn update_user(&self, user: UserIdentity) {
        if let Some(session) = self.current.write().as_mut() {
            session.user = user;
        }
    }

    fn emit(&self, event: &SessionEvent) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

impl Credentials for SessionCell {
    fn bearer(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    fn handle_unauthorized(&self) {
        // Only the caller that actually held the session emits the expiry
        // event; concurrent 401s find the slot already empty.
        self.clear(SessionEvent::Expired);
    }
}

/// Owns the session lifecycle: restore at startup, login/logout, account
/// maintenance, and cleanup of persisted credentials when the gateway
/// invalidates the session.
pub struct Manager {
    store: Arc<storage::Store>,
    client: Arc<api::Client>,
    cell: Arc<SessionCell>,
}

impl Manager {
    pub fn new(
        store: Arc<storage::Store>,
        client: Arc<api::Client>,
        cell: Arc<SessionCell>,
    ) -> Self {
        let persisted = store.clone();
        cell.subscribe(move |event| {
            if matches!(event, SessionEvent::Expired) {
                if let Err(err) = persisted.clear_session() {
                    eprintln!("session: clear persisted credentials: {err:?}");
                }
            }
        });
        Self {
            store,
            client,
            cell,
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.cell.current()
    }

    pub fn cell(&self) -> Arc<SessionCell> {
        self.cell.clone()
    }

    /// Restore the persisted session, verifying the token against the
    /// backend before trusting it. An unverifiable credential is discarded
    /// (fail closed); a network failure during the check counts as
    /// unverifiable. Callers run this off the rendering path so that
    /// anonymous-capable views never wait on it.
    pub fn restore(&self) -> Result<Option<UserIdentity>> {
        let Some(saved) = self.store.load_session()? else {
            return Ok(None);
        };
        match self.client.verify_token(&saved.token) {
            Ok(verified) => {
                let user = UserIdentity {
                    id: verified.id,
                    username: verified.username,
                    profile_image: saved.profile_image.clone(),
                };
                self.cell.activate(Session {
                    token: saved.token,
                    user: user.clone(),
                });
                Ok(Some(user))
            }
            Err(_) => {
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    /// Login, then enrich the identity with the profile image from the user's
    /// own channel record. A failed lookup downgrades gracefully: the login
    /// still succeeds, just without an image.
    pub fn login(&self, username: &str, password: &str) -> Result<UserIdentity, ApiError> {
        let resp = self.client.login(username, password)?;
        let profile_image = self
            .client
            .user_profile(&resp.username)
            .ok()
            .and_then(|profile| profile.profile_image);
        let user = UserIdentity {
            id: resp.id,
            username: resp.username,
            profile_image,
        };
        self.store.save_session(StoredSession {
            token: resp.token.clone(),
            user_id: user.id,
            username: user.username.clone(),
            profile_image: user.profile_image.clone(),
            saved_at: Utc::now(),
        })?;
        self.cell.activate(Session {
            token: resp.token,
            user: user.clone(),
        });
        Ok(user)
    }

    pub fn signup(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.client.signup(username, password)
    }

    pub fn logout(&self) -> Result<()> {
        self.store.clear_session()?;
        self.cell.clear(SessionEvent::LoggedOut);
        Ok(())
    }

    pub fn change_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        if self.cell.current().is_none() {
            return Err(ApiError::AuthRequired);
        }
        self.client.change_password(current, new)
    }

    /// Deleting the account implies the full logout reset on success.
    pub fn delete_account(&self, password: &str) -> Result<(), ApiError> {
        if self.cell.current().is_none() {
            return Err(ApiError::AuthRequired);
        }
        self.client.delete_account(password)?;
        self.store.clear_session()?;
        self.cell.clear(SessionEvent::LoggedOut);
        Ok(())
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let Some(session) = self.cell.current() else {
            return Err(ApiError::AuthRequired);
        };
        self.client.update_profile(update)?;

        // Refresh the cached image so headers and comment avatars pick it up.
        if let Ok(profile) = self.client.user_profile(&session.user.username) {
            let user = UserIdentity {
                profile_image: profile.profile_image,
                ..session.user
            };
            self.cell.update_user(user.clone());
            self.store.save_session(StoredSession {
                token: session.token,
                user_id: user.id,
                username: user.username,
                profile_image: user.profile_image,
                saved_at: Utc::now(),
            })?;
        }
        Ok(())
    }
}
