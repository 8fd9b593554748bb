use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::catalog::CatalogCache;
use crate::comments::CommentStore;
use crate::config::{self, Config};
use crate::data::{
    HttpCatalogService, HttpCommentService, HttpInteractionService, HttpProfileService,
    HttpSubscriptionService, ProfileService,
};
use crate::interactions::InteractionStore;
use crate::session::{self, SessionEvent};
use crate::storage;
use crate::subscriptions::SubscriptionStore;

/// The assembled engine: one gateway, one session, and the stores a frontend
/// talks to. Frontends subscribe to `SessionEvent` through
/// `App::session_cell` for the "session expired" notice and to reload their
/// views after an invalidation; the per-user stores are already reset by the
/// time the event reaches them.
pub struct App {
    pub session: Arc<session::Manager>,
    pub catalog: Arc<CatalogCache>,
    pub interactions: Arc<InteractionStore>,
    pub subscriptions: Arc<SubscriptionStore>,
    pub comments: Arc<CommentStore>,
    pub profiles: Arc<dyn ProfileService>,
    cell: Arc<session::SessionCell>,
}

impl App {
    pub fn new(cfg: Config) -> Result<Self> {
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: cfg.storage.path.clone(),
            })
            .context("open storage")?,
        );

        let cell = Arc::new(session::SessionCell::new());
        let client = Arc::new(
            api::Client::new(
                cell.clone(),
                api::ClientConfig {
                    base_url: Some(cfg.api.base_url.clone()),
                    user_agent: cfg.api.user_agent.clone(),
                    timeout: Some(cfg.api.timeout),
                    http_client: None,
                },
            )
            .context("build api client")?,
        );

        let manager = Arc::new(session::Manager::new(store, client.clone(), cell.clone()));

        let catalog = Arc::new(CatalogCache::new(
            cell.clone(),
            Arc::new(HttpCatalogService::new(client.clone())),
        ));
        let interactions = Arc::new(InteractionStore::new(
            cell.clone(),
            catalog.clone(),
            Arc::new(HttpInteractionService::new(client.clone())),
        ));
        let subscriptions = Arc::new(SubscriptionStore::new(
            cell.clone(),
            catalog.clone(),
            Arc::new(HttpSubscriptionService::new(client.clone())),
        ));
        let profiles: Arc<dyn ProfileService> = Arc::new(HttpProfileService::new(client.clone()));
        let comments = Arc::new(CommentStore::new(
            cell.clone(),
            Arc::new(HttpCommentService::new(client)),
            profiles.clone(),
        ));

        wire_session_listeners(&cell, &interactions, &subscriptions, &comments);

        Ok(Self {
            session: manager,
            catalog,
            interactions,
            subscriptions,
            comments,
            profiles,
            cell,
        })
    }

    pub fn from_default_config() -> Result<Self> {
        let cfg = config::load(config::LoadOptions::default()).context("load config")?;
        Self::new(cfg)
    }

    pub fn session_cell(&self) -> Arc<session::SessionCell> {
        self.cell.clone()
    }
}

/// Session transitions drive the per-user stores: a login (or restore) pulls
/// the subscription set, a logout or expiry resets everything scoped to the
/// user. Listeners hold weak references so the wiring owns nothing.
pub fn wire_session_listeners(
    cell: &Arc<session::SessionCell>,
    interactions: &Arc<InteractionStore>,
    subscriptions: &Arc<SubscriptionStore>,
    comments: &Arc<CommentStore>,
) {
    let interactions = Arc::downgrade(interactions);
    let subscriptions = Arc::downgrade(subscriptions);
    let comments = Arc::downgrade(comments);
    cell.subscribe(move |event| match event {
        SessionEvent::LoggedIn(_) => {
            if let Some(subscriptions) = subscriptions.upgrade() {
                if let Err(err) = subscriptions.refresh() {
                    eprintln!("subscriptions: refresh after login: {err}");
                }
            }
        }
        SessionEvent::LoggedOut | SessionEvent::Expired => {
            if let Some(interactions) = interactions.upgrade() {
                interactions.reset();
            }
            if let Some(subscriptions) = subscriptions.upgrade() {
                subscriptions.clear();
            }
            if let Some(comments) = comments.upgrade() {
                comments.cancel_edit();
            }
        }
    });
}
