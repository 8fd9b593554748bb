use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::ApiError;
use crate::catalog::CatalogCache;
use crate::data::SubscriptionService;
use crate::optimistic::Optimistic;
use crate::session::SessionCell;

/// The current user's subscribed-channel set. Refetched in full on every
/// session change; never trusted across a session boundary.
pub struct SubscriptionStore {
    session: Arc<SessionCell>,
    catalog: Arc<CatalogCache>,
    service: Arc<dyn SubscriptionService>,
    channels: Arc<RwLock<HashSet<String>>>,
}

impl SubscriptionStore {
    pub fn new(
        session: Arc<SessionCell>,
        catalog: Arc<CatalogCache>,
        service: Arc<dyn SubscriptionService>,
    ) -> Self {
        Self {
            session,
            catalog,
            service,
            channels: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.read().contains(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut list: Vec<String> = self.channels.read().iter().cloned().collect();
        list.sort();
        list
    }

    pub fn clear(&self) {
        self.channels.write().clear();
    }

    /// Replace the set with the server's list for the current user. Anonymous
    /// means empty.
    pub fn refresh(&self) -> Result<(), ApiError> {
        let Some(user) = self.session.user() else {
            self.clear();
            return Ok(());
        };
        let list = self.service.list(user.id)?;
        *self.channels.write() = list.into_iter().collect();
        Ok(())
    }

    /// Toggle the subscription to `channel`. The membership flips
    /// optimistically, then settles on the server's "now subscribed" flag.
    /// Returns the settled flag.
    pub fn subscribe(&self, channel: &str) -> Result<bool, ApiError> {
        let user = self.session.user().ok_or(ApiError::AuthRequired)?;
        if user.username == channel {
            return Err(ApiError::Validation(
                "you cannot subscribe to your own channel".into(),
            ));
        }

        let was_subscribed = self.is_subscribed(channel);
        let applied = self.channels.clone();
        let reverted = self.channels.clone();
        let session = self.session.clone();
        let name = channel.to_string();
        let undo_name = channel.to_string();
        let txn = Optimistic::apply(
            move || {
                let mut channels = applied.write();
                if was_subscribed {
                    channels.remove(&name);
                } else {
                    channels.insert(name);
                }
            },
            move || {
                if !session.is_active() {
                    return;
                }
                let mut channels = reverted.write();
                if was_subscribed {
                    channels.insert(undo_name);
                } else {
                    channels.remove(&undo_name);
                }
            },
        );

        let subscribed = self.service.toggle(user.id, channel)?;
        txn.commit();

        {
            let mut channels = self.channels.write();
            if subscribed {
                channels.insert(channel.to_string());
            } else {
                channels.remove(channel);
            }
        }

        // Keep the open watch view's subscriber count in step.
        if let Some(current) = self.catalog.current() {
            if current.channel == channel {
                if let Err(err) = self.catalog.load_detail(current.id) {
                    eprintln!("subscriptions: refresh video detail: {err}");
                }
            }
        }

        Ok(subscribed)
    }
}
