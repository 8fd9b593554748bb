use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::ApiError;
use crate::catalog::{CatalogCache, VideoPatch};
use crate::data::InteractionService;
use crate::optimistic::Optimistic;
use crate::session::SessionCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Like,
    Dislike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoStats {
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Clone, Copy)]
struct StatsEntry {
    generation: u64,
    stats: VideoStats,
}

#[derive(Default)]
struct InteractionState {
    reactions: HashMap<i64, Reaction>,
    stats: HashMap<i64, StatsEntry>,
}

/// Per-video like/dislike state for the current user, plus a count override
/// cache that shadows the catalog's own counts until the catalog is
/// refetched. Toggles apply optimistically and are settled by the server's
/// authoritative response; the optimistic delta is only a bridge.
pub struct InteractionStore {
    session: Arc<SessionCell>,
    catalog: Arc<CatalogCache>,
    service: Arc<dyn InteractionService>,
    state: Arc<RwLock<InteractionState>>,
}

impl InteractionStore {
    pub fn new(
        session: Arc<SessionCell>,
        catalog: Arc<CatalogCache>,
        service: Arc<dyn InteractionService>,
    ) -> Self {
        Self {
            session,
            catalog,
            service,
            state: Arc::new(RwLock::new(InteractionState::default())),
        }
    }

    pub fn reaction(&self, id: i64) -> Option<Reaction> {
        self.state.read().reactions.get(&id).copied()
    }

    /// The count override for `id`, if one exists and the catalog has not
    /// been refetched since it was written.
    pub fn stats(&self, id: i64) -> Option<VideoStats> {
        let generation = self.catalog.generation();
        let state = self.state.read();
        let entry = state.stats.get(&id)?;
        (entry.generation == generation).then_some(entry.stats)
    }

    /// What the UI should show: a fresh override wins, the catalog's own
    /// counts otherwise.
    pub fn display_stats(&self, id: i64) -> VideoStats {
        if let Some(stats) = self.stats(id) {
            return stats;
        }
        self.catalog
            .video(id)
            .map(|v| VideoStats {
                likes: v.likes,
                dislikes: v.dislikes,
            })
            .unwrap_or_default()
    }

    /// Drop all per-user reaction state. Count overrides stay; they are
    /// server counts, not user state.
    pub fn reset(&self) {
        self.state.write().reactions.clear();
    }

    pub fn toggle_like(&self, id: i64) -> Result<VideoStats, ApiError> {
        self.toggle(id, Reaction::Like)
    }

    pub fn toggle_dislike(&self, id: i64) -> Result<VideoStats, ApiError> {
        self.toggle(id, Reaction::Dislike)
    }

    fn toggle(&self, id: i64, pressed: Reaction) -> Result<VideoStats, ApiError> {
        let user = self.session.user().ok_or(ApiError::AuthRequired)?;

        let generation = self.catalog.generation();
        let base = self.display_stats(id);
        let (prev_reaction, prev_entry) = {
            let state = self.state.read();
            (
                state.reactions.get(&id).copied(),
                state.stats.get(&id).copied(),
            )
        };
        let (next_reaction, next_stats) = step(prev_reaction, pressed, base);

        let applied = self.state.clone();
        let reverted = self.state.clone();
        let session = self.session.clone();
        let txn = Optimistic::apply(
            move || {
                let mut state = applied.write();
                set_reaction(&mut state.reactions, id, next_reaction);
                state.stats.insert(
                    id,
                    StatsEntry {
                        generation,
                        stats: next_stats,
                    },
                );
            },
            move || {
                // A session invalidation already reset this store; putting
                // the old values back would resurrect per-user state.
                if !session.is_active() {
                    return;
                }
                let mut state = reverted.write();
                set_reaction(&mut state.reactions, id, prev_reaction);
                match prev_entry {
                    Some(entry) => {
                        state.stats.insert(id, entry);
                    }
                    None => {
                        state.stats.remove(&id);
                    }
                }
            },
        );

        let counts = match pressed {
            Reaction::Like => self.service.like(id, user.id)?,
            Reaction::Dislike => self.service.dislike(id, user.id)?,
        };
        txn.commit();

        // The server response replaces the optimistic values outright, so a
        // concurrent change from elsewhere (or a lost race between repeated
        // toggles) can never leave the displayed counts drifted.
        let settled = VideoStats {
            likes: counts.likes,
            dislikes: counts.dislikes,
        };
        let settled_reaction = match pressed {
            Reaction::Like => counts
                .is_liked
                .unwrap_or(false)
                .then_some(Reaction::Like),
            Reaction::Dislike => counts
                .is_disliked
                .unwrap_or(false)
                .then_some(Reaction::Dislike),
        };
        {
            let mut state = self.state.write();
            set_reaction(&mut state.reactions, id, settled_reaction);
            state.stats.insert(
                id,
                StatsEntry {
                    generation: self.catalog.generation(),
                    stats: settled,
                },
            );
        }
        self.catalog
            .apply_patch(id, &VideoPatch::counts(settled.likes, settled.dislikes));
        Ok(settled)
    }
}

fn set_reaction(reactions: &mut HashMap<i64, Reaction>, id: i64, reaction: Option<Reaction>) {
    match reaction {
        Some(r) => {
            reactions.insert(id, r);
        }
        None => {
            reactions.remove(&id);
        }
    }
}

/// Transition table. Pressing the already-active button returns to neutral;
/// pressing the opposite one moves both counters.
fn step(
    current: Option<Reaction>,
    pressed: Reaction,
    base: VideoStats,
) -> (Option<Reaction>, VideoStats) {
    let mut stats = base;
    let next = if current == Some(pressed) {
        match pressed {
            Reaction::Like => stats.likes -= 1,
            Reaction::Dislike => stats.dislikes -= 1,
        }
        None
    } else {
        if let Some(previous) = current {
            match previous {
                Reaction::Like => stats.likes -= 1,
                Reaction::Dislike => stats.dislikes -= 1,
            }
        }
        match pressed {
            Reaction::Like => stats.likes += 1,
            Reaction::Dislike => stats.dislikes += 1,
        }
        Some(pressed)
    };
    stats.likes = stats.likes.max(0);
    stats.dislikes = stats.dislikes.max(0);
    (next, stats)
}
