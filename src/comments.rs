use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{ApiError, Comment};
use crate::data::{CommentService, ProfileService};
use crate::session::SessionCell;

#[derive(Default)]
struct CommentState {
    video_id: Option<i64>,
    entries: Vec<Comment>,
    avatars: HashMap<String, Option<String>>,
    editing_id: Option<i64>,
    posting: bool,
}

/// Ordered comment list for one video, newest first as the server returns
/// them (never re-sorted locally), plus the avatar lookup cache and the
/// exclusive "currently editing" cursor.
pub struct CommentStore {
    session: Arc<SessionCell>,
    comments: Arc<dyn CommentService>,
    profiles: Arc<dyn ProfileService>,
    state: Arc<RwLock<CommentState>>,
}

impl CommentStore {
    pub fn new(
        session: Arc<SessionCell>,
        comments: Arc<dyn CommentService>,
        profiles: Arc<dyn ProfileService>,
    ) -> Self {
        Self {
            session,
            comments,
            profiles,
            state: Arc::new(RwLock::new(CommentState::default())),
        }
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.state.read().entries.clone()
    }

    pub fn avatar(&self, username: &str) -> Option<String> {
        self.state.read().avatars.get(username).cloned().flatten()
    }

    pub fn editing(&self) -> Option<i64> {
        self.state.read().editing_id
    }

    /// Replace the sequence with the server's list for `video_id`, then
    /// resolve the profile image of each distinct commenter. Every lookup is
    /// independent and best-effort: one missing profile must not cost the
    /// others their avatar.
    pub fn load(&self, video_id: i64) -> Result<Vec<Comment>, ApiError> {
        let entries = self.comments.list(video_id)?;
        {
            let mut state = self.state.write();
            state.video_id = Some(video_id);
            state.entries = entries.clone();
            state.editing_id = None;
            state.avatars.clear();
        }

        let mut seen: Vec<String> = Vec::new();
        for comment in &entries {
            if comment.username.is_empty() || seen.contains(&comment.username) {
                continue;
            }
            seen.push(comment.username.clone());
            match self.profiles.profile(&comment.username) {
                Ok(profile) => {
                    self.state
                        .write()
                        .avatars
                        .insert(comment.username.clone(), profile.profile_image);
                }
                Err(_) => {}
            }
        }

        Ok(entries)
    }

    /// Post a comment. Nothing renders until the server confirms (it assigns
    /// the id), and at most one submission may be in flight per compose box.
    pub fn create(&self, video_id: i64, content: &str) -> Result<Comment, ApiError> {
        let user = self.session.user().ok_or(ApiError::AuthRequired)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("comment content is required".into()));
        }

        {
            let mut state = self.state.write();
            if state.posting {
                return Err(ApiError::InFlight);
            }
            state.posting = true;
        }

        let result = self.comments.create(video_id, user.id, content);
        let mut state = self.state.write();
        state.posting = false;
        let comment = result?;

        if state.video_id == Some(video_id) {
            state.entries.insert(0, comment.clone());
        }
        // The author's own avatar is already at hand.
        if let Some(image) = user.profile_image {
            state
                .avatars
                .entry(user.username)
                .or_insert(Some(image));
        }
        Ok(comment)
    }

    /// Enter edit mode for one comment. Starting a new edit implicitly
    /// cancels any other: the cursor is a single nullable key.
    pub fn begin_edit(&self, comment_id: i64) {
        self.state.write().editing_id = Some(comment_id);
    }

    pub fn cancel_edit(&self) {
        self.state.write().editing_id = None;
    }

    pub fn update(&self, comment_id: i64, content: &str) -> Result<(), ApiError> {
        if self.session.user().is_none() {
            return Err(ApiError::AuthRequired);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("comment content is required".into()));
        }

        self.comments.update(comment_id, content)?;

        let mut state = self.state.write();
        if let Some(entry) = state.entries.iter_mut().find(|c| c.id == comment_id) {
            entry.content = content.to_string();
        }
        if state.editing_id == Some(comment_id) {
            state.editing_id = None;
        }
        Ok(())
    }

    /// Delete a comment. Ownership is enforced by the server: a 403 comes
    /// back as `Forbidden` with the server's message and the list is left
    /// untouched.
    pub fn delete(&self, comment_id: i64) -> Result<(), ApiError> {
        if self.session.user().is_none() {
            return Err(ApiError::AuthRequired);
        }
        self.comments.delete(comment_id)?;

        let mut state = self.state.write();
        state.entries.retain(|c| c.id != comment_id);
        if state.editing_id == Some(comment_id) {
            state.editing_id = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{mock_comment, MockCommentService, MockProfileService};
    use crate::session::{Session, UserIdentity};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::sync::Weak;

    struct Fixture {
        cell: Arc<SessionCell>,
        comments: Arc<MockCommentService>,
        profiles: Arc<MockProfileService>,
        store: Arc<CommentStore>,
    }

    fn fixture() -> Fixture {
        let cell = Arc::new(SessionCell::new());
        let comments = Arc::new(MockCommentService::default());
        let profiles = Arc::new(MockProfileService::default());
        let store = Arc::new(CommentStore::new(
            cell.clone(),
            comments.clone(),
            profiles.clone(),
        ));
        Fixture {
            cell,
            comments,
            profiles,
            store,
        }
    }

    fn log_in(cell: &SessionCell, image: Option<&str>) {
        cell.activate(Session {
            token: "tok".into(),
            user: UserIdentity {
                id: 7,
                username: "mina".into(),
                profile_image: image.map(|s| s.to_string()),
            },
        });
    }

    #[test]
    fn load_replaces_list_and_resolves_avatars_best_effort() {
        let fx = fixture();
        fx.comments.push_list(Ok(vec![
            mock_comment(2, 8, "june", "second!"),
            mock_comment(1, 9, "hana", "first!"),
        ]));
        fx.profiles
            .insert_image("june", Some("http://cdn.example/p/june.png"));
        fx.profiles.fail_for("hana");

        let loaded = fx.store.load(42).unwrap();
        assert_eq!(loaded.len(), 2);
        // Server order preserved: newest first.
        assert_eq!(fx.store.comments()[0].id, 2);
        assert_eq!(
            fx.store.avatar("june").as_deref(),
            Some("http://cdn.example/p/june.png")
        );
        // hana's lookup failed but june's still resolved.
        assert_eq!(fx.store.avatar("hana"), None);
    }

    #[test]
    fn anonymous_create_is_rejected_before_any_request() {
        let fx = fixture();
        let err = fx.store.create(42, "hello").unwrap_err();
        assert!(matches!(err, ApiError::AuthRequired));
        assert_eq!(fx.comments.create_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_content_is_rejected_locally() {
        let fx = fixture();
        log_in(&fx.cell, None);
        let err = fx.store.create(42, "   ").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(fx.comments.create_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn confirmed_comment_is_prepended_with_the_author_avatar() {
        let fx = fixture();
        log_in(&fx.cell, Some("http://cdn.example/p/mina.png"));
        fx.comments.push_list(Ok(vec![mock_comment(1, 9, "hana", "first!")]));
        fx.store.load(42).unwrap();

        fx.comments
            .push_create(Ok(mock_comment(5, 7, "mina", "nice video")));
        let created = fx.store.create(42, "nice video").unwrap();
        assert_eq!(created.id, 5);
        assert_eq!(fx.store.comments()[0].id, 5);
        assert_eq!(
            fx.store.avatar("mina").as_deref(),
            Some("http://cdn.example/p/mina.png")
        );
    }

    #[test]
    fn a_second_submission_is_refused_while_one_is_in_flight() {
        struct ReentrantService {
            store: Mutex<Weak<CommentStore>>,
        }

        impl CommentService for ReentrantService {
            fn list(&self, _video_id: i64) -> Result<Vec<Comment>, ApiError> {
                Ok(Vec::new())
            }

            fn create(
                &self,
                video_id: i64,
                user_id: i64,
                content: &str,
            ) -> Result<Comment, ApiError> {
                // A second submit arriving while this one is still in flight.
                if let Some(store) = self.store.lock().upgrade() {
                    let err = store.create(video_id, "again").unwrap_err();
                    assert!(matches!(err, ApiError::InFlight));
                }
                Ok(mock_comment(5, user_id, "mina", content))
            }

            fn update(&self, _comment_id: i64, _content: &str) -> Result<(), ApiError> {
                unreachable!()
            }

            fn delete(&self, _comment_id: i64) -> Result<(), ApiError> {
                unreachable!()
            }
        }

        let cell = Arc::new(SessionCell::new());
        let service = Arc::new(ReentrantService {
            store: Mutex::new(Weak::new()),
        });
        let store = Arc::new(CommentStore::new(
            cell.clone(),
            service.clone(),
            Arc::new(MockProfileService::default()),
        ));
        *service.store.lock() = Arc::downgrade(&store);

        log_in(&cell, None);
        store.create(42, "hello").unwrap();
        // The flag clears once the request settles.
        let second = store.create(42, "later");
        assert!(second.is_ok());
    }

    #[test]
    fn starting_a_new_edit_cancels_the_previous_one() {
        let fx = fixture();
        fx.store.begin_edit(1);
        fx.store.begin_edit(2);
        assert_eq!(fx.store.editing(), Some(2));
        fx.store.cancel_edit();
        assert_eq!(fx.store.editing(), None);
    }

    #[test]
    fn update_mutates_in_place_and_clears_the_cursor() {
        let fx = fixture();
        log_in(&fx.cell, None);
        fx.comments.push_list(Ok(vec![
            mock_comment(2, 7, "mina", "tpyo"),
            mock_comment(1, 9, "hana", "first!"),
        ]));
        fx.store.load(42).unwrap();

        fx.store.begin_edit(2);
        fx.store.update(2, "typo").unwrap();

        let comments = fx.store.comments();
        assert_eq!(comments[0].content, "typo");
        assert_eq!(comments[1].content, "first!");
        assert_eq!(fx.store.editing(), None);
    }

    #[test]
    fn update_requires_content() {
        let fx = fixture();
        log_in(&fx.cell, None);
        let err = fx.store.update(2, "  ").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(fx.comments.update_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn foreign_delete_surfaces_ownership_message_and_keeps_the_comment() {
        let fx = fixture();
        log_in(&fx.cell, None);
        fx.comments.push_list(Ok(vec![mock_comment(1, 9, "hana", "first!")]));
        fx.store.load(42).unwrap();

        fx.comments
            .push_delete(Err(ApiError::Forbidden("not your comment".into())));
        let err = fx.store.delete(1).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(msg) if msg == "not your comment"));
        assert_eq!(fx.store.comments().len(), 1);
    }

    #[test]
    fn delete_removes_the_comment() {
        let fx = fixture();
        log_in(&fx.cell, None);
        fx.comments.push_list(Ok(vec![
            mock_comment(2, 7, "mina", "mine"),
            mock_comment(1, 9, "hana", "first!"),
        ]));
        fx.store.load(42).unwrap();

        fx.store.delete(2).unwrap();
        let remaining = fx.store.comments();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 1);
    }
}
