use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{ApiError, UpdatedVideoFields, Video, VideoEdit, VideoUpload};
use crate::data::CatalogService;
use crate::session::SessionCell;

/// Local-only merge applied to one catalog entry, typically built from a
/// mutation response so the UI reflects it without a full refetch. Applying
/// the same patch twice yields the same state as applying it once.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<String>,
    pub likes: Option<i64>,
    pub dislikes: Option<i64>,
}

impl VideoPatch {
    pub fn counts(likes: i64, dislikes: i64) -> Self {
        Self {
            likes: Some(likes),
            dislikes: Some(dislikes),
            ..Self::default()
        }
    }
}

impl From<UpdatedVideoFields> for VideoPatch {
    fn from(fields: UpdatedVideoFields) -> Self {
        Self {
            title: Some(fields.title),
            description: fields.description,
            thumbnail: fields.thumbnail,
            duration: Some(fields.duration),
            likes: None,
            dislikes: None,
        }
    }
}

#[derive(Default)]
struct CatalogState {
    videos: Vec<Video>,
    current_id: Option<i64>,
    last_query: String,
    generation: u64,
}

/// The known set of videos: the last list result plus any richer detail
/// records merged in by id. Network calls are issued without holding the
/// state lock, so when a list fetch and a detail fetch race, whichever
/// response arrives last is the one the working set reflects.
pub struct CatalogCache {
    session: Arc<SessionCell>,
    service: Arc<dyn CatalogService>,
    state: Arc<RwLock<CatalogState>>,
}

impl CatalogCache {
    pub fn new(session: Arc<SessionCell>, service: Arc<dyn CatalogService>) -> Self {
        Self {
            session,
            service,
            state: Arc::new(RwLock::new(CatalogState::default())),
        }
    }

    pub fn videos(&self) -> Vec<Video> {
        self.state.read().videos.clone()
    }

    pub fn video(&self, id: i64) -> Option<Video> {
        self.state.read().videos.iter().find(|v| v.id == id).cloned()
    }

    /// The video currently open in the watch view, if any.
    pub fn current(&self) -> Option<Video> {
        let id = self.state.read().current_id?;
        self.video(id)
    }

    pub fn clear_current(&self) {
        self.state.write().current_id = None;
    }

    /// Bumped every time the working set is replaced wholesale. Count
    /// overrides tagged with an older generation stop shadowing the catalog.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Replace the working set with the server's result for `query`. A failed
    /// fetch leaves an empty set, never a stale one: old results must not
    /// show under a new query.
    pub fn load_list(&self, query: &str) -> Result<Vec<Video>, ApiError> {
        let result = self.service.list(query);
        let mut state = self.state.write();
        state.last_query = query.to_string();
        state.generation += 1;
        match result {
            Ok(videos) => {
                state.videos = videos.clone();
                Ok(videos)
            }
            Err(err) => {
                state.videos.clear();
                Err(err)
            }
        }
    }

    /// Refetch the working set with the last query.
    pub fn reload(&self) -> Result<Vec<Video>, ApiError> {
        let query = self.state.read().last_query.clone();
        self.load_list(&query)
    }

    /// Fetch one video's full record (the backend also counts the view) and
    /// merge it into the working set by id, leaving every other entry
    /// untouched. Tracks the video as the currently open one.
    pub fn load_detail(&self, id: i64) -> Result<Video, ApiError> {
        let video = self.service.detail(id)?;
        let mut state = self.state.write();
        state.current_id = Some(id);
        match state.videos.iter_mut().find(|v| v.id == id) {
            Some(entry) => *entry = video.clone(),
            // Deep links open videos that never appeared in the current list.
            None => state.videos.push(video.clone()),
        }
        Ok(video)
    }

    pub fn apply_patch(&self, id: i64, patch: &VideoPatch) {
        let mut state = self.state.write();
        let Some(entry) = state.videos.iter_mut().find(|v| v.id == id) else {
            return;
        };
        if let Some(title) = &patch.title {
            entry.title = title.clone();
        }
        if let Some(description) = &patch.description {
            entry.description = Some(description.clone());
        }
        if let Some(thumbnail) = &patch.thumbnail {
            entry.thumbnail = Some(thumbnail.clone());
        }
        if let Some(duration) = &patch.duration {
            entry.duration = duration.clone();
        }
        if let Some(likes) = patch.likes {
            entry.likes = likes;
        }
        if let Some(dislikes) = patch.dislikes {
            entry.dislikes = dislikes;
        }
    }

    pub fn upload(&self, upload: &VideoUpload) -> Result<i64, ApiError> {
        if !self.session.is_active() {
            return Err(ApiError::AuthRequired);
        }
        let video_id = self.service.upload(upload)?;
        if let Err(err) = self.reload() {
            eprintln!("catalog: refresh after upload: {err}");
        }
        Ok(video_id)
    }

    pub fn edit(&self, id: i64, edit: &VideoEdit) -> Result<(), ApiError> {
        self.ensure_owner(id)?;
        let updated = self.service.update(id, edit)?;
        self.apply_patch(id, &VideoPatch::from(updated));
        // The watch view shows fields the patch does not carry, so refresh it.
        if self.state.read().current_id == Some(id) {
            if let Err(err) = self.load_detail(id) {
                eprintln!("catalog: refresh after edit: {err}");
            }
        }
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.ensure_owner(id)?;
        self.service.delete(id)?;
        let mut state = self.state.write();
        state.videos.retain(|v| v.id != id);
        if state.current_id == Some(id) {
            state.current_id = None;
        }
        Ok(())
    }

    /// Uploader-only mutations are refused before any network call when the
    /// catalog already knows the video belongs to someone else. The server
    /// remains authoritative for the rest.
    fn ensure_owner(&self, id: i64) -> Result<(), ApiError> {
        let Some(user) = self.session.user() else {
            return Err(ApiError::AuthRequired);
        };
        if let Some(video) = self.video(id) {
            if video.channel != user.username {
                return Err(ApiError::Forbidden(
                    "only the uploader can modify this video".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{mock_video, MockCatalogService};
    use crate::session::{Session, UserIdentity};
    use std::sync::atomic::Ordering;

    fn active_session(cell: &SessionCell, username: &str) {
        cell.activate(Session {
            token: "tok".into(),
            user: UserIdentity {
                id: 7,
                username: username.into(),
                profile_image: None,
            },
        });
    }

    fn cache_with(service: Arc<MockCatalogService>) -> (Arc<SessionCell>, CatalogCache) {
        let cell = Arc::new(SessionCell::new());
        let cache = CatalogCache::new(cell.clone(), service);
        (cell, cache)
    }

    #[test]
    fn failed_list_clears_instead_of_going_stale() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(1, 0, 0)]));
        service.push_list(Err(ApiError::NotFound));
        let (_cell, cache) = cache_with(service);

        cache.load_list("").unwrap();
        assert_eq!(cache.videos().len(), 1);

        assert!(cache.load_list("otters").is_err());
        assert!(cache.videos().is_empty());
    }

    #[test]
    fn detail_merges_richer_fields_and_preserves_the_rest() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(7, 10, 2), mock_video(8, 5, 0)]));
        let mut detail = mock_video(7, 10, 2);
        detail.video_url = Some("http://cdn.example/v/7".into());
        detail.description = Some("full description".into());
        detail.subscriber_count = Some(42);
        service.push_detail(Ok(detail));
        let (_cell, cache) = cache_with(service);

        cache.load_list("").unwrap();
        cache.load_detail(7).unwrap();

        let merged = cache.video(7).unwrap();
        assert_eq!(merged.video_url.as_deref(), Some("http://cdn.example/v/7"));
        assert_eq!(merged.subscriber_count, Some(42));
        assert_eq!(cache.video(8).unwrap(), mock_video(8, 5, 0));
        assert_eq!(cache.current().unwrap().id, 7);
    }

    #[test]
    fn detail_for_unknown_id_joins_the_working_set() {
        let service = Arc::new(MockCatalogService::default());
        service.push_detail(Ok(mock_video(99, 1, 0)));
        let (_cell, cache) = cache_with(service);

        cache.load_detail(99).unwrap();
        assert_eq!(cache.video(99).unwrap().id, 99);
    }

    #[test]
    fn apply_patch_is_idempotent() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(1, 10, 2)]));
        let (_cell, cache) = cache_with(service);
        cache.load_list("").unwrap();

        let patch = VideoPatch::counts(11, 2);
        cache.apply_patch(1, &patch);
        let once = cache.video(1).unwrap();
        cache.apply_patch(1, &patch);
        assert_eq!(cache.video(1).unwrap(), once);
        assert_eq!(once.likes, 11);
    }

    #[test]
    fn generation_bumps_on_list_replacement_only() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(1, 0, 0)]));
        service.push_detail(Ok(mock_video(1, 0, 0)));
        let (_cell, cache) = cache_with(service);

        let start = cache.generation();
        cache.load_list("").unwrap();
        assert_eq!(cache.generation(), start + 1);
        cache.load_detail(1).unwrap();
        assert_eq!(cache.generation(), start + 1);
    }

    #[test]
    fn delete_refused_for_foreign_video_without_network() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(1, 0, 0)]));
        let (cell, cache) = cache_with(service.clone());
        active_session(&cell, "someone-else");
        cache.load_list("").unwrap();

        let err = cache.delete(1).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(service.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.videos().len(), 1);
    }

    #[test]
    fn delete_removes_entry_and_closes_watch_view() {
        let service = Arc::new(MockCatalogService::default());
        service.push_list(Ok(vec![mock_video(1, 0, 0)]));
        service.push_detail(Ok(mock_video(1, 0, 0)));
        let (cell, cache) = cache_with(service);
        active_session(&cell, "channel");
        cache.load_list("").unwrap();
        cache.load_detail(1).unwrap();

        cache.delete(1).unwrap();
        assert!(cache.videos().is_empty());
        assert!(cache.current().is_none());
    }

    #[test]
    fn upload_requires_a_session() {
        let service = Arc::new(MockCatalogService::default());
        let (_cell, cache) = cache_with(service);
        let err = cache
            .upload(&VideoUpload {
                video_path: "clip.mp4".into(),
                thumbnail_path: None,
                title: "t".into(),
                description: String::new(),
                duration: "0:00".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthRequired));
    }
}
