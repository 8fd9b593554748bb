use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::{
    self, ApiError, Comment, ReactionCounts, UpdatedVideoFields, UserProfile, UserSummary, Video,
    VideoEdit, VideoUpload,
};

pub trait CatalogService: Send + Sync {
    fn list(&self, query: &str) -> Result<Vec<Video>, ApiError>;
    fn detail(&self, id: i64) -> Result<Video, ApiError>;
    fn upload(&self, upload: &VideoUpload) -> Result<i64, ApiError>;
    fn update(&self, id: i64, edit: &VideoEdit) -> Result<UpdatedVideoFields, ApiError>;
    fn delete(&self, id: i64) -> Result<(), ApiError>;
}

pub trait InteractionService: Send + Sync {
    fn like(&self, video_id: i64, user_id: i64) -> Result<ReactionCounts, ApiError>;
    fn dislike(&self, video_id: i64, user_id: i64) -> Result<ReactionCounts, ApiError>;
}

pub trait SubscriptionService: Send + Sync {
    fn toggle(&self, user_id: i64, channel: &str) -> Result<bool, ApiError>;
    fn list(&self, user_id: i64) -> Result<Vec<String>, ApiError>;
}

pub trait CommentService: Send + Sync {
    fn list(&self, video_id: i64) -> Result<Vec<Comment>, ApiError>;
    fn create(&self, video_id: i64, user_id: i64, content: &str) -> Result<Comment, ApiError>;
    fn update(&self, comment_id: i64, content: &str) -> Result<(), ApiError>;
    fn delete(&self, comment_id: i64) -> Result<(), ApiError>;
}

pub trait ProfileService: Send + Sync {
    fn profile(&self, username: &str) -> Result<UserProfile, ApiError>;
    fn search(&self, query: &str) -> Result<Vec<UserSummary>, ApiError>;
}

// -- backend-backed implementations -----------------------------------------

pub struct HttpCatalogService {
    client: Arc<api::Client>,
}

impl HttpCatalogService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for HttpCatalogService {
    fn list(&self, query: &str) -> Result<Vec<Video>, ApiError> {
        self.client.list_videos(query)
    }

    fn detail(&self, id: i64) -> Result<Video, ApiError> {
        self.client.video_detail(id)
    }

    fn upload(&self, upload: &VideoUpload) -> Result<i64, ApiError> {
        Ok(self.client.upload_video(upload)?.video_id)
    }

    fn update(&self, id: i64, edit: &VideoEdit) -> Result<UpdatedVideoFields, ApiError> {
        self.client.update_video(id, edit)
    }

    fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.client.delete_video(id)
    }
}

pub struct HttpInteractionService {
    client: Arc<api::Client>,
}

impl HttpInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for HttpInteractionService {
    fn like(&self, video_id: i64, user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.client.like_video(video_id, user_id)
    }

    fn dislike(&self, video_id: i64, user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.client.dislike_video(video_id, user_id)
    }
}

pub struct HttpSubscriptionService {
    client: Arc<api::Client>,
}

impl HttpSubscriptionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl SubscriptionService for HttpSubscriptionService {
    fn toggle(&self, user_id: i64, channel: &str) -> Result<bool, ApiError> {
        self.client.subscribe(user_id, channel)
    }

    fn list(&self, user_id: i64) -> Result<Vec<String>, ApiError> {
        self.client.subscriptions(user_id)
    }
}

pub struct HttpCommentService {
    client: Arc<api::Client>,
}

impl HttpCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for HttpCommentService {
    fn list(&self, video_id: i64) -> Result<Vec<Comment>, ApiError> {
        self.client.comments(video_id)
    }

    fn create(&self, video_id: i64, user_id: i64, content: &str) -> Result<Comment, ApiError> {
        self.client.create_comment(video_id, user_id, content)
    }

    fn update(&self, comment_id: i64, content: &str) -> Result<(), ApiError> {
        self.client.update_comment(comment_id, content)
    }

    fn delete(&self, comment_id: i64) -> Result<(), ApiError> {
        self.client.delete_comment(comment_id)
    }
}

pub struct HttpProfileService {
    client: Arc<api::Client>,
}

impl HttpProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for HttpProfileService {
    fn profile(&self, username: &str) -> Result<UserProfile, ApiError> {
        self.client.user_profile(username)
    }

    fn search(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        self.client.search_users(query)
    }
}

// -- scriptable mocks --------------------------------------------------------
//
// Each mock pops queued responses and counts calls, so tests can assert both
// what a store did with a response and whether a request was issued at all.

pub fn mock_video(id: i64, likes: i64, dislikes: i64) -> Video {
    Video {
        id,
        title: format!("Video {}", id),
        description: None,
        channel: "channel".into(),
        thumbnail: None,
        views: "0".into(),
        upload_time: "just now".into(),
        upload_date: None,
        duration: "1:00".into(),
        likes,
        dislikes,
        video_url: None,
        subscriber_count: None,
    }
}

pub fn mock_comment(id: i64, user_id: i64, username: &str, content: &str) -> Comment {
    Comment {
        id,
        user_id,
        username: username.into(),
        content: content.into(),
        created_at: "just now".into(),
    }
}

#[derive(Default)]
pub struct MockCatalogService {
    pub list_responses: Mutex<VecDeque<Result<Vec<Video>, ApiError>>>,
    pub detail_responses: Mutex<VecDeque<Result<Video, ApiError>>>,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl MockCatalogService {
    pub fn push_list(&self, response: Result<Vec<Video>, ApiError>) {
        self.list_responses.lock().push_back(response);
    }

    pub fn push_detail(&self, response: Result<Video, ApiError>) {
        self.detail_responses.lock().push_back(response);
    }
}

impl CatalogService for MockCatalogService {
    fn list(&self, _query: &str) -> Result<Vec<Video>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn detail(&self, _id: i64) -> Result<Video, ApiError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.detail_responses
            .lock()
            .pop_front()
            .unwrap_or(Err(ApiError::NotFound))
    }

    fn upload(&self, _upload: &VideoUpload) -> Result<i64, ApiError> {
        Ok(1)
    }

    fn update(&self, id: i64, edit: &VideoEdit) -> Result<UpdatedVideoFields, ApiError> {
        Ok(UpdatedVideoFields {
            id,
            title: edit.title.clone(),
            description: Some(edit.description.clone()),
            thumbnail: None,
            duration: edit.duration.clone(),
        })
    }

    fn delete(&self, _id: i64) -> Result<(), ApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockInteractionService {
    pub like_responses: Mutex<VecDeque<Result<ReactionCounts, ApiError>>>,
    pub dislike_responses: Mutex<VecDeque<Result<ReactionCounts, ApiError>>>,
    pub like_calls: AtomicUsize,
    pub dislike_calls: AtomicUsize,
}

impl MockInteractionService {
    pub fn push_like(&self, response: Result<ReactionCounts, ApiError>) {
        self.like_responses.lock().push_back(response);
    }

    pub fn push_dislike(&self, response: Result<ReactionCounts, ApiError>) {
        self.dislike_responses.lock().push_back(response);
    }
}

impl InteractionService for MockInteractionService {
    fn like(&self, _video_id: i64, _user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.like_responses
            .lock()
            .pop_front()
            .unwrap_or(Err(ApiError::NotFound))
    }

    fn dislike(&self, _video_id: i64, _user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.dislike_calls.fetch_add(1, Ordering::SeqCst);
        self.dislike_responses
            .lock()
            .pop_front()
            .unwrap_or(Err(ApiError::NotFound))
    }
}

#[derive(Default)]
pub struct MockSubscriptionService {
    pub toggle_responses: Mutex<VecDeque<Result<bool, ApiError>>>,
    pub list_responses: Mutex<VecDeque<Result<Vec<String>, ApiError>>>,
    pub toggle_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl MockSubscriptionService {
    pub fn push_toggle(&self, response: Result<bool, ApiError>) {
        self.toggle_responses.lock().push_back(response);
    }

    pub fn push_list(&self, response: Result<Vec<String>, ApiError>) {
        self.list_responses.lock().push_back(response);
    }
}

impl SubscriptionService for MockSubscriptionService {
    fn toggle(&self, _user_id: i64, _channel: &str) -> Result<bool, ApiError> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        self.toggle_responses
            .lock()
            .pop_front()
            .unwrap_or(Err(ApiError::NotFound))
    }

    fn list(&self, _user_id: i64) -> Result<Vec<String>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
pub struct MockCommentService {
    pub list_responses: Mutex<VecDeque<Result<Vec<Comment>, ApiError>>>,
    pub create_responses: Mutex<VecDeque<Result<Comment, ApiError>>>,
    pub update_responses: Mutex<VecDeque<Result<(), ApiError>>>,
    pub delete_responses: Mutex<VecDeque<Result<(), ApiError>>>,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl MockCommentService {
    pub fn push_list(&self, response: Result<Vec<Comment>, ApiError>) {
        self.list_responses.lock().push_back(response);
    }

    pub fn push_create(&self, response: Result<Comment, ApiError>) {
        self.create_responses.lock().push_back(response);
    }

    pub fn push_update(&self, response: Result<(), ApiError>) {
        self.update_responses.lock().push_back(response);
    }

    pub fn push_delete(&self, response: Result<(), ApiError>) {
        self.delete_responses.lock().push_back(response);
    }
}

impl CommentService for MockCommentService {
    fn list(&self, _video_id: i64) -> Result<Vec<Comment>, ApiError> {
        self.list_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn create(&self, _video_id: i64, user_id: i64, content: &str) -> Result<Comment, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.create_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(mock_comment(1, user_id, "mock", content)))
    }

    fn update(&self, _comment_id: i64, _content: &str) -> Result<(), ApiError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.update_responses.lock().pop_front().unwrap_or(Ok(()))
    }

    fn delete(&self, _comment_id: i64) -> Result<(), ApiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.delete_responses.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
pub struct MockProfileService {
    pub profiles: Mutex<HashMap<String, UserProfile>>,
    pub failing: Mutex<Vec<String>>,
    pub profile_calls: AtomicUsize,
}

impl MockProfileService {
    pub fn insert_image(&self, username: &str, image: Option<&str>) {
        self.profiles.lock().insert(
            username.to_string(),
            UserProfile {
                id: 0,
                username: username.to_string(),
                subscriber_count: 0,
                is_subscribed: false,
                videos: Vec::new(),
                profile_image: image.map(|s| s.to_string()),
                banner_image: None,
                bio: None,
                video_count: 0,
            },
        );
    }

    pub fn fail_for(&self, username: &str) {
        self.failing.lock().push(username.to_string());
    }
}

impl ProfileService for MockProfileService {
    fn profile(&self, username: &str) -> Result<UserProfile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().iter().any(|u| u == username) {
            return Err(ApiError::NotFound);
        }
        self.profiles
            .lock()
            .get(username)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    fn search(&self, _query: &str) -> Result<Vec<UserSummary>, ApiError> {
        Ok(self
            .profiles
            .lock()
            .values()
            .map(|p| UserSummary {
                id: p.id,
                username: p.username.clone(),
                subscriber_count: p.subscriber_count,
            })
            .collect())
    }
}
