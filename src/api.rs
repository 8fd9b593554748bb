use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8087/api";

/// Source of the bearer credential for authenticated calls, plus the hook the
/// gateway fires when the backend rejects that credential with a 401.
pub trait Credentials: Send + Sync {
    fn bearer(&self) -> Option<String>;
    fn handle_unauthorized(&self);
}

/// No session, ever. Useful for anonymous clients and tests.
#[derive(Debug, Default)]
pub struct AnonymousCredentials;

impl Credentials for AnonymousCredentials {
    fn bearer(&self) -> Option<String> {
        None
    }

    fn handle_unauthorized(&self) {}
}

/// Client-side failure taxonomy. Store operations reject locally with
/// `AuthRequired` before any network call; everything else maps from the
/// backend response or the transport.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    AuthRequired,
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("another request is already in flight")]
    InFlight,
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
    #[error("api error {status}: {message}")]
    Unexpected { status: u16, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    credentials: Arc<dyn Credentials>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

enum Auth<'a> {
    /// Attach the bearer from `Credentials` when one exists. A 401 on such a
    /// request means the session died: the gateway notifies the credential
    /// owner and the caller sees `SessionExpired`.
    Inherit,
    /// Attach a specific token without consulting `Credentials`, and do not
    /// fire the unauthorized hook. Used by the restore liveness check.
    Token(&'a str),
    /// Plain anonymous call (login, public reads).
    None,
}

enum Body {
    Empty,
    Json(serde_json::Value),
    Multipart(Form),
}

impl Client {
    pub fn new(credentials: Arc<dyn Credentials>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut base_url = Url::parse(&base)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            credentials,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    // -- catalog ------------------------------------------------------------

    pub fn list_videos(&self, query: &str) -> Result<Vec<Video>, ApiError> {
        let params: Vec<(&str, String)> = if query.trim().is_empty() {
            Vec::new()
        } else {
            vec![("q", query.trim().to_string())]
        };
        let resp = self.request(Method::GET, "videos", &params, Body::Empty, Auth::None)?;
        Ok(resp.json()?)
    }

    /// Fetching the detail record also increments the view count server-side.
    pub fn video_detail(&self, id: i64) -> Result<Video, ApiError> {
        let resp = self.request(
            Method::GET,
            &format!("videos/{}", id),
            &[],
            Body::Empty,
            Auth::None,
        )?;
        Ok(resp.json()?)
    }

    pub fn upload_video(&self, upload: &VideoUpload) -> Result<UploadAck, ApiError> {
        let mut form = Form::new()
            .file("video", &upload.video_path)?
            .text("title", upload.title.clone())
            .text("description", upload.description.clone())
            .text("duration", upload.duration.clone());
        if let Some(thumb) = &upload.thumbnail_path {
            form = form.file("thumbnail", thumb)?;
        }
        let resp = self.request(
            Method::POST,
            "videos/upload",
            &[],
            Body::Multipart(form),
            Auth::Inherit,
        )?;
        Ok(resp.json()?)
    }

    pub fn update_video(&self, id: i64, edit: &VideoEdit) -> Result<UpdatedVideoFields, ApiError> {
        let mut form = Form::new()
            .text("title", edit.title.clone())
            .text("description", edit.description.clone())
            .text("duration", edit.duration.clone());
        if let Some(thumb) = &edit.thumbnail_path {
            form = form.file("thumbnail", thumb)?;
        }
        let resp = self.request(
            Method::PUT,
            &format!("videos/{}", id),
            &[],
            Body::Multipart(form),
            Auth::Inherit,
        )?;
        let ack: VideoUpdateAck = resp.json()?;
        Ok(ack.video)
    }

    pub fn delete_video(&self, id: i64) -> Result<(), ApiError> {
        self.request(
            Method::DELETE,
            &format!("videos/{}", id),
            &[],
            Body::Empty,
            Auth::Inherit,
        )?;
        Ok(())
    }

    // -- reactions ----------------------------------------------------------

    pub fn like_video(&self, id: i64, user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.reaction(id, user_id, "like")
    }

    pub fn dislike_video(&self, id: i64, user_id: i64) -> Result<ReactionCounts, ApiError> {
        self.reaction(id, user_id, "dislike")
    }

    fn reaction(&self, id: i64, user_id: i64, kind: &str) -> Result<ReactionCounts, ApiError> {
        let resp = self.request(
            Method::POST,
            &format!("videos/{}/{}", id, kind),
            &[],
            Body::Json(serde_json::json!({ "userId": user_id })),
            Auth::Inherit,
        )?;
        Ok(resp.json()?)
    }

    // -- comments -----------------------------------------------------------

    pub fn comments(&self, video_id: i64) -> Result<Vec<Comment>, ApiError> {
        let resp = self.request(
            Method::GET,
            &format!("videos/{}/comments", video_id),
            &[],
            Body::Empty,
            Auth::None,
        )?;
        Ok(resp.json()?)
    }

    pub fn create_comment(
        &self,
        video_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment, ApiError> {
        let resp = self.request(
            Method::POST,
            &format!("videos/{}/comments", video_id),
            &[],
            Body::Json(serde_json::json!({ "userId": user_id, "content": content })),
            Auth::Inherit,
        )?;
        let ack: CommentAck = resp.json()?;
        Ok(ack.comment)
    }

    pub fn update_comment(&self, comment_id: i64, content: &str) -> Result<(), ApiError> {
        self.request(
            Method::PUT,
            &format!("comments/{}", comment_id),
            &[],
            Body::Json(serde_json::json!({ "content": content })),
            Auth::Inherit,
        )?;
        Ok(())
    }

    pub fn delete_comment(&self, comment_id: i64) -> Result<(), ApiError> {
        self.request(
            Method::DELETE,
            &format!("comments/{}", comment_id),
            &[],
            Body::Empty,
            Auth::Inherit,
        )?;
        Ok(())
    }

    // -- accounts -----------------------------------------------------------

    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let resp = self.request(
            Method::POST,
            "login",
            &[],
            Body::Json(serde_json::json!({ "username": username, "password": password })),
            Auth::None,
        )?;
        Ok(resp.json()?)
    }

    pub fn signup(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.request(
            Method::POST,
            "signup",
            &[],
            Body::Json(serde_json::json!({ "username": username, "password": password })),
            Auth::None,
        )?;
        Ok(())
    }

    /// Liveness check for a persisted token. Does not consult or invalidate
    /// the live credential source: a dead token here is a restore failure,
    /// not a session expiry.
    pub fn verify_token(&self, token: &str) -> Result<VerifiedUser, ApiError> {
        let resp = self.request(
            Method::GET,
            "verify-token",
            &[],
            Body::Empty,
            Auth::Token(token),
        )?;
        let ack: VerifyAck = resp.json()?;
        Ok(ack.user)
    }

    pub fn user_profile(&self, username: &str) -> Result<UserProfile, ApiError> {
        let resp = self.request(
            Method::GET,
            &format!("users/{}", username),
            &[],
            Body::Empty,
            Auth::Inherit,
        )?;
        Ok(resp.json()?)
    }

    pub fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        let params: Vec<(&str, String)> = if query.trim().is_empty() {
            Vec::new()
        } else {
            vec![("q", query.trim().to_string())]
        };
        let resp = self.request(Method::GET, "users", &params, Body::Empty, Auth::None)?;
        Ok(resp.json()?)
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let mut form = Form::new();
        if let Some(bio) = &update.bio {
            form = form.text("bio", bio.clone());
        }
        if let Some(image) = &update.profile_image_path {
            form = form.file("profileImage", image)?;
        }
        if let Some(banner) = &update.banner_image_path {
            form = form.file("bannerImage", banner)?;
        }
        self.request(
            Method::PUT,
            "profile/update",
            &[],
            Body::Multipart(form),
            Auth::Inherit,
        )?;
        Ok(())
    }

    pub fn change_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        self.request(
            Method::PUT,
            "profile/change-password",
            &[],
            Body::Json(serde_json::json!({
                "currentPassword": current,
                "newPassword": new,
            })),
            Auth::Inherit,
        )?;
        Ok(())
    }

    pub fn delete_account(&self, password: &str) -> Result<(), ApiError> {
        self.request(
            Method::DELETE,
            "profile/delete-account",
            &[],
            Body::Json(serde_json::json!({ "password": password })),
            Auth::Inherit,
        )?;
        Ok(())
    }

    // -- subscriptions ------------------------------------------------------

    /// The endpoint toggles: the returned flag is the resulting state.
    pub fn subscribe(&self, user_id: i64, channel: &str) -> Result<bool, ApiError> {
        let resp = self.request(
            Method::POST,
            "subscribe",
            &[],
            Body::Json(serde_json::json!({ "userId": user_id, "channelName": channel })),
            Auth::Inherit,
        )?;
        let ack: SubscribeAck = resp.json()?;
        Ok(ack.subscribed)
    }

    pub fn subscriptions(&self, user_id: i64) -> Result<Vec<String>, ApiError> {
        let resp = self.request(
            Method::GET,
            &format!("subscriptions/{}", user_id),
            &[],
            Body::Empty,
            Auth::Inherit,
        )?;
        Ok(resp.json()?)
    }

    // -- gateway core -------------------------------------------------------

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Body,
        auth: Auth<'_>,
    ) -> Result<Response, ApiError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| anyhow::anyhow!("api: build url for {path}: {err}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());

        let bearer = match auth {
            Auth::Inherit => self.credentials.bearer(),
            Auth::Token(token) => Some(token.to_string()),
            Auth::None => None,
        };
        let authenticated = matches!(auth, Auth::Inherit) && bearer.is_some();
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // JSON bodies set the content type explicitly; multipart leaves it to
        // the transport so the boundary parameter survives.
        req = match body {
            Body::Empty => req,
            Body::Json(value) => req.json(&value),
            Body::Multipart(form) => req.multipart(form),
        };

        let resp = req.send()?;
        self.finish(resp, authenticated)
    }

    fn finish(&self, resp: Response, authenticated: bool) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = error_message(resp);
        match status.as_u16() {
            401 if authenticated => {
                // Invalidate the session exactly once, then hand the failure
                // back: callers must still see their own call fail.
                self.credentials.handle_unauthorized();
                Err(ApiError::SessionExpired)
            }
            401 => Err(ApiError::Validation(message)),
            403 => Err(ApiError::Forbidden(message)),
            404 => Err(ApiError::NotFound),
            400..=499 => Err(ApiError::Validation(message)),
            _ => Err(ApiError::Unexpected {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

/// The backend reports failures as `{"error": message}`.
fn error_message(resp: Response) -> String {
    let body = resp.text().unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.error.is_empty() => parsed.error,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => "request failed".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

// -- wire models ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub channel: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Pre-formatted by the server ("312", "1.2K", "3.4M").
    #[serde(default)]
    pub views: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub dislikes: i64,
    #[serde(default)]
    pub video_url: Option<String>,
    /// Only present on the detail projection.
    #[serde(default)]
    pub subscriber_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCounts {
    pub likes: i64,
    pub dislikes: i64,
    #[serde(default)]
    pub is_liked: Option<bool>,
    #[serde(default)]
    pub is_disliked: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub id: i64,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct VerifyAck {
    #[serde(default)]
    #[allow(dead_code)]
    valid: bool,
    user: VerifiedUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub subscriber_count: i64,
    #[serde(default)]
    pub is_subscribed: bool,
    #[serde(default)]
    pub videos: Vec<ChannelVideo>,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub banner_image: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub video_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelVideo {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub views: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub subscriber_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadAck {
    #[serde(rename = "video_id")]
    pub video_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoUpdateAck {
    video: UpdatedVideoFields,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedVideoFields {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentAck {
    comment: Comment,
}

#[derive(Debug, Clone, Deserialize)]
struct SubscribeAck {
    subscribed: bool,
}

#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub title: String,
    pub description: String,
    pub duration: String,
}

#[derive(Debug, Clone, Default)]
pub struct VideoEdit {
    pub title: String,
    pub description: String,
    pub duration: String,
    pub thumbnail_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub profile_image_path: Option<PathBuf>,
    pub banner_image_path: Option<PathBuf>,
}
