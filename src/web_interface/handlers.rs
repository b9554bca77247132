use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;
use warp::http::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};
use warp::http::StatusCode;
use warp::{reply, Reply};

use super::types::*;
use crate::device_control::{Credentials, DeviceAddress};
use crate::error_handling::types::SessionError;
use crate::session_management::{Session, SessionRegistry};

pub const SESSION_COOKIE: &str = "session_id";

/// A rendered API answer: HTTP status mirrors the envelope `code`.
#[derive(Debug)]
pub struct ApiReply {
    pub code: u16,
    pub body: serde_json::Value,
    pub cookie: Option<String>,
}

impl ApiReply {
    pub fn from_response<T: Serialize>(response: ApiResponse<T>) -> Self {
        let code = response.code;
        let body = serde_json::to_value(&response).unwrap_or_else(|e| {
            serde_json::json!({ "code": 500, "message": e.to_string(), "data": null })
        });
        Self {
            code,
            body,
            cookie: None,
        }
    }

    fn empty(code: u16, message: &str) -> Self {
        Self::from_response(ApiResponse::empty(code, message))
    }
}

impl Reply for ApiReply {
    fn into_response(self) -> reply::Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = reply::with_status(reply::json(&self.body), status).into_response();
        if let Some(cookie) = self.cookie {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(SET_COOKIE, value);
                }
                Err(e) => warn!("Dropping unencodable cookie: {}", e),
            }
        }
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Device errors are reported with code 404 and a per-operation message; everything else
/// carries the error text.
fn failure(e: SessionError, device_message: &str) -> ApiReply {
    match e {
        SessionError::NotFound => ApiReply::empty(401, "Session not found"),
        SessionError::NoFrameAvailable => ApiReply::empty(500, "No frame received"),
        SessionError::DeviceCommandFailed(cause) => {
            debug!("{}: {}", device_message, cause);
            ApiReply::empty(404, device_message)
        }
        other => ApiReply::empty(500, &other.to_string()),
    }
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiReply> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        ApiReply::empty(400, "Invalid request parameters")
    })
}

/// Request handlers, independent of the HTTP routing.
#[derive(Clone)]
pub struct Handlers {
    registry: Arc<SessionRegistry>,
    cookie_max_age_secs: u64,
}

impl Handlers {
    pub fn new(registry: Arc<SessionRegistry>, cookie_max_age_secs: u64) -> Self {
        Self {
            registry,
            cookie_max_age_secs,
        }
    }

    fn session_cookie(&self, id: &Uuid) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; Max-Age={}",
            SESSION_COOKIE, id, self.cookie_max_age_secs
        )
    }

    async fn session(&self, cookie: Option<String>) -> Result<Arc<Session>, ApiReply> {
        let cookie = cookie.ok_or_else(|| ApiReply::empty(401, "Unauthorized"))?;
        let id = Uuid::parse_str(&cookie).map_err(|_| ApiReply::empty(401, "Session not found"))?;
        self.registry
            .get(&id)
            .await
            .map_err(|e| failure(e, "Session not found"))
    }

    pub fn home(&self) -> ServerBanner {
        ServerBanner {
            message: String::from("PTZ Server"),
        }
    }

    pub async fn connect(&self, body: Bytes) -> ApiReply {
        let request: ConnectRequest = match parse(&body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        let address = DeviceAddress::new(request.ip, request.port);
        let credentials = Credentials::new(request.username, request.password);
        match self.registry.find_or_create(address.clone(), credentials).await {
            Ok((session, created)) => {
                let message = if created {
                    "Session started"
                } else {
                    info!("[{}] Session exists for {}", session.id(), address);
                    "Session exists"
                };
                let mut reply = ApiReply::from_response(ApiResponse::ok(
                    message,
                    SessionIdData {
                        session_id: session.id().to_string(),
                    },
                ));
                reply.cookie = Some(self.session_cookie(&session.id()));
                reply
            }
            Err(e) => {
                warn!("Cannot connect to {}: {}", address, e);
                ApiReply::empty(500, &e.to_string())
            }
        }
    }

    pub async fn config(&self, cookie: Option<String>) -> ApiReply {
        match self.session(cookie).await {
            Ok(session) => {
                ApiReply::from_response(ApiResponse::ok("PTZ config", session.configuration()))
            }
            Err(reply) => reply,
        }
    }

    pub async fn presets(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.presets().await {
            Ok(presets) => {
                ApiReply::from_response(ApiResponse::ok("PTZ presets", PresetList { presets }))
            }
            Err(e) => failure(e, "Cannot get PTZ presets"),
        }
    }

    pub async fn position(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.status().await {
            Ok(status) => ApiReply::from_response(ApiResponse::ok("PTZ position", status)),
            Err(e) => failure(e, "Cannot get PTZ status"),
        }
    }

    pub async fn moving(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.moving().await {
            Ok(moving) => ApiReply::from_response(ApiResponse::ok("PTZ moving status", moving)),
            Err(e) => failure(e, "Cannot get PTZ status"),
        }
    }

    pub async fn snapshot(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.snapshot().await {
            Ok(image) => ApiReply::from_response(ApiResponse::ok(
                "Snapshot",
                SnapshotData {
                    w: image.width,
                    h: image.height,
                    image: image.to_data_uri(),
                },
            )),
            Err(e) => failure(e, "Cannot take snapshot"),
        }
    }

    pub async fn sessions(&self) -> ApiReply {
        ApiReply::from_response(ApiResponse::ok("Sessions", self.registry.list().await))
    }

    pub async fn change_profile(&self, cookie: Option<String>, body: Bytes) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        let request: ProfileRequest = match parse(&body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        match session.change_profile(&request.profile).await {
            Ok(()) => ApiReply::from_response(ApiResponse::ok("Change profile", request)),
            Err(e) => failure(e, "Cannot change profile"),
        }
    }

    pub async fn relative_move(&self, cookie: Option<String>, body: Bytes) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        let request: PositionRequest = match parse(&body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        match session
            .relative_move(request.vector(), request.speed())
            .await
        {
            Ok(()) => ApiReply::empty(200, "Set PTZ to relative position"),
            Err(e) => failure(e, "Cannot set PTZ to relative position"),
        }
    }

    pub async fn goto_position(&self, cookie: Option<String>, body: Bytes) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        let request: PositionRequest = match parse(&body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        match session
            .absolute_move(request.vector(), request.speed())
            .await
        {
            Ok(()) => ApiReply::empty(200, "Set PTZ to position"),
            Err(e) => failure(e, "Cannot set PTZ to position"),
        }
    }

    pub async fn goto_preset(&self, cookie: Option<String>, body: Bytes) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        let request: PresetRequest = match parse(&body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        match session.goto_preset(&request.preset).await {
            Ok(()) => ApiReply::from_response(ApiResponse::ok(
                "Set the camera to preset position",
                request,
            )),
            Err(e) => failure(e, "Cannot set the camera to preset position"),
        }
    }

    pub async fn goto_home(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.goto_home().await {
            Ok(()) => ApiReply::empty(200, "Set PTZ to Home position"),
            Err(e) => failure(e, "Cannot set PTZ to Home position"),
        }
    }

    pub async fn stop(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.stop().await {
            Ok(()) => ApiReply::empty(200, "Stop PTZ"),
            Err(e) => failure(e, "Cannot stop PTZ movement"),
        }
    }

    pub async fn restart_stream(&self, cookie: Option<String>) -> ApiReply {
        let session = match self.session(cookie).await {
            Ok(session) => session,
            Err(reply) => return reply,
        };
        match session.restart_ingest().await {
            Ok(restarted) => ApiReply::from_response(ApiResponse::ok(
                "Restart stream",
                RestartData { restarted },
            )),
            Err(e) => failure(e, "Cannot restart stream"),
        }
    }
}
