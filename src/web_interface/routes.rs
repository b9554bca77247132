use bytes::Bytes;
use warp::{reply, Filter, Rejection, Reply};

use super::handlers::{Handlers, SESSION_COOKIE};

fn with_handlers(
    handlers: Handlers,
) -> impl Filter<Extract = (Handlers,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || handlers.clone())
}

fn session_cookie(
) -> impl Filter<Extract = (Option<String>,), Error = std::convert::Infallible> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
}

fn json_body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(64 * 1024).and(warp::body::bytes())
}

/// GET /ptz
pub fn home_route(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ptz")
        .and(warp::get())
        .and(with_handlers(handlers))
        .map(|handlers: Handlers| reply::json(&handlers.home()))
}

/// POST /ptz/connect
pub fn connect_route(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ptz" / "connect")
        .and(warp::post())
        .and(with_handlers(handlers))
        .and(json_body())
        .and_then(|handlers: Handlers, body: Bytes| async move {
            Ok::<_, Rejection>(handlers.connect(body).await)
        })
}

/// GET /ptz/sessions
pub fn sessions_route(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ptz" / "sessions")
        .and(warp::get())
        .and(with_handlers(handlers))
        .and_then(|handlers: Handlers| async move {
            Ok::<_, Rejection>(handlers.sessions().await)
        })
}

/// GET /snapshot
pub fn snapshot_route(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("snapshot")
        .and(warp::get())
        .and(with_handlers(handlers))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.snapshot(sid).await)
        })
}

/// GET /ptz/config, /ptz/presets, /ptz/position, /ptz/moving
pub fn query_routes(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let config = warp::path!("ptz" / "config")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.config(sid).await)
        });
    let presets = warp::path!("ptz" / "presets")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.presets(sid).await)
        });
    let position = warp::path!("ptz" / "position")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.position(sid).await)
        });
    let moving = warp::path!("ptz" / "moving")
        .and(with_handlers(handlers))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.moving(sid).await)
        });

    warp::get().and(config.or(presets).or(position).or(moving))
}

/// POST /ptz/profile, /ptz/move/relative, /ptz/goto/position, /ptz/goto/preset
pub fn command_routes(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let profile = warp::path!("ptz" / "profile")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and(json_body())
        .and_then(|handlers: Handlers, sid: Option<String>, body: Bytes| async move {
            Ok::<_, Rejection>(handlers.change_profile(sid, body).await)
        });
    let relative = warp::path!("ptz" / "move" / "relative")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and(json_body())
        .and_then(|handlers: Handlers, sid: Option<String>, body: Bytes| async move {
            Ok::<_, Rejection>(handlers.relative_move(sid, body).await)
        });
    let position = warp::path!("ptz" / "goto" / "position")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and(json_body())
        .and_then(|handlers: Handlers, sid: Option<String>, body: Bytes| async move {
            Ok::<_, Rejection>(handlers.goto_position(sid, body).await)
        });
    let preset = warp::path!("ptz" / "goto" / "preset")
        .and(with_handlers(handlers))
        .and(session_cookie())
        .and(json_body())
        .and_then(|handlers: Handlers, sid: Option<String>, body: Bytes| async move {
            Ok::<_, Rejection>(handlers.goto_preset(sid, body).await)
        });

    warp::post().and(profile.or(relative).or(position).or(preset))
}

/// POST /ptz/goto/home, /ptz/stop, /ptz/stream/restart
pub fn action_routes(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let home = warp::path!("ptz" / "goto" / "home")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.goto_home(sid).await)
        });
    let stop = warp::path!("ptz" / "stop")
        .and(with_handlers(handlers.clone()))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.stop(sid).await)
        });
    let restart = warp::path!("ptz" / "stream" / "restart")
        .and(with_handlers(handlers))
        .and(session_cookie())
        .and_then(|handlers: Handlers, sid: Option<String>| async move {
            Ok::<_, Rejection>(handlers.restart_stream(sid).await)
        });

    warp::post().and(home.or(stop).or(restart))
}

/// Every API route.
pub fn api_routes(
    handlers: Handlers,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    home_route(handlers.clone())
        .or(connect_route(handlers.clone()))
        .or(sessions_route(handlers.clone()))
        .or(snapshot_route(handlers.clone()))
        .or(query_routes(handlers.clone()))
        .or(command_routes(handlers.clone()))
        .or(action_routes(handlers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::{SessionRegistry, SessionSettings};
    use crate::testing::{backend, scripted_camera, MockConnector};
    use std::sync::Arc;

    fn handlers() -> Handlers {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(MockConnector::new()),
            backend(scripted_camera()),
            SessionSettings::default(),
        ));
        Handlers::new(registry, 300)
    }

    fn message(body: &[u8]) -> String {
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        json["message"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn session_cookie_is_read_from_the_request() {
        let routes = api_routes(handlers());

        let response = warp::test::request()
            .method("GET")
            .path("/ptz/position")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 401);
        assert_eq!(message(response.body()), "Unauthorized");

        let connected = warp::test::request()
            .method("POST")
            .path("/ptz/connect")
            .body(r#"{"ip": "10.0.0.5", "port": 80}"#)
            .reply(&routes)
            .await;
        assert_eq!(connected.status(), 200);
        let cookie = connected
            .headers()
            .get("set-cookie")
            .and_then(|value| value.to_str().ok())
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("session_id="));

        let response = warp::test::request()
            .method("GET")
            .path("/ptz/position")
            .header("cookie", cookie.as_str())
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 200);

        let response = warp::test::request()
            .method("GET")
            .path("/ptz/position")
            .header("cookie", format!("session_id={}", uuid::Uuid::new_v4()))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), 401);
        assert_eq!(message(response.body()), "Session not found");
    }

    #[tokio::test]
    async fn banner_needs_no_session() {
        let response = warp::test::request()
            .path("/ptz")
            .reply(&api_routes(handlers()))
            .await;
        assert_eq!(response.status(), 200);
        assert_eq!(message(response.body()), "PTZ Server");
    }
}
