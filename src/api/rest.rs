//! Dashboard HTTP surface: static index page, config upload, restart.

use std::os::unix::process::CommandExt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tokio::fs;
use tower_http::services::ServeFile;
use tracing::{error, info};

use crate::config;
use crate::context::GatewayContext;

pub fn router() -> Router<Arc<GatewayContext>> {
    Router::new()
        .route_service("/", ServeFile::new("static/index.html"))
        .route("/upload_config", post(upload_config))
        .route("/restart", post(restart))
}

/// Stage the uploaded file, validate it with the same validator the startup
/// path uses, and atomically rename it over the active config only if it
/// passes — the upload never touches the live file on failure.
async fn upload_config(
    State(ctx): State<Arc<GatewayContext>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "no file provided"})),
            )
        }
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"detail": e.to_string()}))),
    };
    let bytes = match field.bytes().await {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"detail": e.to_string()}))),
    };
    let text = match String::from_utf8(bytes.to_vec()) {
        Ok(t) => t,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "uploaded file is not valid utf-8"})),
            )
        }
    };

    if let Err(msg) = config::validate(&text) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": format!("Invalid Config: {msg}")})),
        );
    }

    let temp_path = ctx.config_path.with_extension("yaml.tmp");
    if let Err(e) = fs::write(&temp_path, &text).await {
        error!(error = %e, "failed to stage uploaded config");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "failed to stage config"})),
        );
    }
    if let Err(e) = fs::rename(&temp_path, &ctx.config_path).await {
        error!(error = %e, "failed to install uploaded config");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "failed to install config"})),
        );
    }

    info!("configuration updated via upload; restart required to apply");
    (StatusCode::OK, Json(json!({"status": "Config updated and validated"})))
}

/// Re-exec the current process image after a short delay, giving the HTTP
/// response time to reach the browser first.
async fn restart() -> impl IntoResponse {
    info!("restart requested");
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let exe = match std::env::current_exe() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "could not resolve current executable for restart");
                return;
            }
        };
        let args: Vec<String> = std::env::args().skip(1).collect();
        let err = std::process::Command::new(exe).args(args).exec();
        error!(error = %err, "re-exec failed");
    });
    (StatusCode::OK, Json(json!({"status": "restarting"})))
}
