use crate::engine::EngineHandle;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rollcall_core::{AttendanceRecord, Ledger, Status};
use std::convert::Infallible;
use std::fmt::Write;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// State shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub engine: EngineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/attendance_data", get(attendance_data))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let rows = load_ledger(state.ledger).await?;
    Ok(Html(render_index(&rows)))
}

async fn attendance_data(State(state): State<AppState>) -> Result<Json<Vec<AttendanceRecord>>, StatusCode> {
    Ok(Json(load_ledger(state.ledger).await?))
}

async fn video_feed(State(state): State<AppState>) -> Response {
    let frames = match state.engine.subscribe().await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(error = %e, "video feed requested but engine is unavailable");
            return (StatusCode::SERVICE_UNAVAILABLE, "video engine unavailable").into_response();
        }
    };

    let parts = ReceiverStream::new(frames).map(|jpeg| Ok::<_, Infallible>(multipart_part(&jpeg)));
    ([(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)], Body::from_stream(parts)).into_response()
}

/// Ledger reads hit the disk, so they run on the blocking pool.
async fn load_ledger(ledger: Ledger) -> Result<Vec<AttendanceRecord>, StatusCode> {
    match tokio::task::spawn_blocking(move || ledger.load()).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to read ledger");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::error!(error = %e, "ledger read task failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = Vec::with_capacity(HEAD.len() + jpeg.len() + 2);
    part.extend_from_slice(HEAD);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

fn render_index(rows: &[AttendanceRecord]) -> String {
    let mut body = String::new();
    for row in rows {
        let time = row
            .time
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match row.status {
            Status::Present => "Present",
            Status::Absent => "Absent",
        };
        let _ = writeln!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&row.name),
            row.date.format("%Y-%m-%d"),
            time,
            status
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Attendance System</title>
</head>
<body>
<h1>Attendance System</h1>
<img src="/video_feed" width="640" height="480" alt="live video">
<h2>Attendance Records</h2>
<table border="1">
<tr><th>Name</th><th>Date</th><th>Time</th><th>Status</th></tr>
{body}</table>
</body>
</html>
"#
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{fakes, spawn_engine};
    use axum::body;
    use axum::http::Request;
    use chrono::NaiveDateTime;
    use rollcall_core::Overlay;
    use tower::ServiceExt;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    /// Engine that has already shut down.
    async fn stopped_engine(ledger: &Ledger) -> EngineHandle {
        let (device, _) = fakes::camera(None);
        let (handle, join) =
            spawn_engine(device, fakes::processor(ledger.clone()), Overlay::bundled().unwrap(), 0).unwrap();
        handle.shutdown().await;
        tokio::task::spawn_blocking(move || join.join().unwrap()).await.unwrap();
        handle
    }

    fn setup() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("webattendance.csv")).unwrap();
        ledger.mark_present("alice", at("2024-01-01 09:00:00")).unwrap();
        ledger
            .mark_absentees(["alice", "<b>bob</b>"], at("2024-01-01 00:00:00").date())
            .unwrap();
        (dir, ledger)
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_lists_rows_escaped() {
        let (_dir, ledger) = setup();
        let engine = stopped_engine(&ledger).await;
        let res = get(router(AppState { ledger, engine }), "/").await;
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("<tr><td>alice</td><td>2024-01-01</td><td>09:00:00</td><td>Present</td></tr>"));
        assert!(html.contains("<td>&lt;b&gt;bob&lt;/b&gt;</td><td>2024-01-01</td><td>-</td><td>Absent</td>"));
        assert!(!html.contains("<b>bob</b>"));
    }

    #[tokio::test]
    async fn test_attendance_data_json() {
        let (_dir, ledger) = setup();
        let engine = stopped_engine(&ledger).await;
        let res = get(router(AppState { ledger, engine }), "/attendance_data").await;
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"Name": "alice", "Date": "2024-01-01", "Time": "09:00:00", "Status": "Present"},
                {"Name": "<b>bob</b>", "Date": "2024-01-01", "Time": "-", "Status": "Absent"},
            ])
        );
    }

    #[tokio::test]
    async fn test_broken_ledger_is_500() {
        let (_dir, ledger) = setup();
        let engine = stopped_engine(&ledger).await;
        std::fs::write(ledger.path(), "Name,Date,Time,Status\nalice,yesterday,09:00:00,Present\n").unwrap();

        let app = router(AppState { ledger, engine });
        assert_eq!(get(app.clone(), "/attendance_data").await.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(get(app, "/").await.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_video_feed_unavailable_without_engine() {
        let (_dir, ledger) = setup();
        let engine = stopped_engine(&ledger).await;
        let res = get(router(AppState { ledger, engine }), "/video_feed").await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_video_feed_streams_multipart_jpeg() {
        let (_dir, ledger) = setup();
        let (device, _) = fakes::camera(None);
        let (engine, join) =
            spawn_engine(device, fakes::processor(ledger.clone()), Overlay::bundled().unwrap(), 0).unwrap();

        let res = get(router(AppState { ledger, engine: engine.clone() }), "/video_feed").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], MJPEG_CONTENT_TYPE);

        let mut parts = res.into_body().into_data_stream();
        let first = parts.next().await.unwrap().unwrap();
        let head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(first.starts_with(head));
        assert_eq!(&first[head.len()..head.len() + 2], &[0xFF, 0xD8]);
        assert!(first.ends_with(b"\r\n"));

        engine.shutdown().await;
        tokio::task::spawn_blocking(move || join.join().unwrap()).await.unwrap();
        while parts.next().await.is_some() {}
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"a&b<c>"d'"#), "a&amp;b&lt;c&gt;&quot;d&#39;");
    }
}
