//! API Routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use std::convert::Infallible;

use crate::error::{Error, Result};
use crate::state::AppState;

/// Multipart boundary token for the live stream. Browsers attach to it via
/// a plain `<img>` tag.
const STREAM_BOUNDARY: &str = "frame";

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Dashboard
        .route("/", get(index))
        // Live stream + controls per camera
        .route("/video/:camera_id", get(video_stream))
        .route("/record/:camera_id", get(toggle_recording))
        .route("/meta/:camera_id", get(camera_meta))
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        .with_state(state)
}

// ========================================
// Stream Handlers
// ========================================

/// Chunked multipart MJPEG stream. Each connected viewer holds its own
/// receiver on the pipeline's latest-frame cell: slow viewers skip frames
/// instead of backpressuring ingestion or each other.
async fn video_stream(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let pipeline = state.pipeline(&camera_id)?;
    let mut frames = pipeline.subscribe_frames();

    tracing::debug!(camera_id = %camera_id, "Live viewer attached");

    let stream = async_stream::stream! {
        loop {
            // closed sender means the pipeline shut down
            if frames.changed().await.is_err() {
                break;
            }
            let frame = frames.borrow_and_update().clone();
            if let Some(frame) = frame {
                yield Ok::<Bytes, Infallible>(mjpeg_part(&frame.jpeg));
            }
        }
    };

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", STREAM_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(format!("stream response build failed: {}", e)))
}

/// One multipart body part: boundary, JPEG content-type header, payload.
fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(STREAM_BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

// ========================================
// Control Handlers
// ========================================

/// Flip the recording toggle; answers the new state as plain text.
async fn toggle_recording(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<String> {
    let pipeline = state.pipeline(&camera_id)?;
    let enabled = pipeline.toggle_recording();
    Ok(format!("{} recording: {}", camera_id, enabled))
}

/// Current telemetry snapshot for one camera
async fn camera_meta(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let pipeline = state.pipeline(&camera_id)?;
    Ok(Json(pipeline.telemetry_snapshot().await))
}

// ========================================
// Dashboard
// ========================================

/// Minimal embedded dashboard: live image plus a 1 Hz telemetry poll per
/// camera.
async fn index(State(state): State<AppState>) -> Html<String> {
    let mut cameras = String::new();
    let mut ids: Vec<&String> = state.pipelines.keys().collect();
    ids.sort();

    for camera_id in ids {
        cameras.push_str(&format!(
            r#"
    <section>
      <h3>{id}</h3>
      <img src="/video/{id}" width="720"/>
      <div id="meta-{id}" class="meta"></div>
      <button onclick="fetch('/record/{id}').then(r=>r.text()).then(t=>alert(t))">
        toggle recording
      </button>
    </section>"#,
            id = camera_id
        ));
    }

    let page = format!(
        r#"<html>
  <head><title>Edge Surveillance Dashboard</title></head>
  <body style="background:#111;color:white;font-family:sans-serif">
  <h2>Edge Surveillance Dashboard</h2>
  {cameras}
  <script>
  setInterval(()=>{{
    document.querySelectorAll('.meta').forEach(el=>{{
      const id = el.id.slice(5);
      fetch('/meta/'+id)
        .then(r=>r.json())
        .then(d=>{{
          el.innerHTML =
            "Score: " + d.score.toFixed(3) + "<br>" +
            "FPS: " + d.fps + "<br>" +
            "Bandwidth Mbps: " + d.bandwidth.toFixed(2) + "<br>" +
            "Resolution: " + (d.resolution || "-") + "<br>" +
            "Frame: " + (d.frame_size || "-") + "<br>" +
            "Recording: " + d.recording + (d.recording_failed ? " (failed)" : "");
        }});
    }});
  }},1000)
  </script>
  </body>
</html>"#
    );

    Html(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_part_framing() {
        let jpeg = [0xFF, 0xD8, 0xAA, 0xFF, 0xD9];
        let part = mjpeg_part(&jpeg);

        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"\xFF\xD9\r\n"));
        let header_len = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len();
        assert_eq!(&part[header_len..header_len + jpeg.len()], &jpeg);
    }
}
