//! Media streaming route
//!
//! Serves stored objects as range-seekable HTTP resources. Ranged requests
//! get `206 Partial Content`; requests without a `Range` header get the
//! whole object with `200 OK`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use uuid::Uuid;

use super::link::{LinkQuery, MediaLink};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::streaming::{
    ByteRange, MediaStreamer, ObjectDescriptor, RangeError, StreamRange, CHUNK_SIZE,
};
use crate::upstream::UpstreamError;

const STREAM_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Stream an object named by a public link
pub async fn stream_media(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<LinkQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let link = MediaLink::parse(&path, query.hash.as_deref())?;

    let connection = state.pool().select();
    let streamer = state.streamers().get_or_create(&connection);

    let descriptor = streamer.resolve(link.message_id).await?;
    if !descriptor.matches_hash(&link.hash) {
        return Err(AppError::HashMismatch(link.message_id));
    }

    let size = descriptor.file_size;
    let (range, ranged) = match headers.get(header::RANGE) {
        Some(value) => {
            let value = value.to_str().map_err(|_| RangeError::Malformed)?;
            (Some(ByteRange::parse(value, size)?), true)
        }
        None => (ByteRange::full(size), false),
    };

    let content_type = content_type(&descriptor);
    let mut builder = Response::builder()
        .status(if ranged {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(header::CONTENT_TYPE, &content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&content_type, descriptor.file_name.as_deref()),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, STREAM_CACHE_CONTROL)
        .header(header::CONTENT_LENGTH, range.map_or(0, |r| r.len()));
    if let (Some(range), true) = (range, ranged) {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.from, range.until, size),
        );
    }

    // Empty objects and HEAD requests never touch the upstream
    let range = match range {
        Some(range) if method != Method::HEAD => range,
        _ => {
            return builder
                .body(Body::empty())
                .map_err(|e| AppError::Internal(e.to_string()));
        }
    };

    tracing::debug!(
        message_id = link.message_id,
        connection = connection.index(),
        from = range.from,
        until = range.until,
        "Streaming object"
    );

    let session = streamer.session(&descriptor).await?;
    let stream = streamer
        .stream(&descriptor, session, StreamRange::new(range, CHUNK_SIZE))
        .inspect_err(on_stream_error(streamer.clone(), link.message_id));

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Mid-stream failures can no longer change the status; log them and drop
/// descriptors whose access credential expired
fn on_stream_error(
    streamer: Arc<MediaStreamer>,
    message_id: i64,
) -> impl Fn(&UpstreamError) + Send + Sync + 'static {
    move |e| {
        if matches!(e, UpstreamError::FileReferenceExpired) {
            streamer.invalidate(message_id);
        }
        tracing::warn!(
            message_id,
            connection = streamer.connection().index(),
            "Stream aborted: {}",
            e
        );
    }
}

/// Stored MIME type, else a guess from the file name
pub(crate) fn content_type(descriptor: &ObjectDescriptor) -> String {
    descriptor
        .mime_type
        .clone()
        .or_else(|| {
            descriptor
                .file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first_raw())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// `inline` for playable media, `attachment` for everything else
fn content_disposition(content_type: &str, file_name: Option<&str>) -> HeaderValue {
    let disposition = if content_type.starts_with("video/") || content_type.starts_with("audio/") {
        "inline"
    } else {
        "attachment"
    };

    let name = match file_name {
        Some(name) => urlencoding::decode(name)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| name.to_string()),
        None => fallback_file_name(),
    };
    let name: String = name
        .chars()
        .filter(|c| !matches!(c, '"' | ';' | '\\') && !c.is_control())
        .collect();
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();

    let value = format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition,
        ascii,
        urlencoding::encode(&name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn fallback_file_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("file_{}", &id[..8])
}
