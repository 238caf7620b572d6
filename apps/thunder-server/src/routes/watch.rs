//! Playback page
//!
//! A minimal HTML page around the stream link: an inline player for video
//! and audio, a plain download link for everything else.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Response},
};
use html_escape::{encode_double_quoted_attribute, encode_text};

use super::link::{LinkQuery, MediaLink};
use super::stream::content_type;
use crate::error::{AppError, Result};
use crate::format::human_bytes;
use crate::state::AppState;
use crate::streaming::ObjectDescriptor;

pub async fn watch_page(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<LinkQuery>,
) -> Result<Response> {
    let link = MediaLink::parse(&path, query.hash.as_deref())?;

    let connection = state.pool().select();
    let streamer = state.streamers().get_or_create(&connection);
    let descriptor = streamer.resolve(link.message_id).await?;
    if !descriptor.matches_hash(&link.hash) {
        return Err(AppError::HashMismatch(link.message_id));
    }

    let src = link.compact_path(descriptor.file_name.as_deref());
    Ok((
        [(header::CACHE_CONTROL, "no-cache, must-revalidate")],
        Html(render(&descriptor, &src)),
    )
        .into_response())
}

fn render(descriptor: &ObjectDescriptor, src: &str) -> String {
    let name = descriptor.file_name.as_deref().unwrap_or("Untitled");
    let mime = content_type(descriptor);
    let title = encode_text(name);
    let src = encode_double_quoted_attribute(src);

    let player = match mime.split('/').next() {
        Some(tag @ ("video" | "audio")) => format!(
            "<{tag} src=\"{src}\" type=\"{mime}\" controls preload=\"metadata\"></{tag}>",
            tag = tag,
            src = src,
            mime = encode_double_quoted_attribute(&mime),
        ),
        _ => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<h1>{title}</h1>
{player}
<p><a href="{src}" download>Download</a> ({size})</p>
</body>
</html>
"#,
        title = title,
        player = player,
        src = src,
        size = human_bytes(descriptor.file_size),
    )
}
