//! Server-Sent Events encoding of relay frames

use crate::relay::FrameStream;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONNECTION,
};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;

/// Stream relay frames as `data: <payload>` events
pub fn relay_sse(frames: FrameStream) -> impl IntoResponse {
    let events = frames.map(|frame| Ok::<_, Infallible>(frame_to_event(&frame.data())));

    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    );

    (
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
        ],
        sse,
    )
}

fn frame_to_event(data: &str) -> Event {
    // SSE fields cannot carry carriage returns
    if data.contains('\r') {
        Event::default().data(data.replace('\r', ""))
    } else {
        Event::default().data(data)
    }
}
