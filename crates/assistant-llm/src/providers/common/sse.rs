//! SSE response -> [`FragmentStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Response;
use tokio_util::sync::CancellationToken;

use super::openai_compat::{parse_openai_compat_sse_data, SseData};
use crate::error::LLMError;
use crate::provider::FragmentStream;

/// Turn a streaming chat completions response into text fragments.
///
/// Ends at `[DONE]`, at end of body, or as soon as `cancel` fires. After a
/// cancellation no further fragment is yielded, even one already received.
pub fn fragment_stream_from_sse(response: Response, cancel: CancellationToken) -> FragmentStream {
    let stream = async_stream::stream! {
        let mut events = Box::pin(response.bytes_stream().eventsource());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = events.next() => next,
            };

            let Some(event) = next else { break };
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    yield Err(LLMError::Stream(err.to_string()));
                    break;
                }
            };

            match parse_openai_compat_sse_data(&event.data) {
                Ok(SseData::Fragment(text)) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    yield Ok(text);
                }
                Ok(SseData::Skip) => continue,
                Ok(SseData::Done) => break,
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}
