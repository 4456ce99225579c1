use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use assistant_llm::{FragmentStream, LLMError};

pub struct RelayOutput {
    pub content: String,
    pub fragments: usize,
    pub cancelled: bool,
    pub error: Option<LLMError>,
}

/// Accumulate `stream` and report progress through `notify`.
///
/// `notify` receives the full content so far, at most once per `interval`.
/// A fragment arriving inside the window schedules a flush at the end of it;
/// whatever is still unreported when the stream finishes or fails is flushed
/// right away. Once `cancel` fires nothing more is reported, though the
/// returned content still holds every fragment received.
pub async fn relay_fragments<F>(
    mut stream: FragmentStream,
    interval: Duration,
    cancel: &CancellationToken,
    mut notify: F,
) -> RelayOutput
where
    F: FnMut(&str),
{
    let mut content = String::new();
    let mut fragments = 0usize;
    let mut cancelled = false;
    let mut error = None;

    let mut last_notified: Option<Instant> = None;
    let mut pending = false;
    let flush = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(flush);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            _ = &mut flush, if pending => {
                notify(&content);
                last_notified = Some(Instant::now());
                pending = false;
            }
            next = stream.next() => match next {
                None => break,
                Some(Ok(fragment)) => {
                    content.push_str(&fragment);
                    fragments += 1;

                    let now = Instant::now();
                    match last_notified {
                        Some(at) if now.duration_since(at) < interval => {
                            if !pending {
                                pending = true;
                                flush.as_mut().reset(at + interval);
                            }
                        }
                        _ => {
                            notify(&content);
                            last_notified = Some(now);
                            pending = false;
                        }
                    }
                }
                Some(Err(err)) => {
                    error = Some(err);
                    break;
                }
            }
        }
    }

    if pending && !cancelled {
        notify(&content);
    }

    RelayOutput {
        content,
        fragments,
        cancelled,
        error,
    }
}
