//! Mock downloader for testing without network access.
//!
//! Serves canned replies keyed by URL, optionally after an artificial
//! delay, mimicking the real downloader's interface. Useful for exercising
//! the suspension path: a delayed reply parks the job thread exactly like a
//! slow remote server would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use super::bridge::{DownloadReply, DownloadRequest, Downloader};

#[derive(Debug, Clone)]
struct MockEntry {
    body: Result<String, String>,
    delay: Duration,
}

/// Downloader serving pre-registered replies.
#[derive(Debug, Clone, Default)]
pub struct MockDownloader {
    replies: Arc<Mutex<HashMap<String, MockEntry>>>,
    requests: Arc<AtomicUsize>,
}

impl MockDownloader {
    /// Create an empty mock with no registered replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a successful reply for a URL.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
        self.insert_with_delay(url, body, Duration::ZERO);
    }

    /// Register a successful reply served after a delay.
    pub fn insert_with_delay(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
        delay: Duration,
    ) {
        let mut replies = self.replies.lock().expect("mock lock poisoned");
        replies.insert(
            url.into(),
            MockEntry {
                body: Ok(body.into()),
                delay,
            },
        );
    }

    /// Register a failing reply for a URL.
    pub fn insert_error(&self, url: impl Into<String>, error: impl Into<String>) {
        let mut replies = self.replies.lock().expect("mock lock poisoned");
        replies.insert(
            url.into(),
            MockEntry {
                body: Err(error.into()),
                delay: Duration::ZERO,
            },
        );
    }

    /// Number of fetches issued against this mock.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Downloader for MockDownloader {
    fn fetch(&self, request: DownloadRequest) -> BoxFuture<'static, DownloadReply> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let entry = {
            let replies = self.replies.lock().expect("mock lock poisoned");
            replies.get(&request.url).cloned()
        };
        let url = request.url;

        Box::pin(async move {
            match entry {
                Some(entry) => {
                    if !entry.delay.is_zero() {
                        tokio::time::sleep(entry.delay).await;
                    }
                    match entry.body {
                        Ok(body) => DownloadReply::success(url, 200, body),
                        Err(error) => DownloadReply::failure(url, 0, error),
                    }
                }
                None => DownloadReply::failure(url, 404, "no mock reply registered"),
            }
        })
    }
}
