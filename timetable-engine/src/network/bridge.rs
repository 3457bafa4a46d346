//! The bridge between synchronous script code and asynchronous I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

/// Default per-request timeout when a script does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method for a script download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// One download a script asks for.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub method: HttpMethod,
    /// Request body, for POST.
    pub body: Option<String>,
    /// Content type of the body, for POST.
    pub content_type: Option<String>,
    /// Charset appended to the content type, for POST.
    pub charset: Option<String>,
    /// Extra headers, e.g. session keys the script obtained earlier.
    pub headers: Vec<(String, String)>,
    /// How long to wait before giving up on this request.
    pub timeout: Duration,
}

impl DownloadRequest {
    /// A GET request for a URL with the default timeout.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            body: None,
            content_type: None,
            charset: None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A POST request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    /// Set the body content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the body charset.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The content-type header value, with charset appended when set.
    pub fn content_type_header(&self) -> Option<String> {
        let base = self.content_type.as_deref()?;
        Some(match &self.charset {
            Some(charset) => format!("{base}; charset={charset}"),
            None => base.to_string(),
        })
    }
}

/// What came back from a download.
///
/// Failures are data, not exceptions: the script inspects `ok` and decides
/// itself whether to retry, fall back to another URL, or give up.
#[derive(Debug, Clone)]
pub struct DownloadReply {
    /// Whether the request succeeded with a 2xx status.
    pub ok: bool,
    /// HTTP status code, or 0 when no response arrived.
    pub status: u16,
    /// Response body, empty on transport errors.
    pub body: String,
    /// Error description when `ok` is false.
    pub error: Option<String>,
    /// The URL the request was sent to.
    pub url: String,
}

impl DownloadReply {
    /// A successful reply.
    pub fn success(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            ok: true,
            status,
            body: body.into(),
            error: None,
            url: url.into(),
        }
    }

    /// A failed reply with an error description.
    pub fn failure(url: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            body: String::new(),
            error: Some(error.into()),
            url: url.into(),
        }
    }
}

/// Performs downloads on the async runtime.
///
/// The seam between the bridge and real I/O; implemented by
/// [`HttpDownloader`](super::HttpDownloader) in production and
/// [`MockDownloader`](super::MockDownloader) in tests.
pub trait Downloader: Send + Sync {
    /// Fetch a request, resolving to a reply. Never panics; every failure
    /// becomes a reply with `ok == false`.
    fn fetch(&self, request: DownloadRequest) -> BoxFuture<'static, DownloadReply>;
}

/// Per-job handle bridging script downloads onto the runtime.
///
/// `download` must be called from the job's blocking worker thread, never
/// from an async context: it parks the calling thread until the reply
/// arrives while the fetch itself runs on the runtime's I/O threads. Other
/// jobs' worker threads are unaffected, and concurrent downloads from
/// different jobs resume independently.
#[derive(Clone)]
pub struct NetworkBridge {
    downloader: Arc<dyn Downloader>,
    handle: Handle,
    cancelled: Arc<AtomicBool>,
    last_url: Arc<Mutex<Option<String>>>,
    default_timeout: Duration,
}

impl NetworkBridge {
    /// Create a bridge for one job.
    pub fn new(
        downloader: Arc<dyn Downloader>,
        handle: Handle,
        cancelled: Arc<AtomicBool>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            downloader,
            handle,
            cancelled,
            last_url: Arc::new(Mutex::new(None)),
            default_timeout,
        }
    }

    /// Run a download, blocking the calling thread until the reply arrives.
    pub fn download(&self, mut request: DownloadRequest) -> DownloadReply {
        if request.timeout.is_zero() {
            request.timeout = self.default_timeout;
        }
        let url = request.url.clone();
        let timeout = request.timeout;

        {
            let mut last = self.last_url.lock().expect("last_url lock poisoned");
            *last = Some(url.clone());
        }
        debug!(%url, "download suspending job thread");

        let (tx, rx) = oneshot::channel();
        let downloader = Arc::clone(&self.downloader);
        self.handle.spawn(async move {
            let reply = match tokio::time::timeout(timeout, downloader.fetch(request)).await {
                Ok(reply) => reply,
                Err(_elapsed) => {
                    DownloadReply::failure(url, 0, format!("request timed out after {timeout:?}"))
                }
            };
            // The receiver is gone only if the job thread died; nothing to do.
            let _ = tx.send(reply);
        });

        match rx.blocking_recv() {
            Ok(reply) => reply,
            Err(_) => DownloadReply::failure(
                self.last_url().unwrap_or_default(),
                0,
                "download task dropped before replying",
            ),
        }
    }

    /// Whether this job has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// The most recently attempted URL, for diagnostics on failed jobs.
    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().expect("last_url lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_header_appends_charset() {
        let req = DownloadRequest::post("http://example.invalid", "a=b")
            .with_content_type("application/x-www-form-urlencoded")
            .with_charset("utf-8");
        assert_eq!(
            req.content_type_header().unwrap(),
            "application/x-www-form-urlencoded; charset=utf-8"
        );

        let no_charset =
            DownloadRequest::post("http://example.invalid", "a=b").with_content_type("text/xml");
        assert_eq!(no_charset.content_type_header().unwrap(), "text/xml");

        let no_type = DownloadRequest::get("http://example.invalid");
        assert!(no_type.content_type_header().is_none());
    }

    #[test]
    fn reply_constructors() {
        let ok = DownloadReply::success("http://x", 200, "body");
        assert!(ok.ok);
        assert_eq!(ok.status, 200);
        assert!(ok.error.is_none());

        let failed = DownloadReply::failure("http://x", 503, "service unavailable");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("service unavailable"));
    }
}
