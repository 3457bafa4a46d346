//! The real HTTP downloader.

use futures::future::BoxFuture;

use super::bridge::{DownloadReply, DownloadRequest, Downloader, HttpMethod};

/// Default user agent sent with every request.
const DEFAULT_USER_AGENT: &str = concat!("timetable-engine/", env!("CARGO_PKG_VERSION"));

/// Downloader backed by a shared [`reqwest::Client`].
///
/// One instance serves every job; reqwest multiplexes connections
/// internally. Transport failures and non-2xx statuses both come back as
/// replies with `ok == false` so scripts can implement their own retry or
/// fallback logic.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    http: reqwest::Client,
}

impl HttpDownloader {
    /// Create a downloader with the default user agent.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    /// Create a downloader with a custom user agent.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http })
    }

    async fn run(http: reqwest::Client, request: DownloadRequest) -> DownloadReply {
        let url = request.url.clone();

        let mut builder = match request.method {
            HttpMethod::Get => http.get(&request.url),
            HttpMethod::Post => http.post(&request.url),
        };

        if let Some(content_type) = request.content_type_header() {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return DownloadReply::failure(url, 0, e.to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return DownloadReply::failure(
                    url,
                    status.as_u16(),
                    format!("failed to read body: {e}"),
                );
            }
        };

        if status.is_success() {
            DownloadReply::success(url, status.as_u16(), body)
        } else {
            DownloadReply {
                ok: false,
                status: status.as_u16(),
                body,
                error: Some(format!("HTTP status {status}")),
                url,
            }
        }
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, request: DownloadRequest) -> BoxFuture<'static, DownloadReply> {
        let http = self.http.clone();
        Box::pin(Self::run(http, request))
    }
}
