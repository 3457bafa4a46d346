//! Networking for provider scripts.
//!
//! Scripts see a blocking `download` call; underneath, the fetch runs on the
//! async runtime while only the calling job's worker thread parks. The
//! [`Downloader`] trait is the seam that lets tests swap the real HTTP
//! client for canned replies.

mod bridge;
mod client;
mod mock;

pub use bridge::{DownloadReply, DownloadRequest, Downloader, HttpMethod, NetworkBridge};
pub use client::HttpDownloader;
pub use mock::MockDownloader;
