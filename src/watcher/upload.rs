//! Hand-off point to the upload subsystem.

use std::path::PathBuf;

use tokio::sync::mpsc;

use super::target::TaskSettings;

/// A finished arrival, ready for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Final location of the file (after any move).
    pub path: PathBuf,
    /// Task settings as they were when the event was delivered.
    pub task: TaskSettings,
}

/// Receives finished arrivals.
///
/// Called from watcher threads. Implementations must not block for long;
/// failures are the uploader's own concern. Reading the registry's views is
/// fine from here, but calling its mutating operations is not: removing or
/// disabling a watcher waits for this very call to return.
pub trait Uploader: Send + Sync {
    fn upload(&self, request: UploadRequest);
}

impl<F> Uploader for F
where
    F: Fn(UploadRequest) + Send + Sync,
{
    fn upload(&self, request: UploadRequest) {
        self(request)
    }
}

/// Forwards requests to an async consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelUploader {
    tx: mpsc::UnboundedSender<UploadRequest>,
}

impl ChannelUploader {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Uploader for ChannelUploader {
    fn upload(&self, request: UploadRequest) {
        if let Err(e) = self.tx.send(request) {
            tracing::warn!(
                "[upload] receiver closed, dropping {}",
                e.0.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ConflictPolicy;

    fn request(name: &str) -> UploadRequest {
        UploadRequest {
            path: PathBuf::from(name),
            task: TaskSettings {
                name: "t".to_string(),
                watch_enabled: true,
                destination_folder: PathBuf::from("/dest"),
                subfolder_pattern: None,
                conflict_policy: ConflictPolicy::Suffix,
            },
        }
    }

    #[tokio::test]
    async fn test_channel_uploader_forwards_in_order() {
        let (uploader, mut rx) = ChannelUploader::new();
        uploader.upload(request("a.png"));
        uploader.upload(request("b.png"));

        assert_eq!(rx.recv().await.unwrap().path, PathBuf::from("a.png"));
        assert_eq!(rx.recv().await.unwrap().path, PathBuf::from("b.png"));
    }

    #[test]
    fn test_closed_receiver_does_not_panic() {
        let (uploader, rx) = ChannelUploader::new();
        drop(rx);
        uploader.upload(request("late.png"));
    }
}
