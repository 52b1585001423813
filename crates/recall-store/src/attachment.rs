//! Attachment URL resolution.

use async_trait::async_trait;

use recall_core::AttachmentReference;

/// Maps a stored attachment reference to a retrievable URL.
///
/// Blob storage lives outside the store; only the reference entity is
/// persisted here.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    /// URL for the attachment, or `None` if the blob is not available.
    async fn attachment_url(&self, reference: &AttachmentReference) -> Option<String>;
}
