//! Content-addressed attachment upload.
//!
//! Files are hashed locally with BLAKE3, the attachment host is asked which
//! hashes it already stores, and only the unknown content is transferred.
//! The host answers the upload with an opaque token that the chat message
//! then carries.

use std::collections::HashSet;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use parley_shared::constants::MAX_ATTACHMENT_SIZE;
use parley_shared::protocol::Attachment;

use crate::error::UploadError;

/// A file queued in the composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub async fn read(path: &Path) -> Result<Self, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let content = tokio::fs::read(path).await?;
        Ok(Self { name, content })
    }

    /// Lowercase hex BLAKE3 digest of the content.
    pub fn content_hash(&self) -> String {
        hex::encode(blake3::hash(&self.content).as_bytes())
    }
}

struct HashedFile {
    file: LocalFile,
    hash: String,
}

fn hash_files(files: Vec<LocalFile>) -> Result<Vec<HashedFile>, UploadError> {
    files
        .into_iter()
        .map(|file| {
            if file.content.len() > MAX_ATTACHMENT_SIZE {
                return Err(UploadError::TooLarge {
                    name: file.name,
                    size: file.content.len(),
                    max: MAX_ATTACHMENT_SIZE,
                });
            }
            let hash = file.content_hash();
            Ok(HashedFile { file, hash })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AttachmentUploader {
    http: reqwest::Client,
    base_url: String,
}

impl AttachmentUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the host which of `hashes` it already stores.
    pub async fn known_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, UploadError> {
        let response = self
            .http
            .post(format!("{}/attachments/exists", self.base_url))
            .json(hashes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UploadError::Status {
                endpoint: "attachments/exists",
                status: response.status().as_u16(),
            });
        }
        let known: Option<Vec<String>> = response.json().await?;
        Ok(known.unwrap_or_default().into_iter().collect())
    }

    /// Upload a batch and return the attachment token for it.
    pub async fn upload(&self, files: Vec<LocalFile>) -> Result<String, UploadError> {
        let files = hash_files(files)?;
        let hashes: Vec<String> = files.iter().map(|f| f.hash.clone()).collect();
        let known = self.known_hashes(&hashes).await?;

        let mut form = Form::new();
        let mut reused = 0usize;
        for HashedFile { file, hash } in files {
            if known.contains(&hash) {
                let existing = serde_json::to_string(&Attachment {
                    hash,
                    name: file.name,
                })?;
                form = form.text("existing", existing);
                reused += 1;
            } else {
                debug!(name = %file.name, hash = %hash, size = file.content.len(), "Uploading attachment");
                form = form.part("file", Part::bytes(file.content).file_name(file.name));
            }
        }

        let response = self
            .http
            .post(format!("{}/attachments/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UploadError::Status {
                endpoint: "attachments/upload",
                status: response.status().as_u16(),
            });
        }

        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(UploadError::EmptyToken);
        }

        info!(files = hashes.len(), reused, "Attachment batch uploaded");
        Ok(token)
    }
}
