//! Message composer state: local typing flag, reply target and the single
//! in-flight attachment upload.

use parley_shared::types::{ChannelId, MessageId};

use crate::error::ClientError;
use crate::typing::LocalTyping;
use crate::upload::LocalFile;

/// A submit waiting on its attachment upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmit {
    pub generation: u64,
    pub channel_id: ChannelId,
    pub text: String,
    pub reply_to: MessageId,
    pub files: Vec<LocalFile>,
}

/// Accepted submit, as returned by [`Composer::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub generation: u64,
    pub reply_to: MessageId,
    /// The local user was announced as typing and should be stopped.
    pub stop_typing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposerReset {
    /// Generation of the upload that was cancelled, if one was running.
    pub aborted: Option<u64>,
    pub stop_typing: bool,
}

#[derive(Debug, Default)]
pub struct Composer {
    typing: LocalTyping,
    reply_to: MessageId,
    generation: u64,
    uploading: Option<u64>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&mut self, text: &str) -> Option<bool> {
        self.typing.on_input(text)
    }

    /// Returns true if a typing stop should be announced.
    pub fn stop_typing(&mut self) -> bool {
        self.typing.reset()
    }

    pub fn set_reply_to(&mut self, message: MessageId) {
        self.reply_to = message;
    }

    pub fn reply_to(&self) -> MessageId {
        self.reply_to
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn begin(&mut self, text: &str, with_files: bool) -> Result<Submission, ClientError> {
        if self.uploading.is_some() {
            return Err(ClientError::UploadInProgress);
        }
        if text.trim().is_empty() && !with_files {
            return Err(ClientError::EmptyMessage);
        }

        self.generation += 1;
        if with_files {
            self.uploading = Some(self.generation);
        }
        Ok(Submission {
            generation: self.generation,
            reply_to: std::mem::take(&mut self.reply_to),
            stop_typing: self.typing.reset(),
        })
    }

    /// Settle the upload for `generation`. Returns false for a stale one
    /// (the composer was reset since), which must then be ignored.
    pub fn complete(&mut self, generation: u64) -> bool {
        if self.uploading == Some(generation) {
            self.uploading = None;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) -> ComposerReset {
        self.generation += 1;
        self.reply_to = MessageId::NONE;
        ComposerReset {
            aborted: self.uploading.take(),
            stop_typing: self.typing.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        let mut composer = Composer::new();
        assert!(matches!(composer.begin("   ", false), Err(ClientError::EmptyMessage)));
        assert!(composer.begin("", true).is_ok());
    }

    #[test]
    fn test_one_upload_at_a_time() {
        let mut composer = Composer::new();
        let first = composer.begin("pics", true).unwrap();
        assert!(composer.is_uploading());
        assert!(matches!(composer.begin("again", false), Err(ClientError::UploadInProgress)));

        assert!(composer.complete(first.generation));
        assert!(!composer.is_uploading());
        assert!(composer.begin("again", false).is_ok());
    }

    #[test]
    fn test_reset_makes_completion_stale() {
        let mut composer = Composer::new();
        composer.input("typing");
        let submit = composer.begin("pics", true).unwrap();
        assert!(submit.stop_typing);

        let reset = composer.reset();
        assert_eq!(reset.aborted, Some(submit.generation));
        assert!(!reset.stop_typing);
        assert!(!composer.complete(submit.generation));
    }

    #[test]
    fn test_reply_target_is_consumed() {
        let mut composer = Composer::new();
        composer.set_reply_to(MessageId(42));
        let submit = composer.begin("re", false).unwrap();
        assert_eq!(submit.reply_to, MessageId(42));
        assert_eq!(composer.reply_to(), MessageId::NONE);
    }
}
