//! In-process client that replays a fixed script of replies.
//!
//! Used by tests and by offline runs (`designcheck assess --offline-response`)
//! to exercise the full pipeline without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::gateway::{Completion, CompletionClient, CompletionRequest};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text as the completion.
    Text(String),
    /// Fail the call with this error.
    Fail(ProviderError),
    /// Never complete (exercises timeouts).
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Replays replies in order, then the fallback reply (if any) forever.
#[derive(Debug)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    calls: AtomicU32,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Answer every call with the same reply.
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let mut replies = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        replies.pop_front().or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.clone());

        match self.next_reply() {
            Some(ScriptedReply::Text(text)) => Ok(Completion {
                text,
                model: "scripted".to_string(),
                usage: None,
            }),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(ProviderError::InvalidResponse {
                message: "no more scripted replies".to_string(),
            }),
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
