//! Request-scoped cancellation context
//!
//! Every state operation takes a `Context`. Dropping the owning request or
//! cancelling the token makes in-flight operations return `Cancelled`.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, VitrineError};

#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing token
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A fresh context that is not cancelled together with `self`.
    ///
    /// Used for work that must outlive the triggering request, such as provisioning.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A child context cancelled whenever `self` is
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `fut` to completion unless the context is cancelled first
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(VitrineError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(VitrineError::Cancelled),
            result = fut => result,
        }
    }
}
