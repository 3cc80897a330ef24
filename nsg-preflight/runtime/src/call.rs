use std::{future::Future, time::Duration};

/// Bounds every control API call with a deadline and an optional cancellation token.
#[derive(Clone, Debug)]
pub struct CallOptions {
    pub timeout: Duration,
    pub cancel: Option<drain::Watch>,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

// === impl CallOptions ===

impl CallOptions {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: drain::Watch) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Drives `call` to completion unless it outlives the deadline or the token is signaled first.
    pub async fn call<T, F>(&self, call: F) -> Result<T, CallError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let call = tokio::time::timeout(self.timeout, call);
        let res = match &self.cancel {
            None => call.await,
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.clone().signaled() => return Err(CallError::Cancelled),
                res = call => res,
            },
        };
        match res {
            Ok(res) => res.map_err(CallError::Api),
            Err(_) => Err(CallError::Timeout(self.timeout)),
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

// === impl CallError ===

impl CallError {
    /// True if the call did not complete, as opposed to being rejected by the API.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout(_))
    }
}
