//! Fail-fast group of pump tasks.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::StreamError;

/// A connection runs exactly one inbound and one outbound pump.
pub const PUMP_LIMIT: usize = 2;

/// Runs pumps concurrently; the first failure cancels the rest.
///
/// Members observe [`PumpGroup::token`]. It is a child of the token the
/// group was created from, so cancelling the parent stops every member
/// while a failing member only stops its own group.
pub struct PumpGroup {
    tasks: JoinSet<Result<(), StreamError>>,
    token: CancellationToken,
}

impl PumpGroup {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token: parent.child_token(),
        }
    }

    /// Token every member must observe.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Starts a member. Fails once [`PUMP_LIMIT`] members are running.
    pub fn spawn<F>(&mut self, pump: F) -> Result<(), StreamError>
    where
        F: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        if self.tasks.len() >= PUMP_LIMIT {
            return Err(StreamError::Transport("pump group is full".to_string()));
        }
        self.tasks.spawn(pump);
        Ok(())
    }

    /// Cancels every member.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for every member and returns the first failure, if any.
    pub async fn wait(mut self) -> Result<(), StreamError> {
        let mut outcome = Ok(());

        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(StreamError::Transport(format!("pump task failed: {e}")))
            });

            if let Err(e) = result {
                if outcome.is_ok() {
                    self.token.cancel();
                    outcome = Err(e);
                }
            }
        }

        outcome
    }
}
