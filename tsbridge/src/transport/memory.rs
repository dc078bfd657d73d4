//! In-memory transport for testing and development.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{Command, Transport};
use crate::error::{Result, TsdbError};
use crate::query::RawQuery;

#[derive(Debug, Default)]
struct State {
    queries: Vec<RawQuery>,
    commands: Vec<Command>,
    responses: VecDeque<std::result::Result<String, String>>,
    failure: Option<String>,
}

/// Records every query and command and replays canned responses.
///
/// Queued responses are returned in order; once the queue is empty queries
/// return an empty body. [`MemoryTransport::fail_with`] makes every call fail
/// until [`MemoryTransport::recover`] is called.
///
/// # Example
///
/// ```rust
/// use tsbridge::query::{InfluxRawQuery, RawQuery};
/// use tsbridge::transport::{MemoryTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() {
/// let transport = MemoryTransport::new("influxdb");
/// transport.push_response("_result").await;
///
/// let query = RawQuery::from(InfluxRawQuery::flux("from(bucket: \"b\")"));
/// assert_eq!(transport.execute(&query).await.unwrap(), "_result");
/// assert_eq!(transport.queries().await.len(), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    backend: String,
    state: Arc<RwLock<State>>,
}

impl MemoryTransport {
    /// Creates a transport reporting errors as coming from `backend`.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Queues a response body for the next query.
    pub async fn push_response(&self, body: impl Into<String>) {
        self.state.write().await.responses.push_back(Ok(body.into()));
    }

    /// Queues a failure for the next query.
    pub async fn push_error(&self, message: impl Into<String>) {
        self.state
            .write()
            .await
            .responses
            .push_back(Err(message.into()));
    }

    /// Fails every following call with `message`.
    pub async fn fail_with(&self, message: impl Into<String>) {
        self.state.write().await.failure = Some(message.into());
    }

    /// Clears a failure set with [`MemoryTransport::fail_with`].
    pub async fn recover(&self) {
        self.state.write().await.failure = None;
    }

    /// Queries executed so far, oldest first.
    pub async fn queries(&self) -> Vec<RawQuery> {
        self.state.read().await.queries.clone()
    }

    /// Commands sent so far, oldest first.
    pub async fn commands(&self) -> Vec<Command> {
        self.state.read().await.commands.clone()
    }

    /// Forgets recorded traffic and queued responses.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.queries.clear();
        state.commands.clear();
        state.responses.clear();
    }

    fn error(&self, message: &str) -> TsdbError {
        TsdbError::transport(self.backend.clone(), message)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    #[instrument(skip(self, query), fields(backend = %self.backend, transport = "memory"))]
    async fn execute(&self, query: &RawQuery) -> Result<String> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.failure {
            return Err(self.error(message));
        }
        state.queries.push(query.clone());
        debug!(recorded = state.queries.len(), "recorded query");
        match state.responses.pop_front() {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(self.error(&message)),
            None => Ok(String::new()),
        }
    }

    #[instrument(skip(self, command), fields(backend = %self.backend, kind = command.kind()))]
    async fn send(&self, command: &Command) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.failure {
            return Err(self.error(message));
        }
        state.commands.push(command.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::GraphiteRawQuery;

    #[tokio::test]
    async fn test_records_and_replays() {
        let transport = MemoryTransport::new("graphite");
        transport.push_response("[]").await;
        transport.push_error("timeout").await;

        let query = RawQuery::from(GraphiteRawQuery::new("cpu.*"));
        assert_eq!(transport.execute(&query).await.unwrap(), "[]");
        let err = transport.execute(&query).await.unwrap_err();
        assert_eq!(err.to_string(), "Transport error (graphite): timeout");
        assert_eq!(transport.execute(&query).await.unwrap(), "");
        assert_eq!(transport.queries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure() {
        let transport = MemoryTransport::new("influxdb");
        transport.fail_with("connection refused").await;
        assert!(transport
            .send(&Command::Write("cpu value=1".into()))
            .await
            .is_err());

        transport.recover().await;
        transport
            .send(&Command::Write("cpu value=1".into()))
            .await
            .unwrap();
        assert_eq!(
            transport.commands().await,
            vec![Command::Write("cpu value=1".into())]
        );
    }
}
