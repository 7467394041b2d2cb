//! WebSocket connection handlers
//!
//! A [`Handler`] receives the application-level events of every connection
//! on a server. All callbacks run on the event loop, one at a time, so a
//! handler may keep plain mutable state without locking. Long-running work
//! belongs in a spawned task that reports back through a
//! [`ServerHandle`](crate::ServerHandle).

use crate::dispatch::Session;
use async_trait::async_trait;
use bytes::Bytes;
use sockline_core::Result;

/// Trait for handling WebSocket connections
///
/// Every method has a default that does nothing. An error returned from a
/// callback is logged; the connection stays open.
#[async_trait]
pub trait Handler: Send + 'static {
    /// The upgrade response was written and the connection is open
    async fn on_connect(&mut self, _session: &mut Session<'_>) -> Result<()> {
        Ok(())
    }

    /// A complete text message arrived
    async fn on_text(&mut self, _session: &mut Session<'_>, _text: String) -> Result<()> {
        Ok(())
    }

    /// A complete binary message arrived
    async fn on_binary(&mut self, _session: &mut Session<'_>, _data: Bytes) -> Result<()> {
        Ok(())
    }

    /// A pong arrived
    async fn on_pong(&mut self, _session: &mut Session<'_>, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    /// The peer sent a close frame
    ///
    /// The connection is already closing: sends to it are dropped, but the
    /// rest of the server can still be reached through the session. Not
    /// called when a connection is lost or dropped for a protocol error.
    async fn on_close(
        &mut self,
        _session: &mut Session<'_>,
        _code: Option<u16>,
        _reason: String,
    ) -> Result<()> {
        Ok(())
    }
}

/// Boxed handler type
pub type BoxedHandler = Box<dyn Handler>;

#[async_trait]
impl Handler for BoxedHandler {
    async fn on_connect(&mut self, session: &mut Session<'_>) -> Result<()> {
        (**self).on_connect(session).await
    }

    async fn on_text(&mut self, session: &mut Session<'_>, text: String) -> Result<()> {
        (**self).on_text(session, text).await
    }

    async fn on_binary(&mut self, session: &mut Session<'_>, data: Bytes) -> Result<()> {
        (**self).on_binary(session, data).await
    }

    async fn on_pong(&mut self, session: &mut Session<'_>, payload: Bytes) -> Result<()> {
        (**self).on_pong(session, payload).await
    }

    async fn on_close(
        &mut self,
        session: &mut Session<'_>,
        code: Option<u16>,
        reason: String,
    ) -> Result<()> {
        (**self).on_close(session, code, reason).await
    }
}

/// Echo handler implementation
///
/// Answers each text message with `Your message to the server was: '<text>'`
/// and echoes binary messages back unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }

    /// Reply sent for a text message
    pub fn reply_for(text: &str) -> String {
        format!("Your message to the server was: '{}'", text)
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn on_text(&mut self, session: &mut Session<'_>, text: String) -> Result<()> {
        session.send_text(&Self::reply_for(&text)).await
    }

    async fn on_binary(&mut self, session: &mut Session<'_>, data: Bytes) -> Result<()> {
        session.send_binary(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_reply() {
        assert_eq!(
            EchoHandler::reply_for("hello"),
            "Your message to the server was: 'hello'"
        );
        assert_eq!(
            EchoHandler::reply_for(""),
            "Your message to the server was: ''"
        );
    }
}
