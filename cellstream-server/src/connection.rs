//! Per-transport connection state.

use cellstream_core::protocol::{Call, RemoteFault, Reply};
use std::sync::Arc;
use tracing::debug;

use crate::server::DataServer;
use crate::session::{CallbackSink, SessionId};

/// One transport connection to the server.
///
/// A connection has no session until the client calls Register, and loses
/// it again on Unregister. Dropping the connection removes any session it
/// still holds, as a transport close.
pub struct ServerConnection {
    server: Arc<DataServer>,
    sink: Arc<dyn CallbackSink>,
    session: Option<SessionId>,
}

impl ServerConnection {
    /// Creates a connection whose callbacks go to `sink`.
    #[must_use]
    pub fn new(server: Arc<DataServer>, sink: Arc<dyn CallbackSink>) -> Self {
        Self {
            server,
            sink,
            session: None,
        }
    }

    /// Returns the session, if registered.
    #[must_use]
    pub const fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Serves one call.
    pub async fn dispatch(&mut self, call: Call) -> Result<Reply, RemoteFault> {
        match call {
            Call::Register => {
                if let Some(session) = self.session {
                    if self.server.has_session(session) {
                        debug!(%session, "Register on registered connection ignored");
                        return Ok(Reply::Unit);
                    }
                }
                self.session = Some(self.server.register(Arc::clone(&self.sink)));
                Ok(Reply::Unit)
            }
            Call::Unregister => {
                if let Some(session) = self.session.take() {
                    self.server.unregister(session);
                }
                Ok(Reply::Unit)
            }
            call => match self.session {
                Some(session) => self.server.handle_call(session, call).await,
                None => Err(RemoteFault::NotRegistered),
            },
        }
    }

    /// Removes the session, if any, as a transport close.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            self.server.disconnect(session);
        }
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributionConfig;
    use crate::demo::DemoProvider;
    use crate::session::ChannelSink;
    use cellstream_core::key::SubscriptionKey;

    fn connection() -> (Arc<DataServer>, ServerConnection) {
        let provider = Arc::new(DemoProvider::default());
        let server = Arc::new(DataServer::new(provider, DistributionConfig::default()));
        let (sink, _rx) = ChannelSink::channel(8);
        let conn = ServerConnection::new(Arc::clone(&server), Arc::new(sink));
        (server, conn)
    }

    #[tokio::test]
    async fn test_calls_require_register() {
        let (_server, mut conn) = connection();
        let key = SubscriptionKey::position(1, "Price");
        assert_eq!(
            conn.dispatch(Call::subscribe(&key)).await,
            Err(RemoteFault::NotRegistered)
        );
        assert_eq!(
            conn.dispatch(Call::GetServiceStatus).await,
            Err(RemoteFault::NotRegistered)
        );
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (server, mut conn) = connection();
        conn.dispatch(Call::Register).await.unwrap();
        let first = conn.session();
        conn.dispatch(Call::Register).await.unwrap();

        assert_eq!(conn.session(), first);
        assert_eq!(server.session_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_then_drop() {
        let (server, mut conn) = connection();
        conn.dispatch(Call::Register).await.unwrap();
        conn.dispatch(Call::Unregister).await.unwrap();
        assert_eq!(server.session_count(), 0);
        assert_eq!(conn.session(), None);

        conn.dispatch(Call::Register).await.unwrap();
        assert_eq!(server.session_count(), 1);
        drop(conn);
        assert_eq!(server.session_count(), 0);
    }
}
