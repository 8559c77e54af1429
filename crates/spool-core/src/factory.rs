//! Connection factory collaborator

use async_trait::async_trait;

use crate::destination::Destination;
use crate::error::ConnectError;

/// Creates, checks and destroys physical connections for a pool
///
/// The pool never looks inside a connection; everything protocol specific
/// (TLS, handshakes, DNS) happens here or in the layer using a borrowed
/// handle.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The physical connection type handed out by the pool
    type Connection: Send + Sync + 'static;

    /// Open a new connection to the destination
    async fn create(
        &self,
        destination: &Destination,
    ) -> std::result::Result<Self::Connection, ConnectError>;

    /// Tear a connection down
    ///
    /// Called without suspending, from release paths and `Drop`. The default
    /// implementation just drops it.
    fn destroy(&self, _destination: &Destination, connection: Self::Connection) {
        drop(connection);
    }

    /// Check that an idle connection is still usable
    ///
    /// Default implementation always returns true.
    async fn health_check(&self, _connection: &Self::Connection) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        type Connection = usize;

        async fn create(&self, _destination: &Destination) -> Result<usize, ConnectError> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_default_health_check_accepts_connection() {
        let factory = CountingFactory {
            created: AtomicUsize::new(0),
        };
        let dest = Destination::new("local");

        let conn = factory.create(&dest).await.expect("create");
        assert_eq!(conn, 0);
        assert!(factory.health_check(&conn).await);
        factory.destroy(&dest, conn);
    }
}
