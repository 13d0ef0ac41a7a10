//! Global handler registration.
//!
//! The hub fires connect/disconnect handlers asynchronously in their own
//! task each time a socket is admitted or removed, so a slow or panicking
//! handler never blocks admission or the read loop. The registry itself
//! carries no internal locking — it lives inside `HubInner`, guarded by the
//! same `RwLock` as the socket table and connection count, per the
//! concurrency model's single-lock-per-Hub rule.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::socket::registry::Socket;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Called asynchronously, once per admitted socket, after registration.
pub type ConnectHandler = Arc<dyn Fn(Arc<Socket>) -> BoxFuture + Send + Sync>;

/// Called asynchronously, once per removed socket, after teardown.
pub type DisconnectHandler = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Hub-wide event handlers, registered once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    pub(crate) connect: Vec<ConnectHandler>,
    pub(crate) disconnect: Vec<DisconnectHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&mut self, handler: ConnectHandler) {
        self.connect.push(handler);
    }

    pub fn on_disconnect(&mut self, handler: DisconnectHandler) {
        self.disconnect.push(handler);
    }
}

/// Fires every given connect handler, each in its own task.
pub fn fire_connect(handlers: &[ConnectHandler], socket: Arc<Socket>) {
    for handler in handlers {
        let handler = handler.clone();
        let socket = socket.clone();
        tokio::spawn(async move { handler(socket).await });
    }
}

/// Fires every given disconnect handler, each in its own task.
pub fn fire_disconnect(handlers: &[DisconnectHandler], socket_id: String) {
    for handler in handlers {
        let handler = handler.clone();
        let socket_id = socket_id.clone();
        tokio::spawn(async move { handler(socket_id).await });
    }
}
