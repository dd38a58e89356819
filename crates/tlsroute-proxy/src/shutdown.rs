//! Idempotent teardown of a proxy session

use crate::observer::{ProxyEvent, ProxyObserver};
use crate::registry::ConnectionRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tlsroute_proto::Context;
use tokio::net::TcpListener;
use tracing::debug;

/// Owns the session context, the listener handle and the connection registry.
pub struct ShutdownCoordinator {
    ctx: Context,
    stopped: AtomicBool,
    listener: Mutex<Option<Arc<TcpListener>>>,
    registry: Arc<ConnectionRegistry>,
    observer: Arc<dyn ProxyObserver>,
}

impl ShutdownCoordinator {
    /// `ctx` should be a child of the caller's context so that stopping the
    /// session never cancels the caller.
    pub fn new(ctx: Context, observer: Arc<dyn ProxyObserver>) -> Self {
        Self {
            ctx,
            stopped: AtomicBool::new(false),
            listener: Mutex::new(None),
            registry: Arc::new(ConnectionRegistry::new()),
            observer,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn set_listener(&self, listener: Arc<TcpListener>) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// The listener, until `stop_all` releases it
    pub fn listener(&self) -> Option<Arc<TcpListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting and force-close every active connection.
    ///
    /// Returns `true` for the call that performed the shutdown and `false`
    /// for every later call.
    pub fn stop_all(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Session already stopped");
            return false;
        }

        // Wakes the accept loop, which drops its handle on the listener
        self.ctx.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(listener);

        let closed_connections = self.registry.close_all();
        self.observer
            .on_event(&ProxyEvent::Stopped { closed_connections });
        true
    }
}
