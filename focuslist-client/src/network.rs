use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// Inbound signals delivered to the engine's single event entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    BecameOnline,
    BecameOffline,
    BecameVisible,
    BecameHidden,
    Focused,
    /// Pending mutations were queued while online and should be pushed.
    DrainRequested,
}

/// Tracks connectivity and visibility and turns transitions into
/// [`NetworkSignal`]s.
///
/// The platform glue (or a test) reports raw state through `set_online`,
/// `set_visible` and `notify_focused`; only real transitions are forwarded.
#[derive(Clone)]
pub struct NetworkMonitor {
    online: Arc<AtomicBool>,
    visible: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<NetworkSignal>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> (Self, mpsc::UnboundedReceiver<NetworkSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            online: Arc::new(AtomicBool::new(initially_online)),
            visible: Arc::new(AtomicBool::new(true)),
            tx,
        };
        (monitor, rx)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::Relaxed) == online {
            return;
        }
        if online {
            tracing::info!("Network: online");
            self.send(NetworkSignal::BecameOnline);
        } else {
            tracing::warn!("Network: offline");
            self.send(NetworkSignal::BecameOffline);
        }
    }

    pub fn set_visible(&self, visible: bool) {
        if self.visible.swap(visible, Ordering::Relaxed) == visible {
            return;
        }
        self.send(if visible {
            NetworkSignal::BecameVisible
        } else {
            NetworkSignal::BecameHidden
        });
    }

    pub fn notify_focused(&self) {
        self.send(NetworkSignal::Focused);
    }

    pub fn request_drain(&self) {
        self.send(NetworkSignal::DrainRequested);
    }

    fn send(&self, signal: NetworkSignal) {
        if self.tx.send(signal).is_err() {
            tracing::debug!("No listener for {:?}", signal);
        }
    }
}
