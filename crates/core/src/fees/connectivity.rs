use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Online/offline state shared between whoever observes the network and the
/// components that change behaviour with it.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self { state: Arc::new(state) }
    }

    /// Runs a synchronous reachability check once, at construction.
    pub fn detect(is_reachable: impl FnOnce() -> bool) -> Self {
        Self::new(is_reachable())
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.state.send_replace(online);
        if previous != online {
            info!(
                event_name = if online { "connectivity.restored" } else { "connectivity.lost" },
                online,
                "connectivity changed"
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectivityMonitor;

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let monitor = ConnectivityMonitor::detect(|| true);
        let mut events = monitor.subscribe();
        assert!(monitor.is_online());

        monitor.set_online(false);
        events.changed().await.expect("change delivered");
        assert!(!*events.borrow_and_update());
        assert!(!monitor.is_online());
    }
}
