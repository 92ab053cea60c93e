use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::warn;

use crate::remote::Remote;
use crate::transport::{Discovery, Transport};

type SharedRemote<T> = Arc<Mutex<Remote<T>>>;

/// Manages sessions for every remote a [`Discovery`] source reports.
///
/// A background thread scans periodically, opens a session for each new
/// identifier and re-attaches known identifiers that lost their transport.
/// Newly connected remotes are handed out through a channel; polling the
/// sessions stays with the caller.
pub struct RemoteManager<D: Discovery> {
    seen_devices: HashMap<String, SharedRemote<D::Transport>>,
    scan_interval: Duration,
    new_devices_receiver: crossbeam_channel::Receiver<SharedRemote<D::Transport>>,
}

impl<D> RemoteManager<D>
where
    D: Discovery + Send + 'static,
    D::Transport: Send,
{
    /// Creates a manager scanning every 500ms.
    pub fn new(discovery: D) -> Arc<Mutex<Self>> {
        Self::with_interval(discovery, Duration::from_millis(500))
    }

    /// Creates a manager with a custom scan interval.
    pub fn with_interval(discovery: D, scan_interval: Duration) -> Arc<Mutex<Self>> {
        let (new_devices_sender, new_devices_receiver) = crossbeam_channel::unbounded();

        let manager = Arc::new(Mutex::new(Self {
            seen_devices: HashMap::new(),
            scan_interval,
            new_devices_receiver,
        }));

        let weak_manager = Arc::downgrade(&manager);
        std::thread::Builder::new()
            .name("remote-scan".to_string())
            .spawn(move || Self::scan_loop(&weak_manager, discovery, &new_devices_sender))
            .expect("Failed to spawn remote scan thread");

        manager
    }

    /// Set the interval at which the manager scans for remotes.
    pub fn set_scan_interval(&mut self, scan_interval: Duration) {
        self.scan_interval = scan_interval;
    }

    /// Remotes that are connected or have been connected previously.
    #[must_use]
    pub fn seen_devices(&self) -> Vec<SharedRemote<D::Transport>> {
        self.seen_devices.values().map(Arc::clone).collect()
    }

    /// Receiver of newly connected remotes.
    #[must_use]
    pub fn new_devices_receiver(&self) -> crossbeam_channel::Receiver<SharedRemote<D::Transport>> {
        self.new_devices_receiver.clone()
    }

    fn scan_loop(
        manager: &Weak<Mutex<Self>>,
        mut discovery: D,
        sender: &crossbeam_channel::Sender<SharedRemote<D::Transport>>,
    ) {
        while let Some(manager) = manager.upgrade() {
            let interval = {
                let mut manager = match manager.lock() {
                    Ok(manager) => manager,
                    Err(poisoned) => poisoned.into_inner(),
                };

                let new_devices = manager.scan(&mut discovery);
                let send_result = new_devices
                    .into_iter()
                    .try_for_each(|device| sender.send(device));
                if send_result.is_err() {
                    // Channel is disconnected, end the scan thread.
                    return;
                }

                manager.scan_interval
            };

            std::thread::sleep(interval);
        }
    }

    /// Matches scan results against known sessions, reconnecting inert ones
    /// and opening sessions for new identifiers.
    fn scan(&mut self, discovery: &mut D) -> Vec<SharedRemote<D::Transport>> {
        let mut new_devices = Vec::new();

        for transport in discovery.scan() {
            let identifier = transport.identifier();
            if let Some(existing_device) = self.seen_devices.get(&identifier) {
                let mut existing = match existing_device.lock() {
                    Ok(remote) => remote,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !existing.is_attached() {
                    if let Err(error) = existing.reconnect(transport) {
                        warn!("failed to reconnect remote {identifier}: {error}");
                    }
                }
            } else {
                match Remote::new(transport) {
                    Ok(remote) => {
                        let new_device = Arc::new(Mutex::new(remote));
                        new_devices.push(Arc::clone(&new_device));
                        self.seen_devices.insert(identifier, new_device);
                    }
                    Err(error) => warn!("failed to connect to remote {identifier}: {error}"),
                }
            }
        }

        new_devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    /// Hands out each queued transport once.
    struct QueuedDiscovery {
        pending: Vec<ScriptedTransport>,
    }

    impl Discovery for QueuedDiscovery {
        type Transport = ScriptedTransport;

        fn scan(&mut self) -> Vec<ScriptedTransport> {
            std::mem::take(&mut self.pending)
        }
    }

    #[test]
    fn test_new_devices_are_delivered_once() {
        let discovery = QueuedDiscovery {
            pending: vec![ScriptedTransport::new("remote-1")],
        };
        let manager = RemoteManager::with_interval(discovery, Duration::from_millis(10));
        let receiver = {
            let manager = manager.lock().unwrap();
            manager.new_devices_receiver()
        };

        let remote = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("remote not delivered");
        assert_eq!(remote.lock().unwrap().identifier(), "remote-1");

        // Later scans return nothing new.
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(manager.lock().unwrap().seen_devices().len(), 1);
    }
}
