//! Device presence detection.
//!
//! [`PortWatcher`] polls the serial ports of the host, keeps the USB ports
//! whose vendor/product pair is allowed, and reports every change as a
//! [`PresenceEvent`]. Events are delivered over an `mpsc` channel so the
//! session can consume them on its own thread.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::transport::serial::list_ports;
use crate::types::DeviceIdentity;

/// Default interval between two port scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Vendor/product pairs of known jetbeep devices.
pub const DEFAULT_ALLOWED: &[(u16, u16)] = &[(0x04d8, 0x00df), (0x1915, 0x776a)];

/// A device appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Attached(DeviceIdentity),
    Detached(DeviceIdentity),
}

impl PresenceEvent {
    /// The device this event is about.
    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::Attached(identity) | Self::Detached(identity) => identity,
        }
    }
}

/// Configuration for a [`PortWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval between two port scans.
    pub poll_interval: Duration,
    /// Accepted `(vendor_id, product_id)` pairs.
    pub allowed: Vec<(u16, u16)>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            allowed: DEFAULT_ALLOWED.to_vec(),
        }
    }
}

impl WatcherConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adds a vendor/product pair to the allow-list.
    #[must_use]
    pub fn allow(mut self, vendor_id: u16, product_id: u16) -> Self {
        if !self.allowed.contains(&(vendor_id, product_id)) {
            self.allowed.push((vendor_id, product_id));
        }
        self
    }

    /// Whether `identity` is a device this watcher reports.
    #[must_use]
    pub fn is_allowed(&self, identity: &DeviceIdentity) -> bool {
        self.allowed
            .contains(&(identity.vendor_id, identity.product_id))
    }
}

/// Polling presence watcher.
#[derive(Debug)]
pub struct PortWatcher {
    config: WatcherConfig,
    present: Vec<DeviceIdentity>,
}

impl PortWatcher {
    /// Creates a watcher that has not seen any device yet.
    #[must_use]
    pub const fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            present: Vec::new(),
        }
    }

    /// Devices reported as attached and not yet detached.
    #[must_use]
    pub fn present(&self) -> &[DeviceIdentity] {
        &self.present
    }

    /// Compares a port listing with the previous one.
    ///
    /// Detachments are reported before attachments, so a device that moved
    /// to another path is seen leaving first.
    pub fn update(&mut self, ports: Vec<DeviceIdentity>) -> Vec<PresenceEvent> {
        let mut current: Vec<DeviceIdentity> = Vec::with_capacity(ports.len());
        for port in ports {
            if self.config.is_allowed(&port) && !current.contains(&port) {
                current.push(port);
            }
        }

        let mut events: Vec<PresenceEvent> = self
            .present
            .iter()
            .filter(|known| !current.contains(known))
            .cloned()
            .map(PresenceEvent::Detached)
            .collect();
        events.extend(
            current
                .iter()
                .filter(|port| !self.present.contains(port))
                .cloned()
                .map(PresenceEvent::Attached),
        );

        self.present = current;
        events
    }

    /// Scans the host's serial ports once.
    pub fn poll(&mut self) -> Result<Vec<PresenceEvent>> {
        let ports = list_ports()?;
        Ok(self.update(ports))
    }

    /// Starts polling on the runtime.
    ///
    /// The task stops once the returned receiver is dropped.
    #[must_use]
    pub fn spawn(mut self) -> (mpsc::UnboundedReceiver<PresenceEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let events = match self.poll() {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("port scan failed: {}", e);
                        continue;
                    }
                };
                for event in events {
                    tracing::debug!("presence: {:?}", event);
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                if tx.is_closed() {
                    return;
                }
            }
        });
        (rx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(vendor_id: u16, product_id: u16, path: &str) -> DeviceIdentity {
        DeviceIdentity::new(vendor_id, product_id, path)
    }

    #[test]
    fn test_config_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.is_allowed(&port(0x04d8, 0x00df, "COM3")));
        assert!(config.is_allowed(&port(0x1915, 0x776a, "COM4")));
        assert!(!config.is_allowed(&port(0x0403, 0x6001, "COM5")));

        let config = config.allow(0x0403, 0x6001).allow(0x0403, 0x6001);
        assert_eq!(config.allowed.len(), 3);
    }

    #[test]
    fn test_update_reports_changes() {
        let mut watcher = PortWatcher::new(WatcherConfig::default());
        let a = port(0x1915, 0x776a, "/dev/ttyACM0");
        let b = port(0x04d8, 0x00df, "/dev/ttyACM1");
        let other = port(0x0403, 0x6001, "/dev/ttyUSB0");

        let events = watcher.update(vec![a.clone(), other.clone()]);
        assert_eq!(events, vec![PresenceEvent::Attached(a.clone())]);

        assert!(watcher.update(vec![a.clone(), other]).is_empty());

        let events = watcher.update(vec![b.clone()]);
        assert_eq!(
            events,
            vec![
                PresenceEvent::Detached(a.clone()),
                PresenceEvent::Attached(b.clone()),
            ]
        );
        assert_eq!(watcher.present(), &[b]);
    }

    #[test]
    fn test_moved_device_is_detached_then_attached() {
        let mut watcher = PortWatcher::new(WatcherConfig::default());
        let before = port(0x1915, 0x776a, "/dev/ttyACM0");
        let after = port(0x1915, 0x776a, "/dev/ttyACM1");

        watcher.update(vec![before.clone()]);
        let events = watcher.update(vec![after.clone()]);
        assert_eq!(events[0], PresenceEvent::Detached(before));
        assert_eq!(events[1], PresenceEvent::Attached(after.clone()));
        assert_eq!(events[1].identity(), &after);
    }

    #[test]
    #[ignore = "requires serial hardware"]
    fn test_poll() {
        let mut watcher = PortWatcher::new(WatcherConfig::default());
        let events = watcher.poll().unwrap();
        println!("{events:?}");
    }
}
