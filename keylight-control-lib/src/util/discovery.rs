use std::cmp::max;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use derivative::Derivative;
use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::error::{Error, Result};
use crate::registry::{DeviceRecord, DeviceRegistry, SettingsStore};

/// DNS-SD service type Key Lights announce themselves under.
pub const SERVICE_TYPE: &str = "_elg._tcp.local.";

/// TXT record key carrying the model description, used as friendly name.
pub const FRIENDLY_NAME_KEY: &str = "md";

/// How long a scan listens before it stops.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(5000);

/// One resolved service announcement.
///
/// Equality compares name, addresses and port and ignores the TXT record.
/// A scan deduplicates on the narrower [`Advertisement::identity`].
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub fullname: String,
    /// IPv4 addresses first.
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub txt: BTreeMap<String, String>,
}

impl Advertisement {
    pub fn from_service_info(info: &ServiceInfo) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort_by_key(|address| (address.is_ipv6(), *address));

        let txt = info
            .get_properties()
            .iter()
            .map(|property| (property.key().to_string(), property.val_str().to_string()))
            .collect();

        Advertisement {
            fullname: info.get_fullname().trim_end_matches('.').to_string(),
            addresses,
            port: info.get_port(),
            txt,
        }
    }

    /// Service name plus the address a client would connect to. mDNS
    /// re-resolves a service as more addresses arrive, and those repeats
    /// keep this pair.
    pub fn identity(&self) -> Option<(&str, IpAddr)> {
        Some((self.fullname.as_str(), *self.addresses.first()?))
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.txt.get(FRIENDLY_NAME_KEY).map(String::as_str)
    }

    /// `None` when the announcement carries no address to connect to.
    pub fn to_device_record(&self) -> Option<DeviceRecord> {
        let ip = self.addresses.first()?;
        let friendly_name = match self.friendly_name() {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    "{} has no `{}` TXT entry, leaving it unnamed",
                    self.fullname, FRIENDLY_NAME_KEY
                );
                String::new()
            }
        };
        Some(DeviceRecord {
            name: self.fullname.clone(),
            friendly_name,
            ip: ip.to_string(),
            port: self.port.to_string(),
        })
    }
}

impl Display for Advertisement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on port {}", self.fullname, self.port)
    }
}

/// Something that yields service announcements as they arrive.
///
/// `None` means the source closed and nothing more will come.
pub trait AdvertisementSource {
    fn next_advertisement(&mut self) -> impl Future<Output = Option<Advertisement>> + Send;
}

impl AdvertisementSource for mpsc::UnboundedReceiver<Advertisement> {
    async fn next_advertisement(&mut self) -> Option<Advertisement> {
        self.recv().await
    }
}

impl AdvertisementSource for mpsc::Receiver<Advertisement> {
    async fn next_advertisement(&mut self) -> Option<Advertisement> {
        self.recv().await
    }
}

/// Browses the local network for Key Lights over mDNS.
///
/// Browsing stops when the browser is dropped.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    events: mpsc::UnboundedReceiver<Advertisement>,
    forwarder: JoinHandle<()>,
}

impl MdnsBrowser {
    /// Starts browsing. Must be called inside a tokio runtime.
    pub fn start() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let (sender, events) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        if sender.send(Advertisement::from_service_info(&info)).is_err() {
                            break;
                        }
                    }
                    other => debug!("mDNS event: {:?}", other),
                }
            }
        });

        Ok(MdnsBrowser {
            daemon,
            events,
            forwarder,
        })
    }
}

impl AdvertisementSource for MdnsBrowser {
    async fn next_advertisement(&mut self) -> Option<Advertisement> {
        self.events.recv().await
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        self.forwarder.abort();
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            debug!("Failed to stop browsing: {}", e);
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("Failed to shut down mDNS daemon: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Scanning,
    Done,
}

/// A single time-boxed scan.
///
/// The scan listens until its deadline no matter how many lights answered;
/// mDNS has no "that was everyone" signal. It only ends early when the
/// source closes.
#[derive(Debug)]
pub struct Discovery {
    state: DiscoveryState,
    timeout: Duration,
    seen: HashSet<(String, IpAddr)>,
    devices: Vec<DeviceRecord>,
}

impl Discovery {
    pub fn new(timeout: Duration) -> Self {
        Discovery {
            state: DiscoveryState::Idle,
            timeout,
            seen: HashSet::new(),
            devices: Vec::new(),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Devices collected so far.
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Runs the scan against `source`. A scan runs once.
    pub async fn run<A: AdvertisementSource>(&mut self, source: &mut A) -> Result<Vec<DeviceRecord>> {
        if self.state != DiscoveryState::Idle {
            return Err(Error::Discovery("scan already started".to_string()));
        }
        self.state = DiscoveryState::Scanning;
        let timeout_end = Instant::now() + self.timeout;

        loop {
            let now = Instant::now();
            if now >= timeout_end {
                break;
            }

            match timeout(timeout_end - now, source.next_advertisement()).await {
                Ok(Some(advertisement)) => self.accept(advertisement),
                Ok(None) => {
                    debug!("Advertisement source closed before the deadline");
                    break;
                }
                Err(_) => {
                    info!(
                        "Discovery time complete, {} device(s) found. If devices are missing, try increasing the search timeout.",
                        self.devices.len()
                    );
                    break;
                }
            }
        }

        self.state = DiscoveryState::Done;
        Ok(self.devices.clone())
    }

    fn accept(&mut self, advertisement: Advertisement) {
        let Some((fullname, address)) = advertisement.identity() else {
            warn!("{} has no address, skipping", advertisement);
            return;
        };
        if !self.seen.insert((fullname.to_string(), address)) {
            debug!("Found {} again, skipping", advertisement);
            return;
        }
        if let Some(device) = advertisement.to_device_record() {
            info!("Found device: {}", device);
            self.devices.push(device);
        }
    }

    /// Scans the network over mDNS.
    pub async fn find_devices(given_timeout: Duration) -> Result<Vec<DeviceRecord>> {
        let mut browser = MdnsBrowser::start()?;
        Discovery::new(given_timeout).run(&mut browser).await
    }

    /// Scans and then replaces the registry contents with the result.
    ///
    /// This is destructive: manually added devices are dropped, nothing is
    /// merged.
    pub async fn scan_into<S, A>(
        registry: &mut DeviceRegistry<S>,
        source: &mut A,
        given_timeout: Duration,
    ) -> Result<Vec<DeviceRecord>>
    where
        S: SettingsStore,
        A: AdvertisementSource,
    {
        let devices = Discovery::new(given_timeout).run(source).await?;
        registry.save(devices.clone())?;
        Ok(devices)
    }

    pub fn pretty_print_devices(devices: &[DeviceRecord]) {
        let max_index_width = devices.len().saturating_sub(1).to_string().len();
        let max_name_width = devices
            .iter()
            .map(|d| max(d.display_name().len(), 20))
            .max()
            .unwrap_or(0);
        let max_ip_width = devices.iter().map(|d| d.ip.len()).max().unwrap_or(0);
        let max_port_width = devices
            .iter()
            .map(|d| d.display_port().len())
            .max()
            .unwrap_or(0);

        println!(
            "{:<index_width$} {:<name_width$} {:<ip_width$} {:<port_width$} {}",
            "#",
            "Friendly Name",
            "IP Address",
            "Port",
            "Auto",
            index_width = max_index_width + 2,
            name_width = max_name_width + 2,
            ip_width = max(max_ip_width, 10) + 2,
            port_width = max(max_port_width, 4) + 2,
        );
        println!(
            "{:<index_width$} {:<name_width$} {:<ip_width$} {:<port_width$} {}",
            "-".repeat(max_index_width),
            "-".repeat(max_name_width),
            "-".repeat(max(max_ip_width, 10)),
            "-".repeat(max(max_port_width, 4)),
            "-".repeat(4),
            index_width = max_index_width + 2,
            name_width = max_name_width + 2,
            ip_width = max(max_ip_width, 10) + 2,
            port_width = max(max_port_width, 4) + 2,
        );

        for (index, device) in devices.iter().enumerate() {
            println!(
                "{:<index_width$} {:<name_width$} {:<ip_width$} {:<port_width$} {}",
                index,
                device.display_name(),
                device.ip,
                device.display_port(),
                if device.is_auto_discovered() { "yes" } else { "no" },
                index_width = max_index_width + 2,
                name_width = max_name_width + 2,
                ip_width = max(max_ip_width, 10) + 2,
                port_width = max(max_port_width, 4) + 2,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryStore, DEVICES_KEY};
    use std::net::Ipv4Addr;
    use tokio::time::sleep;

    fn advertisement(serial: &str, last_octet: u8, md: Option<&str>) -> Advertisement {
        let mut txt = BTreeMap::new();
        txt.insert("mf".to_string(), "Elgato".to_string());
        txt.insert("id".to_string(), format!("3C:6A:9D:14:{}", serial));
        if let Some(md) = md {
            txt.insert(FRIENDLY_NAME_KEY.to_string(), md.to_string());
        }
        Advertisement {
            fullname: format!("Elgato Key Light {}._elg._tcp.local", serial),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet))],
            port: 9123,
            txt,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collects_every_advertisement_until_deadline() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let announcer = tokio::spawn(async move {
            for (i, serial) in ["0D4B", "1A2F", "77C0"].into_iter().enumerate() {
                sleep(Duration::from_millis(1000)).await;
                let md = format!("Elgato Key Light {}", i);
                sender
                    .send(advertisement(serial, 20 + i as u8, Some(&md)))
                    .unwrap();
            }
            // stays open past the deadline, like a real browser
            sleep(Duration::from_secs(60)).await;
            drop(sender);
        });

        let mut discovery = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT);
        assert_eq!(discovery.state(), DiscoveryState::Idle);
        let started = Instant::now();
        let devices = discovery.run(&mut receiver).await.unwrap();

        assert!(started.elapsed() >= DEFAULT_DISCOVERY_TIMEOUT);
        assert_eq!(discovery.state(), DiscoveryState::Done);
        assert_eq!(devices.len(), 3);
        for (i, device) in devices.iter().enumerate() {
            assert_eq!(device.ip, format!("192.168.1.{}", 20 + i));
            assert_eq!(device.port, "9123");
            assert_eq!(device.friendly_name, format!("Elgato Key Light {}", i));
            assert!(device.is_auto_discovered());
        }
        announcer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn late_advertisements_are_ignored() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            sender.send(advertisement("0D4B", 20, Some("A"))).unwrap();
            sleep(Duration::from_millis(6000)).await;
            let _ = sender.send(advertisement("1A2F", 21, Some("B")));
        });

        let devices = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .run(&mut receiver)
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].friendly_name, "A");
    }

    #[tokio::test]
    async fn repeats_and_addressless_announcements_are_skipped() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let first = advertisement("0D4B", 20, Some("A"));
        let mut renamed_txt = first.clone();
        renamed_txt.txt.insert(FRIENDLY_NAME_KEY.to_string(), "changed".to_string());
        let mut no_address = advertisement("1A2F", 21, Some("B"));
        no_address.addresses.clear();
        let unnamed = advertisement("77C0", 22, None);

        for ad in [first, renamed_txt, no_address, unnamed] {
            sender.send(ad).unwrap();
        }
        drop(sender);

        let devices = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .run(&mut receiver)
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].friendly_name, "A");
        assert_eq!(devices[1].friendly_name, "");
        assert_eq!(devices[1].display_name(), "unknown");
    }

    #[tokio::test]
    async fn re_resolve_with_extra_address_is_one_device() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let first = advertisement("0D4B", 20, Some("A"));
        let mut with_ipv6 = first.clone();
        with_ipv6.addresses.push("fe80::3e6a:9dff:fe14:d4b".parse().unwrap());
        let mut moved = first.clone();
        moved.addresses = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))];

        for ad in [first, with_ipv6, moved] {
            sender.send(ad).unwrap();
        }
        drop(sender);

        let devices = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .run(&mut receiver)
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].ip, "192.168.1.20");
        assert_eq!(devices[1].ip, "192.168.1.40");
    }

    #[tokio::test]
    async fn a_scan_runs_once() {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Advertisement>();
        drop(sender);
        let mut discovery = Discovery::new(Duration::from_millis(10));
        discovery.run(&mut receiver).await.unwrap();
        assert!(matches!(
            discovery.run(&mut receiver).await,
            Err(Error::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn scan_replaces_registry_contents() {
        let mut registry = DeviceRegistry::open(MemoryStore::with_value(
            DEVICES_KEY,
            r#"[{"name":"","friendlyName":"Manual","ip":"10.0.0.9","port":"9123"}]"#,
        ))
        .unwrap();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        sender.send(advertisement("0D4B", 20, Some("Found"))).unwrap();
        drop(sender);

        Discovery::scan_into(&mut registry, &mut receiver, DEFAULT_DISCOVERY_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.devices()[0].friendly_name, "Found");
        let stored = registry.store().get_string(DEVICES_KEY).unwrap().unwrap();
        assert!(!stored.contains("Manual"));
    }

    #[test]
    fn service_info_is_read_by_key() {
        let properties = [
            ("mf", "Elgato"),
            ("dt", "53"),
            ("id", "3C:6A:9D:14:0D:4B"),
            ("md", "Elgato Key Light 20GAK9901"),
            ("pv", "1.0"),
        ];
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "Elgato Key Light 0D4B",
            "elgato-key-light-0d4b.local.",
            "192.168.1.20",
            9123,
            &properties[..],
        )
        .unwrap();

        let ad = Advertisement::from_service_info(&info);
        assert_eq!(ad.fullname, "Elgato Key Light 0D4B._elg._tcp.local");
        assert_eq!(ad.friendly_name(), Some("Elgato Key Light 20GAK9901"));

        let device = ad.to_device_record().unwrap();
        assert_eq!(device.ip, "192.168.1.20");
        assert_eq!(device.port, "9123");
        assert!(device.is_auto_discovered());
    }
}
