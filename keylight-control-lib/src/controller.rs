use std::time::Duration;

use futures::future::join_all;
use log::{error, info};

use crate::control_interface::{KeyLightClient, LightState, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::registry::{DeviceField, DeviceRecord, DeviceRegistry, SettingsStore};
use crate::util::discovery::{AdvertisementSource, Discovery, MdnsBrowser};

/// Everything a front end needs: the device list, one client per device and
/// network scans.
///
/// Clients are handed out fresh from the current registry contents, so a
/// client never outlives the record it was built from in a meaningful way.
#[derive(Debug)]
pub struct LightController<S> {
    registry: DeviceRegistry<S>,
    request_timeout: Duration,
}

/// Outcome of querying one device during [`LightController::refresh_all`].
#[derive(Debug)]
pub struct DeviceStatus {
    pub index: usize,
    pub device: DeviceRecord,
    pub status: Result<LightState>,
}

impl<S: SettingsStore> LightController<S> {
    pub fn new(registry: DeviceRegistry<S>) -> Self {
        LightController {
            registry,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn open(store: S) -> Result<Self> {
        Ok(Self::new(DeviceRegistry::open(store)?))
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry<S> {
        &self.registry
    }

    /// Re-reads the stored list, picking up changes made by other processes.
    pub fn reload(&mut self) -> Result<&[DeviceRecord]> {
        self.registry.load()
    }

    pub fn list_devices(&self) -> &[DeviceRecord] {
        self.registry.devices()
    }

    pub fn add_device(&mut self, record: DeviceRecord) -> Result<usize> {
        self.registry.add(record)
    }

    /// See [`DeviceRegistry::remove_at`]; negative or unknown indices do
    /// nothing.
    pub fn remove_device(&mut self, index: isize) -> Result<Option<DeviceRecord>> {
        self.registry.remove_at(index)
    }

    pub fn edit_device(&mut self, index: usize, field: DeviceField, value: &str) -> Result<bool> {
        self.registry.update_field(index, field, value)
    }

    pub fn client_for(&self, device: &DeviceRecord) -> Result<KeyLightClient> {
        KeyLightClient::with_timeout(&device.ip, &device.port, self.request_timeout)
    }

    pub fn client_at(&self, index: usize) -> Result<KeyLightClient> {
        let device = self.registry.get(index).ok_or(Error::NoSuchDevice(index))?;
        self.client_for(device)
    }

    /// Queries every configured light at once. A light that fails only
    /// fails its own entry.
    pub async fn refresh_all(&self) -> Vec<DeviceStatus> {
        let queries = self
            .registry
            .devices()
            .iter()
            .enumerate()
            .map(|(index, device)| async move {
                let status = match self.client_for(device) {
                    Ok(client) => client.get_status().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &status {
                    error!("Failed to read {}: {}", device, e);
                }
                DeviceStatus {
                    index,
                    device: device.clone(),
                    status,
                }
            });
        join_all(queries).await
    }

    /// Scans the network over mDNS and replaces the device list with the
    /// result. Manually added devices are lost.
    pub async fn run_discovery(&mut self, timeout: Duration) -> Result<Vec<DeviceRecord>> {
        let mut browser = MdnsBrowser::start()?;
        self.run_discovery_with(&mut browser, timeout).await
    }

    pub async fn run_discovery_with<A: AdvertisementSource>(
        &mut self,
        source: &mut A,
        timeout: Duration,
    ) -> Result<Vec<DeviceRecord>> {
        let devices = Discovery::scan_into(&mut self.registry, source, timeout).await?;
        info!("Device list replaced by {} discovered device(s)", devices.len());
        Ok(devices)
    }
}
