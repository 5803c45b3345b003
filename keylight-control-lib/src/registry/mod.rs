//! The persisted list of known Key Lights.
//!
//! The list lives as a JSON array under a single settings key. It is the only
//! durable state of the crate; clients are rebuilt from it whenever it
//! changes.

use std::fmt;

use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod store;

pub use store::{FileStore, MemoryStore, SettingsStore};

/// Settings key holding the device list.
pub const DEVICES_KEY: &str = "elgato-devices";

/// Suffix of mDNS service names; records carrying it came from a scan.
pub const AUTO_DISCOVERED_SUFFIX: &str = ".local";

const UNKNOWN_NAME: &str = "unknown";

/// One configured light.
///
/// Only `ip` and `port` address the device. The same address may appear
/// more than once; records are told apart by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Service name from discovery, or a copy of the friendly name.
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "friendlyName")]
    pub friendly_name: String,
    #[serde(default)]
    pub ip: String,
    /// Decimal port as text. Never parsed here.
    #[serde(default)]
    pub port: String,
}

impl DeviceRecord {
    pub fn new(friendly_name: &str, ip: &str, port: &str) -> Self {
        DeviceRecord {
            name: String::new(),
            friendly_name: friendly_name.to_string(),
            ip: ip.to_string(),
            port: port.to_string(),
        }
    }

    /// Label for lists and menus, `"unknown"` when unnamed.
    pub fn display_name(&self) -> &str {
        if self.friendly_name.is_empty() {
            UNKNOWN_NAME
        } else {
            &self.friendly_name
        }
    }

    /// Port as shown to a user, `"0"` when unset.
    pub fn display_port(&self) -> &str {
        if self.port.is_empty() {
            "0"
        } else {
            &self.port
        }
    }

    /// Whether the record came from an mDNS scan. Display only.
    pub fn is_auto_discovered(&self) -> bool {
        self.name.ends_with(AUTO_DISCOVERED_SUFFIX)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.display_name(), self.ip, self.display_port())
    }
}

/// Editable field of a [`DeviceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceField {
    FriendlyName,
    Ip,
    Port,
}

/// The device list, read from and written through to a [`SettingsStore`].
///
/// Every mutation is persisted before it returns.
#[derive(Debug)]
pub struct DeviceRegistry<S> {
    store: S,
    devices: Vec<DeviceRecord>,
}

impl<S: SettingsStore> DeviceRegistry<S> {
    /// Creates the registry and loads the stored list.
    pub fn open(store: S) -> Result<Self> {
        let mut registry = DeviceRegistry {
            store,
            devices: Vec::new(),
        };
        registry.load()?;
        Ok(registry)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn get(&self, index: usize) -> Option<&DeviceRecord> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Re-reads the list from the store.
    ///
    /// A value that is not a JSON array of devices is replaced by `[]` in the
    /// store right away and an empty list is returned. Only failures of the
    /// store itself are errors.
    pub fn load(&mut self) -> Result<&[DeviceRecord]> {
        let devices = match self.store.get_string(DEVICES_KEY)? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<DeviceRecord>>(&raw) {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("{}, resetting to an empty list", Error::PersistenceCorruption(e));
                    self.store.set_string(DEVICES_KEY, "[]")?;
                    Vec::new()
                }
            },
        };
        debug!("Loaded {} device(s)", devices.len());
        self.devices = devices;
        Ok(&self.devices)
    }

    /// Replaces the whole list and persists it.
    pub fn save(&mut self, devices: Vec<DeviceRecord>) -> Result<()> {
        self.devices = devices;
        self.persist()
    }

    pub fn add(&mut self, record: DeviceRecord) -> Result<usize> {
        info!("Adding device {}", record);
        self.devices.push(record);
        self.persist()?;
        Ok(self.devices.len() - 1)
    }

    /// Appends an empty record to be filled in afterwards.
    pub fn add_blank(&mut self) -> Result<usize> {
        self.add(DeviceRecord::default())
    }

    /// Removes the record at `index`, taking a UI selection index where a
    /// negative value means nothing is selected. Out-of-range indices are
    /// ignored and nothing is written.
    pub fn remove_at(&mut self, index: isize) -> Result<Option<DeviceRecord>> {
        let index = match usize::try_from(index) {
            Ok(index) if index < self.devices.len() => index,
            _ => {
                debug!("Ignoring removal of index {}", index);
                return Ok(None);
            }
        };
        let removed = self.devices.remove(index);
        info!("Removed device {}", removed);
        self.persist()?;
        Ok(Some(removed))
    }

    /// Sets one field of the record at `index` to the trimmed `value`.
    ///
    /// Returns `false` and writes nothing when the value did not change.
    /// Renaming also overwrites `name`, so the record stops counting as
    /// auto-discovered.
    pub fn update_field(&mut self, index: usize, field: DeviceField, value: &str) -> Result<bool> {
        let value = value.trim();
        let device = self
            .devices
            .get_mut(index)
            .ok_or(Error::NoSuchDevice(index))?;

        let changed = match field {
            DeviceField::FriendlyName => {
                if device.friendly_name == value {
                    false
                } else {
                    device.name = value.to_string();
                    device.friendly_name = value.to_string();
                    true
                }
            }
            DeviceField::Ip => replace_if_changed(&mut device.ip, value),
            DeviceField::Port => replace_if_changed(&mut device.port, value),
        };

        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string(&self.devices).map_err(|e| Error::Settings {
            path: DEVICES_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.store.set_string(DEVICES_KEY, &serialized)
    }
}

fn replace_if_changed(slot: &mut String, value: &str) -> bool {
    if slot == value {
        false
    } else {
        *slot = value.to_string();
        true
    }
}
