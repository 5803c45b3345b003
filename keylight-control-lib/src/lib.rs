//! # Key Light Control Library
//!
//! `keylight-control-lib` is a Rust library for controlling Elgato Key Light devices over
//! their local HTTP API. It keeps a persisted list of known lights, discovers new ones
//! over mDNS, and talks to each light through a small async client.
//!
//! This library is designed to be used by command-line tools, panel applets or other
//! front ends that want to show and change the state of the lights on a network.
//!
//! ## Features
//!
//! - Device discovery on local networks (mDNS, `_elg._tcp`)
//! - A device list persisted as JSON in a key/value settings store, repaired on corruption
//! - Reading and updating power, brightness and colour temperature of a light
//! - Kelvin/mired conversions and debounced updates for slider-driven front ends
//!
//! ## Example
//!
//! Here is a simple example of how to scan the network and read the state of every light found:
//!
//! ```no_run
//! use keylight_control_lib::control_interface::KeyLightClient;
//! use keylight_control_lib::util::discovery::Discovery;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover devices with a 5-second timeout
//!     let devices = Discovery::find_devices(Duration::from_secs(5)).await?;
//!
//!     for device in devices {
//!         let client = KeyLightClient::from_device_record(&device)?;
//!         println!("{}: {}", device, client.get_status().await?);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with Elgato or Corsair.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// The `control_interface` module provides the HTTP client for a single light and the
// wire types of the `/elgato/lights` resource.
//
// Example usage:
//
// ```
// use keylight_control_lib::control_interface::{KeyLightClient, LightUpdate};
//
// #[tokio::main]
// async fn main() {
//     let light = KeyLightClient::new("192.168.1.20", "9123").unwrap();
//     light.update(&LightUpdate::brightness(40)).await.unwrap();
// }
// ```
pub mod control_interface;

// The `controller` module ties the registry, the clients and discovery together for
// front ends.
pub mod controller;

pub mod error;

// The `registry` module holds the persisted device list and the settings stores it
// can be written to.
pub mod registry;

// The `util` module provides discovery, version comparison, unit conversions and
// debouncing.
pub mod util;

pub use error::{Error, Result};
