use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;

use keylight_control_lib::control_interface::{KeyLightClient, LightState};
use keylight_control_lib::controller::LightController;
use keylight_control_lib::registry::{DeviceField, DeviceRecord, FileStore};
use keylight_control_lib::util::discovery::Discovery;
use keylight_control_lib::util::temperature::kelvin_to_mired;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "keylight_control",
    about = "Discovers and controls Elgato Key Light devices",
    version
)]
pub struct Cli {
    /// Settings file holding the device list
    #[clap(long, global = true, env = "KEYLIGHT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[clap(long, global = true, default_value_t = 3000)]
    pub request_timeout: u64,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for listing commands.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scans the network for Key Lights
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,

        /// Replace the stored device list with the result.
        /// Manually added devices are removed.
        #[clap(long)]
        save: bool,
    },
    /// Manages the stored device list
    #[clap(name = "devices")]
    Devices {
        #[clap(subcommand)]
        action: DevicesAction,
    },
    /// Prints the state of every stored device, or of one
    #[clap(name = "status")]
    Status {
        /// Position of the device in the list
        #[clap(long)]
        index: Option<usize>,
    },
    /// Talks to a light given by address
    #[clap(name = "device-call")]
    DeviceCall {
        /// IP address or host name of the light
        #[clap(long)]
        ip: String,

        /// Port of the light's HTTP API
        #[clap(long, default_value = "9123")]
        port: String,

        #[clap(subcommand)]
        action: LightAction,
    },
    /// Talks to a light from the stored device list
    #[clap(name = "light")]
    Light {
        /// Position of the device in the list
        #[clap(long)]
        index: usize,

        #[clap(subcommand)]
        action: LightAction,
    },
}

/// Actions on the stored device list
#[derive(Subcommand)]
pub enum DevicesAction {
    /// Lists stored devices.
    #[clap(name = "list")]
    List {
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Adds a device.
    #[clap(name = "add")]
    Add {
        #[clap(long)]
        ip: String,
        #[clap(long, default_value = "9123")]
        port: String,
        #[clap(long, default_value = "")]
        name: String,
    },
    /// Adds an empty entry to fill in with `edit`.
    #[clap(name = "add-blank")]
    AddBlank,
    /// Removes the device at a position. Unknown positions are ignored.
    #[clap(name = "remove")]
    Remove {
        #[clap(allow_negative_numbers = true)]
        index: isize,
    },
    /// Changes one field of a device.
    #[clap(name = "edit")]
    Edit {
        index: usize,
        #[clap(value_enum)]
        field: DeviceField,
        value: String,
    },
}

/// Actions on a single light
#[derive(Subcommand)]
pub enum LightAction {
    /// Prints the light's state.
    #[clap(name = "get-status")]
    GetStatus,
    /// Turns the light on.
    #[clap(name = "on")]
    On,
    /// Turns the light off.
    #[clap(name = "off")]
    Off,
    /// Sets brightness in percent.
    #[clap(name = "brightness")]
    Brightness {
        #[clap(allow_negative_numbers = true)]
        value: i32,
    },
    /// Sets colour temperature in Kelvin.
    #[clap(name = "temperature")]
    Temperature { kelvin: u32 },
    /// Sets colour temperature in the light's native mireds.
    #[clap(name = "mired")]
    Mired {
        #[clap(allow_negative_numbers = true)]
        value: i32,
    },
}

fn open_controller(cli_settings: Option<PathBuf>, request_timeout: Duration) -> Result<LightController<FileStore>> {
    let path = match cli_settings {
        Some(path) => path,
        None => FileStore::default_path()
            .ok_or_else(|| anyhow!("No config directory found, pass --settings"))?,
    };
    let controller = LightController::open(FileStore::new(&path))
        .with_context(|| format!("Failed to open device list at {}", path.display()))?;
    Ok(controller.with_request_timeout(request_timeout))
}

fn print_devices(devices: &[DeviceRecord], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Plaintext => {
            Discovery::pretty_print_devices(devices);
        }
        OutputFormat::Json => {
            let json = serde_json::to_string(devices)?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(devices)?;
            println!("{}", yaml);
        }
    }
    Ok(())
}

async fn handle_light_action(client: &KeyLightClient, action: LightAction) -> Result<()> {
    match action {
        LightAction::GetStatus => {
            let state: LightState = client
                .get_status()
                .await
                .with_context(|| format!("Failed to read {}", client.url()))?;
            println!("{}", state);
        }
        LightAction::On => {
            client.set_power(true).await?;
            println!("Light turned on.");
        }
        LightAction::Off => {
            client.set_power(false).await?;
            println!("Light turned off.");
        }
        LightAction::Brightness { value } => {
            client.set_brightness(value).await?;
            println!("Brightness set to {}%.", value);
        }
        LightAction::Temperature { kelvin } => {
            if kelvin == 0 {
                return Err(anyhow!("Temperature must be above 0K"));
            }
            let mired = kelvin_to_mired(f64::from(kelvin));
            client.set_temperature(mired).await?;
            println!("Temperature set to {}K ({} mired).", kelvin, mired);
        }
        LightAction::Mired { value } => {
            client.set_temperature(value).await?;
            println!("Temperature set to {} mired.", value);
        }
    }
    Ok(())
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let request_timeout = Duration::from_millis(cli.request_timeout);
    match cli.command {
        Commands::Discover {
            output,
            timeout,
            save,
        } => {
            let timeout = Duration::from_millis(timeout);
            let devices = if save {
                let mut controller = open_controller(cli.settings, request_timeout)?;
                let previous = controller.list_devices().len();
                if previous > 0 {
                    warn!("Replacing {} stored device(s) with the scan result", previous);
                }
                controller.run_discovery(timeout).await?
            } else {
                Discovery::find_devices(timeout).await?
            };
            print_devices(&devices, output)?;
        }
        Commands::Devices { action } => {
            let mut controller = open_controller(cli.settings, request_timeout)?;
            match action {
                DevicesAction::List { output } => {
                    print_devices(controller.list_devices(), output)?;
                }
                DevicesAction::Add { ip, port, name } => {
                    let index = controller.add_device(DeviceRecord::new(&name, &ip, &port))?;
                    println!("Device added at position {}.", index);
                }
                DevicesAction::AddBlank => {
                    let index = controller.add_device(DeviceRecord::default())?;
                    println!("Empty device added at position {}.", index);
                }
                DevicesAction::Remove { index } => match controller.remove_device(index)? {
                    Some(device) => println!("Removed {}.", device),
                    None => println!("No device at position {}, nothing removed.", index),
                },
                DevicesAction::Edit {
                    index,
                    field,
                    value,
                } => {
                    if controller.edit_device(index, field, &value)? {
                        println!("Device {} updated.", index);
                    } else {
                        println!("Device {} unchanged.", index);
                    }
                }
            }
        }
        Commands::Status { index } => {
            let controller = open_controller(cli.settings, request_timeout)?;
            match index {
                Some(index) => {
                    let client = controller.client_at(index)?;
                    handle_light_action(&client, LightAction::GetStatus).await?;
                }
                None => {
                    if controller.list_devices().is_empty() {
                        println!("No devices configured. Run `discover --save` or `devices add`.");
                    }
                    for entry in controller.refresh_all().await {
                        match entry.status {
                            Ok(state) => println!("[{}] {}: {}", entry.index, entry.device, state),
                            Err(e) => println!("[{}] {}: unavailable ({})", entry.index, entry.device, e),
                        }
                    }
                }
            }
        }
        Commands::DeviceCall { ip, port, action } => {
            let client = KeyLightClient::with_timeout(&ip, &port, request_timeout)?;
            handle_light_action(&client, action).await?;
        }
        Commands::Light { index, action } => {
            let controller = open_controller(cli.settings, request_timeout)?;
            let client = controller.client_at(index)?;
            handle_light_action(&client, action).await?;
        }
    }

    Ok(())
}
