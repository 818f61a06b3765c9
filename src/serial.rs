//! Serial port discovery and selection

use clap::Args;
use crossterm::style::Stylize;
use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use log::{debug, warn};
use serialport::{available_ports, SerialPortInfo, SerialPortType, UsbPortInfo};

use crate::{
    config::Config,
    devices::{describe, is_supported, UsbDevice},
    error::Error,
};

/// Options for selecting the serial port of a device
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectArgs {
    /// Serial port connected to target device
    #[arg(short = 'p', long, env = "RELFLASH_PORT")]
    pub port: Option<String>,
    /// Offer every detected USB serial port, not only supported bridges
    #[arg(long)]
    pub list_all_ports: bool,
}

/// A detected serial port, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub device: Option<UsbDevice>,
    pub product: Option<String>,
    pub supported: bool,
}

/// Determine the serial port to connect to
///
/// A port named on the command line takes precedence over one named in the
/// configuration file. Without either, the detected ports are filtered to the
/// supported USB bridges; a single match is used directly, several matches
/// are offered in a selection prompt.
pub fn get_serial_port_info(args: &ConnectArgs, config: &Config) -> Result<SerialPortInfo, Error> {
    let ports = detect_usb_serial_ports()?;

    if let Some(serial) = args.port.as_ref().or(config.connection.serial.as_ref()) {
        find_serial_port(&ports, &canonical_port_name(serial))
    } else {
        let (port, matches) = select_serial_port(ports, config, args.list_all_ports)?;

        if let SerialPortType::UsbPort(usb_info) = &port.port_type {
            if !matches {
                remember_port(config, usb_info)?;
            }
        }

        Ok(port)
    }
}

// canonicalize() resolves symlinks such as `/dev/serial/by-id/...`, but does
// not work with Windows device names like `COM4`.
#[cfg(not(target_os = "windows"))]
fn canonical_port_name(name: &str) -> String {
    std::fs::canonicalize(name)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| name.to_owned())
}

#[cfg(target_os = "windows")]
fn canonical_port_name(name: &str) -> String {
    name.to_owned()
}

fn remember_port(config: &Config, usb_info: &UsbPortInfo) -> Result<(), Error> {
    let remember = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this serial port for future use?")
        .interact_opt()?
        .unwrap_or_default();

    if remember {
        // Allow this operation to fail without terminating the application,
        // but inform the user if something goes wrong.
        if let Err(e) = config.save_with(|config| {
            config
                .usb_device
                .push(UsbDevice::new(usb_info.vid, usb_info.pid))
        }) {
            warn!("Failed to save config {:#}", e);
        }
    }

    Ok(())
}

/// Given a slice of `SerialPortInfo` structs, attempt to find and return one
/// whose `port_name` field matches the provided `name` argument.
fn find_serial_port(ports: &[SerialPortInfo], name: &str) -> Result<SerialPortInfo, Error> {
    ports
        .iter()
        .find(|port| port.port_name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| Error::SerialNotFound(name.to_owned()))
}

/// Serial ports which are attached through USB, or whose type is unknown
pub fn detect_usb_serial_ports() -> Result<Vec<SerialPortInfo>, Error> {
    let ports = available_ports()?
        .into_iter()
        .filter(|port_info| {
            matches!(
                &port_info.port_type,
                SerialPortType::UsbPort(..) | SerialPortType::Unknown
            )
        })
        .collect::<Vec<_>>();
    debug!("Detected serial ports: {ports:?}");

    Ok(ports)
}

/// Keep the ports attached through a supported USB bridge
pub fn filter_supported(ports: Vec<SerialPortInfo>, extra: &[UsbDevice]) -> Vec<SerialPortInfo> {
    ports
        .into_iter()
        .filter(|port| port_matches(port, extra))
        .collect()
}

fn port_matches(port: &SerialPortInfo, extra: &[UsbDevice]) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(info) => is_supported(info, extra),
        _ => false,
    }
}

/// Describe the detected ports for listing
pub fn summarize_ports(ports: &[SerialPortInfo], extra: &[UsbDevice]) -> Vec<PortSummary> {
    ports
        .iter()
        .map(|port| {
            let (device, product) = match &port.port_type {
                SerialPortType::UsbPort(info) => {
                    let device = UsbDevice::new(info.vid, info.pid);
                    let product = info
                        .product
                        .clone()
                        .or_else(|| describe(&device).map(str::to_owned));

                    (Some(device), product)
                }
                _ => (None, None),
            };

            PortSummary {
                name: port.port_name.clone(),
                device,
                product,
                supported: port_matches(port, extra),
            }
        })
        .collect()
}

fn select_serial_port(
    ports: Vec<SerialPortInfo>,
    config: &Config,
    list_all_ports: bool,
) -> Result<(SerialPortInfo, bool), Error> {
    let ports = if list_all_ports {
        ports
    } else {
        filter_supported(ports, &config.usb_device)
    };

    if let [port] = ports.as_slice() {
        let matches = port_matches(port, &config.usb_device);

        if matches || confirm_port(port)? {
            Ok((port.to_owned(), matches))
        } else {
            Err(Error::NoPortAvailable)
        }
    } else if ports.len() > 1 {
        println!(
            "Detected {} serial ports. Ports which match a supported board are highlighted.\n",
            ports.len()
        );

        let port_names = summarize_ports(&ports, &config.usb_device)
            .into_iter()
            .map(|summary| {
                let formatted = if summary.supported {
                    summary.name.as_str().bold()
                } else {
                    summary.name.as_str().reset()
                };

                match summary.product {
                    Some(product) => format!("{formatted} - {product}"),
                    None => formatted.to_string(),
                }
            })
            .collect::<Vec<_>>();

        let index = Select::with_theme(&ColorfulTheme::default())
            .items(&port_names)
            .default(0)
            .interact_opt()?
            .ok_or(Error::NoPortAvailable)?;

        let port = ports.get(index).ok_or(Error::NoPortAvailable)?;

        Ok((port.to_owned(), port_matches(port, &config.usb_device)))
    } else {
        Err(Error::NoPortAvailable)
    }
}

fn confirm_port(port: &SerialPortInfo) -> Result<bool, Error> {
    let product = match &port.port_type {
        SerialPortType::UsbPort(info) => info.product.as_deref(),
        _ => None,
    };

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(match product {
            Some(product) => format!("Use serial port '{}' - {}?", port.port_name, product),
            None => format!("Use serial port '{}'?", port.port_name),
        })
        .interact_opt()?
        .unwrap_or_default();

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::devices::SUPPORTED_DEVICES;

    fn usb_port(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    #[test]
    fn every_supported_bridge_is_offered() {
        let ports = SUPPORTED_DEVICES
            .iter()
            .enumerate()
            .map(|(i, dev)| usb_port(&format!("/dev/ttyUSB{i}"), dev.vid, dev.pid))
            .collect::<Vec<_>>();

        let offered = filter_supported(ports.clone(), &[]);
        assert_eq!(offered, ports);
    }

    #[test]
    fn unsupported_ports_are_not_offered() {
        let ports = vec![
            usb_port("/dev/ttyACM0", 0x2341, 0x0043),
            usb_port("/dev/ttyUSB0", 0x1a86, 0x7523),
            SerialPortInfo {
                port_name: "/dev/ttyS0".into(),
                port_type: SerialPortType::Unknown,
            },
        ];

        let offered = filter_supported(ports, &[]);
        assert_eq!(offered, [usb_port("/dev/ttyUSB0", 0x1a86, 0x7523)]);
    }

    #[test]
    fn configured_devices_are_offered() {
        let ports = vec![usb_port("/dev/ttyACM0", 0x2341, 0x0043)];

        let offered = filter_supported(ports.clone(), &[UsbDevice::new(0x2341, 0x0043)]);
        assert_eq!(offered, ports);
    }

    #[test]
    fn ports_are_found_by_name() {
        let ports = [
            usb_port("COM3", 0x10c4, 0xea60),
            usb_port("COM4", 0x1a86, 0x7523),
        ];

        let port = find_serial_port(&ports, "com4").unwrap();
        assert_eq!(port.port_name, "COM4");

        assert!(matches!(
            find_serial_port(&ports, "COM5"),
            Err(Error::SerialNotFound(name)) if name == "COM5"
        ));
    }

    #[test]
    fn no_matching_port_is_an_error() {
        let ports = vec![usb_port("/dev/ttyACM0", 0x2341, 0x0043)];

        assert!(matches!(
            select_serial_port(ports, &Config::default(), false),
            Err(Error::NoPortAvailable)
        ));
        assert!(matches!(
            select_serial_port(Vec::new(), &Config::default(), true),
            Err(Error::NoPortAvailable)
        ));
    }

    #[test]
    fn single_supported_port_is_selected_without_prompt() {
        let ports = vec![
            usb_port("/dev/ttyACM0", 0x2341, 0x0043),
            usb_port("/dev/ttyUSB0", 0x303a, 0x1001),
        ];

        let (port, matches) = select_serial_port(ports, &Config::default(), false).unwrap();
        assert_eq!(port.port_name, "/dev/ttyUSB0");
        assert!(matches);
    }

    #[test]
    fn summaries_name_known_bridges() {
        let ports = [
            usb_port("/dev/ttyUSB0", 0x1a86, 0x55d4),
            usb_port("/dev/ttyACM0", 0x2341, 0x0043),
        ];

        let summaries = summarize_ports(&ports, &[]);
        assert_eq!(summaries[0].product.as_deref(), Some("QinHeng CH9102"));
        assert!(summaries[0].supported);
        assert_eq!(summaries[1].product, None);
        assert!(!summaries[1].supported);
    }
}
