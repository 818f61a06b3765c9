//! USB serial bridges found on common Espressif development boards

use serde::{Deserialize, Serialize};
use serialport::UsbPortInfo;

/// A USB device identified by its vendor and product ID
#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID
    #[serde(
        serialize_with = "serialize_u16_to_hex",
        deserialize_with = "deserialize_hex_to_u16"
    )]
    pub vid: u16,
    /// USB Product ID
    #[serde(
        serialize_with = "serialize_u16_to_hex",
        deserialize_with = "deserialize_hex_to_u16"
    )]
    pub pid: u16,
}

impl UsbDevice {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Check if the given USB port matches this device
    pub fn matches(&self, port: &UsbPortInfo) -> bool {
        self.vid == port.vid && self.pid == port.pid
    }
}

/// USB serial bridges which are known to be on common dev boards
pub const SUPPORTED_DEVICES: &[UsbDevice] = &[
    UsbDevice::new(0x10c4, 0xea60), // Silicon Labs CP210x UART Bridge
    UsbDevice::new(0x0403, 0x6010), // FTDI FT2232
    UsbDevice::new(0x303a, 0x1001), // Espressif USB-Serial/JTAG
    UsbDevice::new(0x303a, 0x1002), // Espressif USB-Serial/JTAG
    UsbDevice::new(0x303a, 0x0002), // Espressif USB CDC (ESP32-S2)
    UsbDevice::new(0x303a, 0x0009), // Espressif USB CDC (ESP32-S3)
    UsbDevice::new(0x1a86, 0x55d4), // QinHeng Electronics CH9102
    UsbDevice::new(0x1a86, 0x7523), // QinHeng Electronics CH340
    UsbDevice::new(0x0403, 0x6001), // FTDI FT232R
];

/// Whether the port belongs to a built-in or an additionally configured device
pub fn is_supported(port: &UsbPortInfo, extra: &[UsbDevice]) -> bool {
    SUPPORTED_DEVICES
        .iter()
        .chain(extra.iter())
        .any(|device| device.matches(port))
}

/// Human readable name of a built-in bridge
pub fn describe(device: &UsbDevice) -> Option<&'static str> {
    let name = match (device.vid, device.pid) {
        (0x10c4, 0xea60) => "Silicon Labs CP210x",
        (0x0403, 0x6010) => "FTDI FT2232",
        (0x0403, 0x6001) => "FTDI FT232R",
        (0x303a, 0x1001 | 0x1002) => "Espressif USB-Serial/JTAG",
        (0x303a, 0x0002 | 0x0009) => "Espressif USB CDC",
        (0x1a86, 0x55d4) => "QinHeng CH9102",
        (0x1a86, 0x7523) => "QinHeng CH340",
        _ => return None,
    };

    Some(name)
}

fn deserialize_hex_to_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let hex = String::deserialize(deserializer)?.to_lowercase();
    let hex = hex.trim_start_matches("0x");

    u16::from_str_radix(hex, 16).map_err(serde::de::Error::custom)
}

fn serialize_u16_to_hex<S>(value: &u16, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{value:04x}"))
}
