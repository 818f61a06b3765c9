//! Connection sessions with a device's ROM bootloader
//!
//! The bootloader protocol itself (synchronisation, stub upload, erasing and
//! compressed flash writes) is provided by the [espflash] crate. This module
//! wraps it behind the [BootloaderClient] trait so the rest of the
//! application can be driven, and tested, without a physical device.

use espflash::{
    connection::reset::{ResetAfterOperation, ResetBeforeOperation},
    flasher::{FlashSize, Flasher, ProgressCallbacks},
};
use log::debug;
use serialport::{FlowControl, SerialPortType, UsbPortInfo};

use crate::{
    config::Config,
    error::Error,
    log_panel::LogSink,
    logging::capture_loader_output,
    progress::ProgressSink,
    serial::{get_serial_port_info, ConnectArgs},
};

/// Baud rate used to talk to the ROM bootloader
pub const BAUD_RATE: u32 = 115_200;

/// Parameters of a flash write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashParams {
    /// Flash size the image is written for, in megabytes
    pub flash_size_mb: u32,
    /// Erase the whole chip before writing
    pub erase_all: bool,
    /// Compress the image while transferring it
    pub compress: bool,
    /// Flash address to write the image to
    pub address: u32,
}

impl Default for FlashParams {
    fn default() -> Self {
        Self {
            flash_size_mb: 4,
            erase_all: true,
            compress: true,
            address: 0,
        }
    }
}

/// Operations of a connected bootloader
pub trait BootloaderClient {
    /// Name of the detected chip
    fn chip(&self) -> String;

    /// Write `data` to flash, reporting progress as it is written
    fn write_flash(
        &mut self,
        data: &[u8],
        params: &FlashParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), Error>;

    /// Leave the bootloader and reboot the device
    fn finish(&mut self) -> Result<(), Error>;

    /// Release the underlying transport
    fn close(&mut self);
}

/// Establishes sessions with a device
pub trait Connector {
    /// Select a device, open its transport and perform the bootloader
    /// handshake
    fn connect(&mut self, log: &mut dyn LogSink) -> Result<Session, Error>;
}

/// An established connection with a device
pub struct Session {
    port: String,
    chip: String,
    client: Box<dyn BootloaderClient>,
}

impl Session {
    pub fn new(port: impl Into<String>, client: Box<dyn BootloaderClient>) -> Self {
        let chip = client.chip();

        Self {
            port: port.into(),
            chip,
            client,
        }
    }

    /// Name of the serial port the session is using
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Name of the connected chip
    pub fn chip(&self) -> &str {
        &self.chip
    }

    pub fn client(&mut self) -> &mut dyn BootloaderClient {
        self.client.as_mut()
    }

    /// Close the session, releasing the transport
    pub fn close(mut self) {
        debug!("Closing session on {}", self.port);
        self.client.close();
    }
}

/// Connects to devices attached to a serial port
pub struct SerialConnector {
    args: ConnectArgs,
    config: Config,
}

impl SerialConnector {
    pub fn new(args: ConnectArgs, config: Config) -> Self {
        Self { args, config }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self, log: &mut dyn LogSink) -> Result<Session, Error> {
        let port_info = get_serial_port_info(&self.args, &self.config)?;

        log.append_line(format!("Serial port: {}", port_info.port_name).into());
        log.append_line("Connecting...".into());

        let serial = serialport::new(&port_info.port_name, BAUD_RATE)
            .flow_control(FlowControl::None)
            .open_native()
            .map_err(|err| {
                Error::HandshakeFailure(format!(
                    "failed to open serial port {}: {err}",
                    port_info.port_name
                ))
            })?;

        // Ports which are not USB attached carry no identification, the
        // bootloader only uses it to choose a reset strategy.
        let usb_info = match port_info.port_type {
            SerialPortType::UsbPort(info) => info,
            _ => UsbPortInfo {
                vid: 0,
                pid: 0,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        };

        let (flasher, output) = capture_loader_output(|| {
            Flasher::connect(
                serial,
                usb_info,
                None,
                true,
                true,
                false,
                None,
                ResetAfterOperation::HardReset,
                ResetBeforeOperation::DefaultReset,
            )
        });
        output.replay(log);
        let flasher = flasher.map_err(|err| Error::HandshakeFailure(err.to_string()))?;

        let session = Session::new(port_info.port_name, Box::new(EspflashClient::new(flasher)));
        log.append_line(format!("Chip type: {}", session.chip()).into());

        Ok(session)
    }
}

/// [BootloaderClient] backed by an espflash [Flasher]
pub struct EspflashClient {
    flasher: Option<Flasher>,
    chip: String,
}

impl EspflashClient {
    pub fn new(flasher: Flasher) -> Self {
        let chip = flasher.chip().to_string();

        Self {
            flasher: Some(flasher),
            chip,
        }
    }

    fn flasher(&mut self) -> Result<&mut Flasher, Error> {
        self.flasher
            .as_mut()
            .ok_or_else(|| Error::FlashWriteFailure("the connection has been closed".into()))
    }
}

impl BootloaderClient for EspflashClient {
    fn chip(&self) -> String {
        self.chip.clone()
    }

    fn write_flash(
        &mut self,
        data: &[u8],
        params: &FlashParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), Error> {
        // The stub loader always deflates flash writes
        if !params.compress {
            return Err(Error::FlashWriteFailure(
                "uncompressed writes are not supported".into(),
            ));
        }

        let flash_size = flash_size(params.flash_size_mb)?;
        let flasher = self.flasher()?;
        flasher.set_flash_size(flash_size);

        if params.erase_all {
            debug!("Erasing the entire flash");
            flasher
                .erase_flash()
                .map_err(|err| Error::FlashWriteFailure(err.to_string()))?;
        }

        let mut callbacks = FlashProgress::new(progress);
        flasher
            .write_bin_to_flash(params.address, data, Some(&mut callbacks))
            .map_err(|err| Error::FlashWriteFailure(err.to_string()))
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.flasher()?
            .connection()
            .reset()
            .map_err(|err| Error::FlashWriteFailure(err.to_string()))
    }

    fn close(&mut self) {
        self.flasher.take();
    }
}

fn flash_size(megabytes: u32) -> Result<FlashSize, Error> {
    let size = match megabytes {
        1 => FlashSize::_1Mb,
        2 => FlashSize::_2Mb,
        4 => FlashSize::_4Mb,
        8 => FlashSize::_8Mb,
        16 => FlashSize::_16Mb,
        32 => FlashSize::_32Mb,
        _ => {
            return Err(Error::FlashWriteFailure(format!(
                "unsupported flash size: {megabytes}MB"
            )))
        }
    };

    Ok(size)
}

/// Forwards espflash progress callbacks to a [ProgressSink]
///
/// espflash reports progress in blocks rather than bytes; the ratio is what
/// matters to the sink.
struct FlashProgress<'a> {
    sink: &'a mut dyn ProgressSink,
    total: u64,
}

impl<'a> FlashProgress<'a> {
    fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, total: 0 }
    }
}

impl ProgressCallbacks for FlashProgress<'_> {
    fn init(&mut self, addr: u32, total: usize) {
        debug!("Writing {total} blocks at {addr:#x}");
        self.total = total as u64;
        self.sink.on_progress(0, self.total);
    }

    fn update(&mut self, current: usize) {
        self.sink.on_progress(current as u64, self.total);
    }

    fn finish(&mut self) {
        self.sink.on_progress(self.total, self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_match_the_supported_boards() {
        let params = FlashParams::default();

        assert_eq!(params.flash_size_mb, 4);
        assert!(params.erase_all);
        assert!(params.compress);
        assert_eq!(params.address, 0);
        assert!(matches!(flash_size(params.flash_size_mb), Ok(FlashSize::_4Mb)));
    }

    #[test]
    fn unknown_flash_sizes_are_rejected() {
        assert!(matches!(flash_size(3), Err(Error::FlashWriteFailure(_))));
    }

    #[test]
    fn flash_progress_is_forwarded() {
        let mut calls = Vec::new();
        {
            let mut progress = FlashProgress::new(&mut calls);
            progress.init(0, 4);
            progress.update(1);
            progress.update(4);
            progress.finish();
        }

        assert_eq!(calls, [(0, 4), (1, 4), (4, 4), (4, 4)]);
    }
}
