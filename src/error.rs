//! Library and application errors

use std::io;

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by relflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("No supported serial device is available")]
    #[diagnostic(
        code(relflash::no_port_available),
        help("Connect a board with a supported USB serial bridge, or use `--list-all-ports` to choose from every detected port")
    )]
    NoPortAvailable,

    #[error("The serial port '{0}' could not be found")]
    #[diagnostic(
        code(relflash::serial_not_found),
        help("Make sure the correct device is connected to the host system")
    )]
    SerialNotFound(String),

    #[error("Failed to connect to the device: {0}")]
    #[diagnostic(
        code(relflash::handshake_failure),
        help("Hold the BOOT button while connecting, or hard-reset the device and try again")
    )]
    HandshakeFailure(String),

    #[error("Failed to fetch release metadata: {0}")]
    #[diagnostic(code(relflash::metadata_fetch))]
    MetadataFetch(String),

    #[error("The latest release does not contain a firmware asset")]
    #[diagnostic(
        code(relflash::no_firmware_asset),
        help("Check the release page, or set `asset` under [release] to the expected file name")
    )]
    NoFirmwareAsset,

    #[error("Failed to download firmware: {0}")]
    #[diagnostic(code(relflash::download))]
    Download(String),

    #[error("Firmware download is incomplete, expected {expected} bytes but received {received} bytes")]
    #[diagnostic(code(relflash::content_length_mismatch))]
    ContentLengthMismatch { expected: u64, received: u64 },

    #[error("please connect the device first")]
    #[diagnostic(code(relflash::not_connected))]
    NotConnected,

    #[error("Failed to write firmware: {0}")]
    #[diagnostic(code(relflash::flash_write_failure))]
    FlashWriteFailure(String),

    #[error("Specified firmware path is not a .bin file")]
    #[diagnostic(code(relflash::invalid_firmware_path))]
    InvalidFirmwarePath,

    #[error("No images were provided to merge")]
    #[diagnostic(code(relflash::nothing_to_merge))]
    NothingToMerge,

    #[error("Image at {addr:#x} overlaps the previous image")]
    #[diagnostic(
        code(relflash::overlapping_images),
        help("Check the offsets of the images being merged")
    )]
    OverlappingImages { addr: u32 },

    #[error("Image at {addr:#x} does not fit in a 16MB flash")]
    #[diagnostic(
        code(relflash::image_out_of_range),
        help("Check the offsets of the images being merged")
    )]
    ImageOutOfRange { addr: u32 },

    #[error("Invalid image specification '{0}'")]
    #[diagnostic(
        code(relflash::invalid_part_spec),
        help("Images are specified as ADDR=FILE, for example 0x10000=app.bin")
    )]
    InvalidPartSpec(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(relflash::misplaced_key))]
    MisplacedKey(String),

    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(relflash::serial_error))]
    Serial(#[source] serialport::Error),

    #[error(transparent)]
    #[diagnostic(code(relflash::io))]
    Io(#[from] io::Error),

    #[error(transparent)]
    #[diagnostic(code(relflash::dialoguer_error))]
    DialoguerError(#[from] dialoguer::Error),
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Serial(err)
    }
}

#[cfg(test)]
mod tests {
    use miette::Diagnostic;

    use super::*;

    #[test]
    fn prompt_failures_keep_their_own_code() {
        let err = Error::from(dialoguer::Error::IO(io::Error::new(
            io::ErrorKind::Interrupted,
            "prompt cancelled",
        )));

        assert!(matches!(err, Error::DialoguerError(_)));
        assert_eq!(
            err.code().map(|code| code.to_string()).as_deref(),
            Some("relflash::dialoguer_error")
        );
    }

    #[test]
    fn io_failures_are_not_reported_as_prompt_failures() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "missing"));

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(
            err.code().map(|code| code.to_string()).as_deref(),
            Some("relflash::io")
        );
    }
}
