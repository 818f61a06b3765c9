//! Flash the latest released firmware onto Espressif devices
//!
//! `relflash` finds a device attached through a supported USB serial bridge,
//! connects to its ROM bootloader, downloads the firmware published with the
//! latest GitHub release of a project and writes it to the device, reporting
//! every step in a log panel.
//!
//! The bootloader protocol is provided by the [espflash] crate.

pub mod config;
pub mod devices;
pub mod error;
pub mod firmware;
pub mod loader;
pub mod log_panel;
pub mod logging;
pub mod merge;
pub mod progress;
pub mod serial;
pub mod workflow;

pub use config::Config;
pub use error::Error;
pub use workflow::Workflow;
