//! Connect, download and flash workflow
//!
//! A [Workflow] sequences the stages of flashing a device: connecting to its
//! bootloader, retrieving firmware and writing it. Every stage reports its
//! status to a [LogSink]. Failures are logged at the stage boundary and leave
//! the workflow in a state from which the stage can be retried.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──▶ Connected ──flash──▶ Flashing ──▶ Done
//!   ▲                   │            ▲                     │
//!   └──── failure ──────┘            └────── failure ──────┘
//! ```

use std::path::{Path, PathBuf};

use crossterm::style::Stylize;
use log::{debug, info};
use reqwest::blocking::Client;

use crate::{
    error::Error,
    firmware::{self, ReleaseSource},
    loader::{Connector, FlashParams, Session},
    log_panel::{LogContent, LogSink},
    logging::capture_loader_output,
    progress::PercentLogger,
};

/// Stage of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Connected,
    Flashing,
    Done,
}

/// Actions available to the user in a given [State]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub connect: bool,
    pub download: bool,
    pub flash: bool,
}

impl State {
    pub fn controls(self) -> Controls {
        match self {
            State::Idle | State::Done => Controls {
                connect: true,
                download: true,
                flash: false,
            },
            State::Connected => Controls {
                connect: true,
                download: true,
                flash: true,
            },
            State::Connecting | State::Flashing => Controls {
                connect: false,
                download: false,
                flash: false,
            },
        }
    }
}

pub struct Workflow<C: Connector, L: LogSink> {
    connector: C,
    log: L,
    session: Option<Session>,
    state: State,
}

impl<C: Connector, L: LogSink> Workflow<C, L> {
    pub fn new(connector: C, log: L) -> Self {
        Self {
            connector,
            log,
            session: None,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn controls(&self) -> Controls {
        self.state.controls()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Connect to a device, replacing any current session
    ///
    /// Nothing happens while another action is in progress.
    pub fn connect(&mut self) -> Result<(), Error> {
        if !self.controls().connect {
            debug!("Ignoring connect while {:?}", self.state);
            return Ok(());
        }

        if let Some(previous) = self.session.take() {
            previous.close();
        }

        self.state = State::Connecting;
        self.log.clear();

        match self.connector.connect(&mut self.log) {
            Ok(session) => {
                debug!("Connected to {} on {}", session.chip(), session.port());
                self.session = Some(session);
                self.state = State::Connected;
                self.success("Connected successfully");

                Ok(())
            }
            Err(err) => {
                self.state = State::Idle;
                Err(self.report_error(err))
            }
        }
    }

    /// Resolve and download the firmware of the latest release
    pub fn download_latest(
        &mut self,
        client: &Client,
        source: &ReleaseSource,
    ) -> Result<Vec<u8>, Error> {
        let result = self.try_download_latest(client, source);
        result.map(|(_, firmware)| firmware).map_err(|err| self.report_error(err))
    }

    /// Download the firmware of the latest release and save it to `output`,
    /// or to the asset's file name in the current directory
    pub fn save_latest(
        &mut self,
        client: &Client,
        source: &ReleaseSource,
        output: Option<&Path>,
    ) -> Result<PathBuf, Error> {
        let result = self
            .try_download_latest(client, source)
            .and_then(|(file_name, firmware)| {
                let path = output.map_or_else(|| PathBuf::from(file_name), Path::to_path_buf);
                firmware::save_firmware(&firmware, &path)
            });

        match result {
            Ok(path) => {
                self.success(&format!("Firmware saved to {}", path.display()));
                Ok(path)
            }
            Err(err) => Err(self.report_error(err)),
        }
    }

    fn try_download_latest(
        &mut self,
        client: &Client,
        source: &ReleaseSource,
    ) -> Result<(String, Vec<u8>), Error> {
        self.log
            .append_line("Fetching firmware address from GitHub...".into());
        let asset = firmware::resolve_latest_firmware(client, source)?;
        self.log.append_line("Firmware address resolved".into());

        self.log.append_line("Downloading firmware...".into());
        let mut progress = PercentLogger::new(&mut self.log, "Download progress");
        let firmware =
            firmware::download_with_progress(client, &asset.browser_download_url, &mut progress)?;
        info!(
            "Downloaded {} bytes, SHA-256 {}",
            firmware.len(),
            firmware::sha256_hex(&firmware)
        );

        Ok((asset.file_name(), firmware))
    }

    /// Write firmware to the connected device and reboot it
    pub fn flash(&mut self, firmware: &[u8]) -> Result<(), Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.report_error(Error::NotConnected));
        };

        self.state = State::Flashing;
        self.log.append_line("Flashing firmware...".into());

        let (result, output) = capture_loader_output(|| {
            let mut progress = PercentLogger::new(&mut self.log, "Flash progress");
            let client = session.client();
            client
                .write_flash(firmware, &FlashParams::default(), &mut progress)
                .and_then(|_| client.finish())
        });
        output.replay(&mut self.log);

        match result {
            Ok(()) => {
                if let Some(session) = self.session.take() {
                    session.close();
                }
                self.state = State::Done;
                self.success("Flashing completed, device rebooted");
                self.log
                    .append_line("Continue with Wi-Fi provisioning on the device".into());

                Ok(())
            }
            Err(err) => {
                self.state = State::Connected;
                Err(self.report_error(err))
            }
        }
    }

    /// Connect, download the latest firmware and flash it
    pub fn run_all(&mut self, client: &Client, source: &ReleaseSource) -> Result<(), Error> {
        self.connect()?;
        let firmware = self.download_latest(client, source)?;
        self.flash(&firmware)
    }

    /// Connect and flash the given firmware
    pub fn run_with_firmware(&mut self, firmware: &[u8]) -> Result<(), Error> {
        self.connect()?;
        self.flash(firmware)
    }

    fn success(&mut self, message: &str) {
        self.log
            .append_line(LogContent::Rich(message.to_string().green()));
    }

    /// Log an error with the failure marker and hand it back
    pub fn report_error(&mut self, err: Error) -> Error {
        self.log
            .append_line(LogContent::Rich(format!("❌ Error: {err}").red()));
        err
    }
}
