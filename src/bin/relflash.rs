use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use dialoguer::{theme::ColorfulTheme, Input, Select};
use log::{debug, info, warn, LevelFilter};
use miette::{IntoDiagnostic, Result, WrapErr};
use relflash::{
    firmware::{http_client, load_local, sha256_hex, ReleaseSource},
    loader::SerialConnector,
    log_panel::LogPanel,
    logging::initialize_logger,
    merge::{merge_images, parse_part, PartSpec},
    serial::{detect_usb_serial_ports, summarize_ports, ConnectArgs},
    Config,
    Workflow,
};

#[derive(Debug, Parser)]
#[command(about, propagate_version = true, version)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect to a device, download the latest firmware and flash it
    Flash(FlashArgs),
    /// Connect, download and flash step by step
    Interactive(InteractiveArgs),
    /// Download the latest firmware to a file without flashing it
    Download(DownloadArgs),
    /// List the detected serial ports
    ListPorts(ListPortsArgs),
    /// Merge images into a single image to be flashed at address 0
    Merge(MergeArgs),
    /// Generate completions for the given shell
    Completions(CompletionsArgs),
}

/// Overrides of the configured release source
#[derive(Debug, Args)]
struct ReleaseArgs {
    /// Owner of the GitHub repository publishing the firmware
    #[arg(long)]
    owner: Option<String>,
    /// Name of the GitHub repository publishing the firmware
    #[arg(long)]
    repo: Option<String>,
    /// Name of the release asset to flash, the first asset by default
    #[arg(long)]
    asset: Option<String>,
}

impl ReleaseArgs {
    fn apply(self, mut source: ReleaseSource) -> ReleaseSource {
        if let Some(owner) = self.owner {
            source.owner = owner;
        }
        if let Some(repo) = self.repo {
            source.repo = repo;
        }
        if self.asset.is_some() {
            source.asset = self.asset;
        }

        source
    }
}

#[derive(Debug, Args)]
struct FlashArgs {
    /// Flash this local .bin file instead of the latest release
    #[arg(long)]
    firmware: Option<PathBuf>,

    #[command(flatten)]
    connect_args: ConnectArgs,
    #[command(flatten)]
    release_args: ReleaseArgs,
}

#[derive(Debug, Args)]
struct InteractiveArgs {
    #[command(flatten)]
    connect_args: ConnectArgs,
    #[command(flatten)]
    release_args: ReleaseArgs,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// File to save the firmware to, the asset's name by default
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    release_args: ReleaseArgs,
}

#[derive(Debug, Args)]
struct ListPortsArgs {
    /// List every detected USB serial port, not only supported bridges
    #[arg(long)]
    list_all_ports: bool,
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// File to write the merged image to
    #[arg(short = 'o', long)]
    output: PathBuf,
    /// Images to merge, as ADDR=FILE (for example 0x10000=app.bin)
    #[arg(required = true, value_parser = parse_part)]
    parts: Vec<PartSpec>,
}

#[derive(Debug, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
}

/// Actions offered by the interactive mode
#[derive(Debug, Clone, Copy)]
enum Action {
    Connect,
    Download,
    Flash,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Connect => "Connect device",
            Action::Download => "Download latest firmware",
            Action::Flash => "Flash firmware file",
            Action::Quit => "Quit",
        })
    }
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse().subcommand;
    debug!("{:#?}", args);

    // Load any user configuration, if present.
    let config = Config::load()?;

    // Execute the correct action based on the provided subcommand and its
    // associated arguments.
    match args {
        Commands::Flash(args) => flash(args, config),
        Commands::Interactive(args) => interactive(args, config),
        Commands::Download(args) => download(args, config),
        Commands::ListPorts(args) => list_ports(args, &config),
        Commands::Merge(args) => merge(args),
        Commands::Completions(args) => completions(args),
    }
}

fn flash(args: FlashArgs, config: Config) -> Result<()> {
    let source = args.release_args.apply(config.release.clone());
    let connector = SerialConnector::new(args.connect_args, config);
    let mut workflow = Workflow::new(connector, LogPanel::stdout());

    match args.firmware {
        Some(path) => {
            let firmware = load_local(&path)
                .wrap_err_with(|| format!("Failed to open firmware {}", path.display()))?;
            info!(
                "Loaded {} bytes, SHA-256 {}",
                firmware.len(),
                sha256_hex(&firmware)
            );

            workflow.run_with_firmware(&firmware)?;
        }
        None => {
            let client = http_client()?;
            workflow.run_all(&client, &source)?;
        }
    }

    Ok(())
}

fn interactive(args: InteractiveArgs, config: Config) -> Result<()> {
    let source = args.release_args.apply(config.release.clone());
    let client = http_client()?;
    let connector = SerialConnector::new(args.connect_args, config);
    let mut workflow = Workflow::new(connector, LogPanel::stdout());

    let theme = ColorfulTheme::default();
    let mut downloaded: Option<PathBuf> = None;

    loop {
        let controls = workflow.controls();
        let actions = [
            (Action::Connect, controls.connect),
            (Action::Download, controls.download),
            (Action::Flash, controls.flash),
            (Action::Quit, true),
        ]
        .into_iter()
        .filter_map(|(action, enabled)| enabled.then_some(action))
        .collect::<Vec<_>>();

        println!();
        let selection = Select::with_theme(&theme)
            .with_prompt("Action")
            .items(&actions)
            .default(0)
            .interact_opt()
            .into_diagnostic()?;

        let Some(action) = selection.and_then(|index| actions.get(index).copied()) else {
            break;
        };

        // Failures have been reported to the log panel, the menu is offered
        // again so the action can be retried.
        match action {
            Action::Connect => {
                if let Err(err) = workflow.connect() {
                    debug!("Connecting failed: {err}");
                }
            }
            Action::Download => {
                if let Ok(path) = workflow.save_latest(&client, &source, None) {
                    downloaded = Some(path);
                }
            }
            Action::Flash => {
                let path = prompt_firmware_path(&theme, downloaded.as_deref())?;
                let result = load_local(&path)
                    .map_err(|err| workflow.report_error(err))
                    .and_then(|firmware| workflow.flash(&firmware));
                if let Err(err) = result {
                    debug!("Flashing failed: {err}");
                }
            }
            Action::Quit => break,
        }
    }

    Ok(())
}

fn prompt_firmware_path(theme: &ColorfulTheme, default: Option<&Path>) -> Result<PathBuf> {
    let mut input = Input::<String>::with_theme(theme).with_prompt("Firmware file (.bin)");
    if let Some(path) = default {
        input = input.default(path.display().to_string());
    }

    let path = input.interact_text().into_diagnostic()?;

    Ok(PathBuf::from(path))
}

fn download(args: DownloadArgs, config: Config) -> Result<()> {
    let source = args.release_args.apply(config.release.clone());
    let client = http_client()?;

    // Downloading never connects to a device.
    let connector = SerialConnector::new(ConnectArgs::default(), config);
    let mut workflow = Workflow::new(connector, LogPanel::stdout());
    workflow.save_latest(&client, &source, args.output.as_deref())?;

    Ok(())
}

fn list_ports(args: ListPortsArgs, config: &Config) -> Result<()> {
    let ports = detect_usb_serial_ports()?;
    let summaries = summarize_ports(&ports, &config.usb_device)
        .into_iter()
        .filter(|summary| args.list_all_ports || summary.supported)
        .collect::<Vec<_>>();

    if summaries.is_empty() {
        println!("No supported serial ports detected");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Port").add_attribute(Attribute::Bold),
            Cell::new("VID:PID").add_attribute(Attribute::Bold),
            Cell::new("Product").add_attribute(Attribute::Bold),
            Cell::new("Supported").add_attribute(Attribute::Bold),
        ]);

    for summary in summaries {
        let (supported, color) = if summary.supported {
            ("yes", Color::Green)
        } else {
            ("no", Color::Red)
        };

        table.add_row(vec![
            Cell::new(&summary.name),
            Cell::new(
                summary
                    .device
                    .map(|device| format!("{:04x}:{:04x}", device.vid, device.pid))
                    .unwrap_or_default(),
            ),
            Cell::new(summary.product.unwrap_or_default()),
            Cell::new(supported).fg(color),
        ]);
    }
    println!("{table}");

    Ok(())
}

fn merge(args: MergeArgs) -> Result<()> {
    let mut parts = Vec::new();

    for part in args.parts {
        // Optional images such as NVS or PHY init data may not have been built
        if !part.path.exists() {
            warn!(
                "File does not exist: {} (address {:#x}), skipping",
                part.path.display(),
                part.addr
            );
            continue;
        }

        let data = fs::read(&part.path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to open image {}", part.path.display()))?;
        info!("{:#08x}  {}", part.addr, part.path.display());

        parts.push((part.addr, data));
    }

    let merged = merge_images(&parts)?;
    fs::write(&args.output, &merged)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to write {}", args.output.display()))?;

    info!(
        "Merged image written to {} ({} bytes)",
        args.output.display(),
        merged.len()
    );

    Ok(())
}

fn completions(args: CompletionsArgs) -> Result<()> {
    clap_complete::generate(args.shell, &mut Cli::command(), "relflash", &mut io::stdout());

    Ok(())
}
