//! CLI subcommands: device listing, identity, status, acquisition.

mod config_cmd;
mod devices;
mod info;
mod models_cmd;
mod spectrum_cmd;
mod status;
mod watch;

use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use ooptics_lib::config::Config;
pub(super) use ooptics_lib::device::Spectrometer;
pub(super) use ooptics_lib::eeprom::CalibrationCoefficients;
pub(super) use ooptics_lib::error::Result;
pub(super) use ooptics_lib::models;
pub(super) use ooptics_lib::transport::{self, DiscoveredDevice, PlatformConnector};
use ooptics_lib::OpticsError;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{text}");
    Ok(())
}

/// Optional reading, rendered as "n/a" when the family doesn't report it.
pub(super) fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DeviceJson>,
}

#[derive(Serialize)]
pub(super) struct DeviceJson {
    #[serde(flatten)]
    pub device: DiscoveredDevice,
    /// Registered model name, if the code is known.
    pub model: Option<&'static str>,
}

#[derive(Serialize)]
pub(super) struct ModelJson {
    pub code: u16,
    pub name: &'static str,
    pub family: String,
    pub min_integration_time_us: u64,
    pub max_counts: u32,
}

#[derive(Serialize)]
pub(super) struct InfoOutput {
    pub resource: String,
    pub model: String,
    pub model_code: u16,
    pub family: String,
    pub serial: String,
    pub pixel_count: u16,
    pub coefficients: CalibrationCoefficients,
    pub wavelength_range: Option<[f64; 2]>,
}

#[derive(Serialize)]
pub(super) struct StatusOutput {
    pub model: String,
    pub pixel_count: u16,
    pub integration_time_us: Option<u64>,
    pub lamp_enabled: Option<bool>,
    pub trigger_mode: Option<u8>,
    pub request_in_progress: Option<bool>,
    pub timer_mode: Option<u8>,
    pub data_ready: bool,
    pub packets_in_spectrum: Option<u8>,
    pub power_on_status: Option<u8>,
    pub packet_count: Option<u8>,
    pub usb_speed: Option<String>,
    /// Raw 17-byte register, hex encoded.
    pub raw: String,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct WatchLine {
    pub index: u64,
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

// ── Shared context ──

/// Global options plus the effective configuration.
pub struct Context {
    pub json: bool,
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl Context {
    /// Load config and apply command-line overrides.
    pub fn new(
        json: bool,
        config_path: Option<PathBuf>,
        resource: Option<String>,
        model: Option<&str>,
    ) -> Result<Self> {
        let mut config = load_config(config_path.as_deref());
        if let Some(resource) = resource {
            config.resource = resource;
        }
        if let Some(model) = model {
            config.model = Some(models::parse_model(model)?.code);
        }
        Ok(Context {
            json,
            config_path,
            config,
        })
    }
}

/// Load config from `custom_path` or the default location, logging parse warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

/// Resolve the resource, probe, open, and apply the configured integration time.
pub(super) fn open_session(ctx: &Context) -> Result<Spectrometer> {
    let config = &ctx.config;
    if let Err(problems) = config.validate() {
        let joined: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
        return Err(OpticsError::Config(joined.join("; ")));
    }

    let resource = if config.resource.trim().is_empty() {
        transport::first_resource()?
    } else {
        config.resource.trim().to_string()
    };
    log::debug!("using resource {resource}");

    let connector = PlatformConnector::default();
    let mut session = match config.model {
        Some(code) => Spectrometer::new(connector, resource, code, config.timeout())?,
        None => Spectrometer::autodetect(connector, resource, config.timeout())?,
    };
    session.open()?;
    if let Some(it) = config.integration_time() {
        session.set_integration_time(it)?;
    }
    Ok(session)
}

#[derive(Subcommand)]
pub enum Command {
    /// List connected Ocean Optics devices
    Devices,

    /// List supported spectrometer models
    Models,

    /// Show serial number, pixel count and wavelength calibration
    Info,

    /// Read the device status register
    Status,

    /// Acquire one spectrum and print it as CSV (or JSON with --json)
    Spectrum {
        /// Integration time in milliseconds for this acquisition
        #[arg(long, value_name = "MS")]
        integration_time_ms: Option<f64>,
        /// Print pixel index instead of wavelength
        #[arg(long)]
        raw: bool,
    },

    /// Acquire continuously, printing one summary line per spectrum (Ctrl+C to stop)
    Watch {
        /// Delay between acquisitions in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop after this many spectra
        #[arg(long)]
        count: Option<u64>,
    },

    /// Show current configuration and file paths
    Config {
        /// Write the effective settings (file plus overrides) back to the config file
        #[arg(long)]
        save: bool,
    },
}

pub fn run(cmd: Command, ctx: &Context) -> Result<()> {
    match cmd {
        Command::Devices => devices::cmd_devices(ctx.json),
        Command::Models => models_cmd::cmd_models(ctx.json),
        Command::Info => info::cmd_info(ctx),
        Command::Status => status::cmd_status(ctx),
        Command::Spectrum {
            integration_time_ms,
            raw,
        } => spectrum_cmd::cmd_spectrum(ctx, integration_time_ms, raw),
        Command::Watch { interval_ms, count } => watch::cmd_watch(ctx, interval_ms, count),
        Command::Config { save } => config_cmd::cmd_config(ctx, save),
    }
}
