//! `spectrum` subcommand: acquire one spectrum and print it.

use std::time::Duration;

use ooptics_lib::OpticsError;
use ooptics_lib::calibration::CalibratedSpectrum;
use ooptics_lib::config::duration_from_ms;

use super::{Context, Result, open_session, print_json};

/// Convert a millisecond option to a `Duration`, rejecting non-positive values.
pub(super) fn integration_time_from_ms(ms: f64) -> Result<Duration> {
    duration_from_ms(ms).ok_or_else(|| {
        OpticsError::Config(format!(
            "integration time must be a positive number of milliseconds, got {ms}"
        ))
    })
}

pub(super) fn cmd_spectrum(ctx: &Context, integration_time_ms: Option<f64>, raw: bool) -> Result<()> {
    let integration_time = integration_time_ms.map(integration_time_from_ms).transpose()?;

    let mut session = open_session(ctx)?;
    if let Some(it) = integration_time {
        session.set_integration_time(it)?;
    }

    if raw {
        let spectrum = session.read_spectrum()?;
        session.close()?;
        if ctx.json {
            return print_json(&spectrum);
        }
        println!("pixel,intensity");
        for (i, value) in spectrum.to_f64().iter().enumerate() {
            println!("{i},{value}");
        }
        return Ok(());
    }

    let calibrated: CalibratedSpectrum = session.read_calibrated_spectrum()?;
    session.close()?;
    if ctx.json {
        return print_json(&calibrated);
    }
    println!("wavelength_nm,intensity");
    for point in &calibrated.points {
        println!("{:.4},{}", point.wavelength, point.intensity);
    }
    Ok(())
}
