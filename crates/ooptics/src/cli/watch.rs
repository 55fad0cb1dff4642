//! `watch` subcommand: continuous acquisition with one summary line per spectrum.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{Context, RUNNING, Result, WatchLine, open_session};

pub(super) fn cmd_watch(ctx: &Context, interval_ms: u64, count: Option<u64>) -> Result<()> {
    let mut session = open_session(ctx)?;
    let interval = Duration::from_millis(interval_ms);

    if !ctx.json {
        println!(
            "Watching {} at {} (Ctrl+C to stop)",
            session.model().name,
            session.resource()
        );
        println!("{:>6}  {:>12}  {:>12}  {:>12}", "#", "min", "max", "mean");
    }

    let mut index = 0u64;
    while RUNNING.load(Ordering::SeqCst) && count.is_none_or(|n| index < n) {
        let spectrum = session.read_spectrum()?;
        let (min, max, mean) = spectrum.summary().unwrap_or((0.0, 0.0, 0.0));
        let line = WatchLine {
            index,
            samples: spectrum.len(),
            min,
            max,
            mean,
        };
        if ctx.json {
            // One object per line
            let text = serde_json::to_string(&line).map_err(std::io::Error::from)?;
            println!("{text}");
        } else {
            println!(
                "{:>6}  {:>12.1}  {:>12.1}  {:>12.1}",
                line.index, line.min, line.max, line.mean
            );
        }
        index += 1;
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    session.close()?;
    log::info!("watch stopped after {index} spectra");
    Ok(())
}
