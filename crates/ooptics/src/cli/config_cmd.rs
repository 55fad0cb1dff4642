//! `config` subcommand: show current configuration and file paths, optionally saving it.

use ooptics_lib::OpticsError;

use super::{Config, ConfigOutput, Context, Result, kv, kv_indent, kv_width, models, print_json};

pub(super) fn cmd_config(ctx: &Context, save: bool) -> Result<()> {
    let config = &ctx.config;
    let config_path = ctx.config_path.clone().or_else(Config::path);
    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if save {
        if !problems.is_empty() {
            return Err(OpticsError::Config(format!(
                "refusing to save invalid settings: {}",
                problems.join("; ")
            )));
        }
        match &ctx.config_path {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        if let Some(p) = &config_path {
            log::info!("saved config to {}", p.display());
        }
    }
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());

    if ctx.json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config.clone(),
            problems,
        });
    }

    let w = kv_width(
        &["Config file:"],
        &["resource:", "model:", "timeout_ms:", "integration_time_ms:"],
    );

    match &config_path {
        Some(p) => {
            if config_exists {
                kv("Config file:", format_args!("{} (loaded)", p.display()), w);
            } else {
                kv(
                    "Config file:",
                    format_args!("{} (not found, using defaults)", p.display()),
                    w,
                );
            }
        }
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    if config.resource.is_empty() {
        kv_indent("resource:", "(first detected device)", w);
    } else {
        kv_indent("resource:", &config.resource, w);
    }
    match config.model {
        Some(code) => match models::resolve(code) {
            Ok(m) => kv_indent("model:", format_args!("{code} ({})", m.name), w),
            Err(_) => kv_indent("model:", format_args!("{code} (unknown)"), w),
        },
        None => kv_indent("model:", "(autodetect)", w),
    }
    kv_indent("timeout_ms:", config.timeout_ms, w);
    match config.integration_time_ms {
        Some(ms) => kv_indent("integration_time_ms:", ms, w),
        None => kv_indent("integration_time_ms:", "(device default)", w),
    }

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  - {p}");
        }
    }
    Ok(())
}
