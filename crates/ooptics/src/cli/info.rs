//! `info` subcommand: identity and wavelength calibration of one device.

use super::{Context, InfoOutput, Result, kv, kv_indent, kv_width, open_session, print_json};

pub(super) fn cmd_info(ctx: &Context) -> Result<()> {
    let mut session = open_session(ctx)?;
    let model = session.model();

    let serial = session.serial_number()?;
    let coefficients = session.calibration_coefficients()?;
    let pixel_count = session.pixel_count()?;
    let wavelengths = ooptics_lib::calibration::wavelengths(usize::from(pixel_count), &coefficients);
    let wavelength_range = match (wavelengths.first(), wavelengths.last()) {
        (Some(&first), Some(&last)) => Some([first, last]),
        _ => None,
    };
    let resource = session.resource().to_string();
    session.close()?;

    if ctx.json {
        return print_json(&InfoOutput {
            resource,
            model: model.name.to_string(),
            model_code: model.code,
            family: model.family.to_string(),
            serial,
            pixel_count,
            coefficients,
            wavelength_range,
        });
    }

    let w = kv_width(
        &["Resource:", "Model:", "Serial:", "Pixels:", "Wavelengths:", "Calibration:"],
        &["a:", "b:", "c:", "d:"],
    );
    kv("Resource:", &resource, w);
    kv(
        "Model:",
        format_args!("{} ({}, {} family)", model.name, model.code, model.family),
        w,
    );
    kv("Serial:", &serial, w);
    kv("Pixels:", pixel_count, w);
    match wavelength_range {
        Some([first, last]) => kv("Wavelengths:", format_args!("{first:.2} – {last:.2} nm"), w),
        None => kv("Wavelengths:", "n/a", w),
    }
    println!("Calibration:");
    kv_indent("a:", coefficients.a, w);
    kv_indent("b:", coefficients.b, w);
    kv_indent("c:", coefficients.c, w);
    kv_indent("d:", coefficients.d, w);
    Ok(())
}
