//! `status` subcommand: decode the device status register.

use super::{Context, Result, StatusOutput, kv, kv_width, open_session, or_na, print_json};

pub(super) fn cmd_status(ctx: &Context) -> Result<()> {
    let mut session = open_session(ctx)?;
    let model = session.model();
    let status = session.query_status()?;
    session.close()?;

    let raw: String = status.raw().iter().map(|b| format!("{b:02x}")).collect();
    let output = StatusOutput {
        model: model.name.to_string(),
        pixel_count: status.pixel_count(),
        integration_time_us: status.integration_time().map(|d| d.as_micros() as u64),
        lamp_enabled: status.lamp_enabled(),
        trigger_mode: status.trigger_mode(),
        request_in_progress: status.request_in_progress(),
        timer_mode: status.timer_mode(),
        data_ready: status.data_ready(),
        packets_in_spectrum: status.packets_in_spectrum(),
        power_on_status: status.power_on_status(),
        packet_count: status.packet_count(),
        usb_speed: status.usb_speed().map(|s| s.to_string()),
        raw,
    };

    if ctx.json {
        return print_json(&output);
    }

    let w = kv_width(
        &[
            "Model:",
            "Pixels:",
            "Integration time:",
            "Lamp:",
            "Trigger mode:",
            "Request in progress:",
            "Timer mode:",
            "Data ready:",
            "Packets/spectrum:",
            "Power-on status:",
            "Packet count:",
            "USB speed:",
            "Raw:",
        ],
        &[],
    );
    kv("Model:", &output.model, w);
    kv("Pixels:", output.pixel_count, w);
    kv(
        "Integration time:",
        or_na(output.integration_time_us.map(|us| format!("{us} µs"))),
        w,
    );
    kv(
        "Lamp:",
        or_na(output.lamp_enabled.map(|on| if on { "on" } else { "off" })),
        w,
    );
    kv("Trigger mode:", or_na(output.trigger_mode), w);
    if model.family == ooptics_lib::models::Family::TwoK {
        kv("Request in progress:", or_na(output.request_in_progress), w);
        kv("Timer mode:", or_na(output.timer_mode), w);
    }
    kv("Data ready:", output.data_ready, w);
    if model.family == ooptics_lib::models::Family::FourK {
        kv("Packets/spectrum:", or_na(output.packets_in_spectrum), w);
        kv("Power-on status:", or_na(output.power_on_status), w);
        kv("Packet count:", or_na(output.packet_count), w);
        kv("USB speed:", or_na(output.usb_speed.as_deref()), w);
    }
    kv("Raw:", &output.raw, w);
    Ok(())
}
