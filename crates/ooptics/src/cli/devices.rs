//! `devices` subcommand: list connected Ocean Optics devices.

use super::{DeviceJson, DevicesOutput, Result, models, print_json, transport};

pub(super) fn cmd_devices(json: bool) -> Result<()> {
    let devices: Vec<DeviceJson> = transport::enumerate_devices()
        .into_iter()
        .map(|device| DeviceJson {
            model: models::resolve(device.model_code).ok().map(|m| m.name),
            device,
        })
        .collect();

    if json {
        return print_json(&DevicesOutput {
            count: devices.len(),
            devices,
        });
    }

    if devices.is_empty() {
        println!("No Ocean Optics devices found.");
        return Ok(());
    }

    println!(
        "Found {} Ocean Optics device{}:",
        devices.len(),
        if devices.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, dev) in devices.iter().enumerate() {
        println!("  [{}] {}", i + 1, dev.device.resource);
        match dev.model {
            Some(name) => println!("      Model:  {name} ({})", dev.device.model_code),
            None => println!(
                "      Model:  unsupported (code {})",
                dev.device.model_code
            ),
        }
        if let Some(ref serial) = dev.device.serial {
            println!("      Serial: {serial}");
        }
    }

    Ok(())
}
