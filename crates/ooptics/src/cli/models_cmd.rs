//! `models` subcommand: list the model registry.

use super::{ModelJson, Result, models, print_json};

pub(super) fn cmd_models(json: bool) -> Result<()> {
    let rows: Vec<ModelJson> = models::all()
        .iter()
        .map(|m| ModelJson {
            code: m.code,
            name: m.name,
            family: m.family.to_string(),
            min_integration_time_us: m.min_integration_time.as_micros() as u64,
            max_counts: m.max_counts,
        })
        .collect();

    if json {
        return print_json(&rows);
    }

    println!(
        "{:<6}  {:<8}  {:<12}  {:<8}  {:>13}  {:>10}",
        "Code", "Hex", "Model", "Family", "Min int. time", "Max counts"
    );
    for row in &rows {
        let min_time = if row.min_integration_time_us >= 1000 {
            format!("{} ms", row.min_integration_time_us / 1000)
        } else {
            format!("{} µs", row.min_integration_time_us)
        };
        println!(
            "{:<6}  0x{:04X}    {:<12}  {:<8}  {:>13}  {:>10}",
            row.code, row.code, row.name, row.family, min_time, row.max_counts
        );
    }
    Ok(())
}
