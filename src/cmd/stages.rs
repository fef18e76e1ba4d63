//! Stage registry listing (`research-tracker stages`).

use anyhow::{Context, Result};
use console::style;

use research_tracker::stage;

pub fn cmd_stages(json: bool) -> Result<()> {
    let stages = stage::registry().all();

    if json {
        let out = serde_json::to_string_pretty(stages).context("Failed to serialize stages")?;
        println!("{}", out);
        return Ok(());
    }

    println!();
    println!("Pipeline Stages");
    println!("===============");
    println!();
    for descriptor in stages {
        println!(
            "  {} {:<16} {}",
            descriptor.icon,
            style(&descriptor.id).cyan(),
            style(&descriptor.display_name).bold()
        );
        println!("     {}", style(&descriptor.description).dim());
    }
    println!();
    println!("Unknown stage ids are shown with {} and \"Processing\".", stage::DEFAULT_ICON);
    println!();
    Ok(())
}
