use anyhow::{Context, Result};
use inquire::{CustomType, Password, PasswordDisplayMode, Select, Text};
use std::path::Path;
use weather_etl_core::{MergeStrategy, RawConfig};

const DEFAULT_PORT: u16 = 5439;

/// Prompt for every required key, keeping existing values as defaults, and save.
pub fn run(path: &Path) -> Result<()> {
    let mut raw = RawConfig::load_or_default(path)?;

    raw.weather_api.key = Some(secret("Weather API key:", raw.weather_api.key.take())?);

    raw.warehouse.host = Some(text("Warehouse host:", raw.warehouse.host.as_deref())?);
    raw.warehouse.port = Some(
        CustomType::<u16>::new("Warehouse port:")
            .with_default(raw.warehouse.port.unwrap_or(DEFAULT_PORT))
            .prompt()?,
    );
    raw.warehouse.database = Some(text("Database name:", raw.warehouse.database.as_deref())?);
    raw.warehouse.user = Some(text("Database user:", raw.warehouse.user.as_deref())?);
    raw.warehouse.password = Some(secret("Database password:", raw.warehouse.password.take())?);

    let strategies = vec![MergeStrategy::DeleteInsert, MergeStrategy::OnConflict];
    let current = raw.warehouse.merge_strategy.unwrap_or_default();
    let start = strategies.iter().position(|s| *s == current).unwrap_or(0);
    raw.warehouse.merge_strategy =
        Some(Select::new("Merge strategy:", strategies).with_starting_cursor(start).prompt()?);

    let current_cities = raw.pipeline.cities.as_ref().map(|c| c.join(", "));
    let cities = text("Cities (comma-separated):", current_cities.as_deref())?;
    raw.pipeline.cities = Some(split_cities(&cities));

    if let Err(e) = raw.clone().validate() {
        println!("Warning: configuration is still incomplete: {e}");
    }

    raw.save(path).with_context(|| format!("Failed to save configuration to {}", path.display()))?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}

fn text(message: &str, default: Option<&str>) -> Result<String> {
    let mut prompt = Text::new(message);
    if let Some(default) = default {
        prompt = prompt.with_default(default);
    }
    Ok(prompt.prompt()?)
}

/// Masked prompt; blank input keeps the existing secret.
fn secret(message: &str, existing: Option<String>) -> Result<String> {
    let mut prompt = Password::new(message)
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked);
    if existing.is_some() {
        prompt = prompt.with_help_message("Leave blank to keep the current value");
    }
    let input = prompt.prompt()?;

    Ok(match existing {
        Some(current) if input.trim().is_empty() => current,
        _ => input,
    })
}

fn split_cities(input: &str) -> Vec<String> {
    input.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_string).collect()
}
