use std::fmt::Write;

use weather_etl_core::{Batch, RunSummary, model::display_measure};

const HEADERS: [&str; 8] = [
    "city",
    "date",
    "temp_max",
    "temp_min",
    "feels_like_max",
    "feels_like_min",
    "humidity",
    "precip_prob",
];

/// Plain-text table of a normalized batch.
pub fn render_table(batch: &Batch) -> String {
    let rows: Vec<[String; 8]> = batch
        .rows()
        .iter()
        .map(|r| {
            [
                r.city.clone(),
                r.date.to_string(),
                display_measure(r.temp_max),
                display_measure(r.temp_min),
                display_measure(r.feels_like_max),
                display_measure(r.feels_like_min),
                display_measure(r.humidity),
                display_measure(r.precip_prob),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    push_line(&mut out, HEADERS.iter().copied(), &widths);
    for row in &rows {
        push_line(&mut out, row.iter().map(String::as_str), &widths);
    }
    let loaded_at = batch.loaded_at().format("%Y-%m-%d %H:%M:%S UTC");
    let _ = writeln!(out, "{} rows, loaded_at {loaded_at}", rows.len());
    out
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = format!(
        "Loaded {} rows from {} of {} cities (staged {}, merged {}).\n",
        summary.rows,
        summary.cities_requested - summary.failed_cities.len(),
        summary.cities_requested,
        summary.report.staged,
        summary.report.merged,
    );
    if !summary.failed_cities.is_empty() {
        let _ = writeln!(out, "Skipped cities: {}", summary.failed_cities.join(", "));
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line = cells
        .zip(widths.iter().copied())
        .map(|(cell, w)| format!("{cell:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", line.trim_end());
}
