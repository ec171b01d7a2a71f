//! Output formatting for result frames.

use anyhow::{anyhow, Result};
use polars::prelude::*;

/// Print a result frame in the requested format.
pub fn print_frame(frame: &DataFrame, format: &str) -> Result<()> {
    match format {
        "text" => {
            println!("{frame}");
            Ok(())
        }
        "json" => {
            let json = serde_json::to_string_pretty(frame)?;
            println!("{json}");
            Ok(())
        }
        "csv" => {
            let mut frame = frame.clone();
            CsvWriter::new(std::io::stdout())
                .include_header(true)
                .finish(&mut frame)?;
            Ok(())
        }
        other => Err(anyhow!("unknown output format '{other}'")),
    }
}
