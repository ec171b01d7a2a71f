//! Schema normalization across backends.
//!
//! Column types differ between the SQLite and columnar engines: `CN` keys
//! may be stored as text or as 64-bit integers, and some stores carry
//! lowercase column names. The mapper canonicalizes both so the estimators
//! can join frames without caring which engine produced them.

use polars::prelude::*;
use taiga_traits::Result;

/// Canonicalizes frame schemas to the FIA convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaMapper;

impl SchemaMapper {
    /// Whether a column belongs to the control-number key family.
    #[must_use]
    pub fn is_cn_column(name: &str) -> bool {
        name == "CN" || name.ends_with("_CN")
    }

    /// Canonicalize a frame: uppercase column names and cast CN-family
    /// columns to `Int64` where the values are numeric. Text CNs that do
    /// not parse losslessly stay text.
    pub fn normalize(df: DataFrame) -> Result<DataFrame> {
        let mut df = df;

        // Uppercase names first so the CN detection sees canonical names.
        let renames: Vec<(String, String)> = df
            .get_column_names()
            .iter()
            .filter(|name| name.chars().any(|c| c.is_ascii_lowercase()))
            .map(|name| (name.to_string(), name.to_uppercase()))
            .collect();
        for (old, new) in renames {
            df.rename(&old, new.into())?;
        }

        let cn_columns: Vec<String> = df
            .get_column_names()
            .iter()
            .filter(|name| Self::is_cn_column(name))
            .map(|name| name.to_string())
            .collect();

        for name in cn_columns {
            let series = df.column(&name)?.as_materialized_series().clone();
            match series.dtype() {
                DataType::Int64 => {}
                DataType::Int32 | DataType::UInt32 | DataType::UInt64 => {
                    let cast = series.cast(&DataType::Int64)?;
                    df.replace(&name, cast)?;
                }
                DataType::String => {
                    let original_nulls = series.null_count();
                    let cast = series.cast(&DataType::Int64)?;
                    // A lossy cast introduces nulls; keep the text form then.
                    if cast.null_count() == original_nulls {
                        df.replace(&name, cast)?;
                    }
                }
                _ => {}
            }
        }

        Ok(df)
    }
}
