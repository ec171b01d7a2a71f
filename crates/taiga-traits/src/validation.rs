//! Input validation.
//!
//! Type and value checks for estimator options, plus the SQL-safety rules
//! for identifiers and file paths. Validation failures are fatal and fail
//! fast at `estimate()` entry.

use serde_json::Value;

use crate::config::{BiomassComponent, LandType, TemporalMethod, TreeType, VolType};
use crate::error::{Result, TaigaError};
use crate::expr::DomainExpr;

/// Validate and parse a land-type option.
pub fn validate_land_type(value: &str) -> Result<LandType> {
    value.parse()
}

/// Validate and parse a tree-type option.
pub fn validate_tree_type(value: &str) -> Result<TreeType> {
    value.parse()
}

/// Validate and parse a volume-type option.
pub fn validate_vol_type(value: &str) -> Result<VolType> {
    value.parse()
}

/// Validate and parse a biomass-component option.
pub fn validate_biomass_component(value: &str) -> Result<BiomassComponent> {
    value.parse()
}

/// Validate and parse a temporal-method option.
pub fn validate_temporal_method(value: &str) -> Result<TemporalMethod> {
    value.parse()
}

/// Coerce a JSON value into a boolean.
///
/// Accepts JSON booleans, the strings `"true"`/`"false"` (case-insensitive),
/// and the integers 0/1.
pub fn validate_boolean(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(TaigaError::InvalidConfig(format!(
                "expected boolean, got '{other}'"
            ))),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(TaigaError::InvalidConfig(format!(
                "expected boolean, got {n}"
            ))),
        },
        other => Err(TaigaError::InvalidConfig(format!(
            "expected boolean, got {other}"
        ))),
    }
}

/// Normalize a grouping-column option into an identifier list.
///
/// Accepts a single string, a comma-separated string, or an array of
/// strings; every resulting name must be a valid SQL identifier.
pub fn validate_grp_by(value: &Value) -> Result<Vec<String>> {
    let names: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.trim().to_string()),
                    other => {
                        return Err(TaigaError::InvalidConfig(format!(
                            "grp_by entries must be strings, got {other}"
                        )));
                    }
                }
            }
            out
        }
        other => {
            return Err(TaigaError::InvalidConfig(format!(
                "grp_by must be a string or list of strings, got {other}"
            )));
        }
    };
    for name in &names {
        validate_sql_identifier(name)?;
    }
    Ok(names)
}

/// Parse and screen a domain expression.
pub fn validate_domain_expression(value: &str) -> Result<DomainExpr> {
    DomainExpr::parse(value)
}

/// Check that a name matches the SQL identifier grammar
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(TaigaError::InvalidIdentifier(name.to_string()))
    }
}

/// Reject file paths containing characters that are unsafe to hand to a
/// SQL engine: quotes, semicolons, backslashes, and comment sequences.
pub fn sanitize_sql_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(TaigaError::InvalidPath("empty path".to_string()));
    }
    if path.contains('\'') || path.contains('"') || path.contains(';') || path.contains('\\') {
        return Err(TaigaError::InvalidPath(format!(
            "path contains unsafe characters: {path}"
        )));
    }
    if path.contains("--") || path.contains("/*") || path.contains("*/") {
        return Err(TaigaError::InvalidPath(format!(
            "path contains comment sequences: {path}"
        )));
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_option_enums() {
        assert_eq!(validate_land_type("forest").unwrap(), LandType::Forest);
        assert_eq!(validate_tree_type("dead").unwrap(), TreeType::Dead);
        assert_eq!(validate_vol_type("gross").unwrap(), VolType::Gross);
        assert_eq!(
            validate_biomass_component("bole").unwrap(),
            BiomassComponent::Bole
        );
        assert_eq!(
            validate_temporal_method("sma").unwrap(),
            TemporalMethod::Sma
        );
        assert!(validate_land_type("ocean").is_err());
    }

    #[test]
    fn test_validate_boolean_coercions() {
        assert!(validate_boolean(&json!(true)).unwrap());
        assert!(!validate_boolean(&json!(false)).unwrap());
        assert!(validate_boolean(&json!("TRUE")).unwrap());
        assert!(!validate_boolean(&json!("no")).unwrap());
        assert!(validate_boolean(&json!(1)).unwrap());
        assert!(!validate_boolean(&json!(0)).unwrap());
        assert!(validate_boolean(&json!(2)).is_err());
        assert!(validate_boolean(&json!([true])).is_err());
    }

    #[test]
    fn test_validate_grp_by_forms() {
        assert_eq!(
            validate_grp_by(&json!("OWNGRPCD")).unwrap(),
            vec!["OWNGRPCD"]
        );
        assert_eq!(
            validate_grp_by(&json!("OWNGRPCD, FORTYPCD")).unwrap(),
            vec!["OWNGRPCD", "FORTYPCD"]
        );
        assert_eq!(
            validate_grp_by(&json!(["SPCD", "STDSZCD"])).unwrap(),
            vec!["SPCD", "STDSZCD"]
        );
        assert!(validate_grp_by(&json!(null)).unwrap().is_empty());
        assert!(validate_grp_by(&json!(["SPCD; DROP"])).is_err());
        assert!(validate_grp_by(&json!(42)).is_err());
    }

    #[test]
    fn test_identifier_rule() {
        assert!(validate_sql_identifier("PLT_CN").is_ok());
        assert!(validate_sql_identifier("_private").is_ok());
        assert!(validate_sql_identifier("a1").is_ok());
        assert!(validate_sql_identifier("1a").is_err());
        assert!(validate_sql_identifier("").is_err());
        assert!(validate_sql_identifier("DIA-5").is_err());
        assert!(validate_sql_identifier("x y").is_err());
    }

    #[test]
    fn test_path_rule() {
        assert!(sanitize_sql_path("/data/georgia.duckdb").is_ok());
        assert!(sanitize_sql_path("relative/path.db").is_ok());
        assert!(sanitize_sql_path("bad;rm").is_err());
        assert!(sanitize_sql_path("bad'quote").is_err());
        assert!(sanitize_sql_path("win\\path").is_err());
        assert!(sanitize_sql_path("a--b").is_err());
        assert!(sanitize_sql_path("").is_err());
    }

    #[test]
    fn test_domain_expression_delegates() {
        assert!(validate_domain_expression("STATUSCD == 1").is_ok());
        assert!(validate_domain_expression("DELETE == 1").is_err());
    }
}
