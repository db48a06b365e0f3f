//! Per-row JSON -> SQL projection, applying the coercion table SPEC_FULL.md
//! §4.7 spells out for each SQLite storage class a JSON value can land in.

use rusqlite::vtab::Context;
use serde_json::Value;

use crate::decl_parser::{ColumnDef, Projection};
use crate::error::Result;

/// Resolve `def`'s value out of `doc` and hand it to SQLite via
/// `ctx.set_result`. Any lookup miss (a missing key, or a path segment
/// that walks through a non-object) yields SQL `NULL` rather than an
/// error; a single absent field in one response row should not fail the
/// whole query.
pub fn bind_column(ctx: &mut Context, def: &ColumnDef, doc: &Value) -> Result<()> {
    let resolved = match &def.projection {
        Projection::Direct(name) => doc.as_object().and_then(|m| m.get(name)),
        Projection::GeneratedPath(segments) => walk_path(doc, segments),
    };

    match resolved {
        None | Some(Value::Null) => ctx.set_result(&rusqlite::types::Null)?,
        Some(Value::String(s)) => ctx.set_result(s)?,
        Some(Value::Number(n)) => bind_number(ctx, n)?,
        Some(Value::Bool(b)) => bind_bool(ctx, *b, &def.declared_type)?,
        Some(value @ (Value::Object(_) | Value::Array(_))) => {
            let text = serde_json::to_string(value).map_err(|e| crate::error::Error::Row(e.to_string()))?;
            ctx.set_result(&text)?;
        }
    }
    Ok(())
}

fn bind_number(ctx: &mut Context, n: &serde_json::Number) -> Result<()> {
    if let Some(i) = n.as_i64() {
        ctx.set_result(&i)?;
    } else if let Some(f) = n.as_f64() {
        ctx.set_result(&f)?;
    } else {
        // Outside both i64 and f64 range; fall back to the literal text
        // rather than silently truncating.
        ctx.set_result(&n.to_string())?;
    }
    Ok(())
}

fn bind_bool(ctx: &mut Context, b: bool, declared_type: &str) -> Result<()> {
    if is_numeric_type(declared_type) {
        ctx.set_result(&(b as i64))?;
    } else {
        ctx.set_result(if b { "true" } else { "false" })?;
    }
    Ok(())
}

fn is_numeric_type(declared_type: &str) -> bool {
    let upper = declared_type.to_ascii_uppercase();
    upper.starts_with("INT") || upper.starts_with("FLOAT")
}

fn walk_path<'a>(doc: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_path_descends_nested_objects() {
        let doc: Value = serde_json::json!({"user": {"profile": {"name": "ada"}}});
        let value = walk_path(&doc, &["user".to_string(), "profile".to_string(), "name".to_string()]);
        assert_eq!(value, Some(&Value::String("ada".to_string())));
    }

    #[test]
    fn walk_path_through_an_array_misses() {
        let doc: Value = serde_json::json!({"user": [1, 2, 3]});
        let value = walk_path(&doc, &["user".to_string(), "profile".to_string()]);
        assert_eq!(value, None);
    }

    #[test]
    fn is_numeric_type_recognizes_int_and_float_family() {
        assert!(is_numeric_type("INTEGER"));
        assert!(is_numeric_type("INT"));
        assert!(is_numeric_type("FLOAT"));
        assert!(!is_numeric_type("REAL"));
        assert!(!is_numeric_type("DOUBLE"));
        assert!(!is_numeric_type("TEXT"));
        assert!(!is_numeric_type("BLOB"));
    }

    #[test]
    fn bool_in_a_real_column_is_not_treated_as_numeric() {
        let def = ColumnDef {
            name: "flag".to_string(),
            declared_type: "REAL".to_string(),
            default_value: None,
            projection: Projection::Direct("flag".to_string()),
        };
        assert!(!is_numeric_type(&def.declared_type));
    }
}
