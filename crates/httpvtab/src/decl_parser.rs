//! One-time parse of the column DDL argument strings SQLite hands to
//! `xCreate`/`xConnect` into a [`Schema`].
//!
//! This is the pure string -> column-list function spec.md §1 calls out as
//! an external collaborator: it understands exactly one tiny grammar (one
//! column declaration per argument, already split by SQLite's own
//! `CREATE VIRTUAL TABLE` parser) and nothing of general SQL.

use crate::error::{Error, Result};

pub const MAX_USER_COLUMNS: usize = 64;
pub const SYNTHETIC_COLUMN_COUNT: usize = 3;
pub const ICOL_URL: usize = 0;
pub const ICOL_HEADERS: usize = 1;
pub const ICOL_BODY: usize = 2;

const SYNTHETIC_NAMES: [&str; SYNTHETIC_COLUMN_COUNT] = ["url", "headers", "body"];

/// How a column's value is produced for a given row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Look up a top-level key of the row document.
    Direct(String),
    /// Walk a chain of object keys, each a `->`-separated path segment.
    GeneratedPath(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub default_value: Option<String>,
    pub projection: Projection,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Render the `CREATE TABLE` text handed back to `sqlite3_declare_vtab`.
    /// The three leading synthetic columns are always declared `HIDDEN`.
    pub fn to_create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE \"{}\"(", escape_ident(&self.table_name));
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            sql.push_str(&format!("\"{}\" {}", escape_ident(&col.name), col.declared_type));
            if i < SYNTHETIC_COLUMN_COUNT {
                sql.push_str(" HIDDEN");
            }
        }
        sql.push(')');
        sql
    }
}

fn escape_ident(name: &str) -> String {
    name.replace('"', "\"\"")
}

fn synthetic_column(name: &str, default_value: Option<String>) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        declared_type: "TEXT".to_string(),
        default_value,
        projection: Projection::Direct(name.to_string()),
    }
}

/// Parse the column-declaration arguments of a
/// `CREATE VIRTUAL TABLE ... USING httpvtab(<colspec>, ...)` statement.
///
/// `col_args` is each DDL argument past the module/schema/table-name
/// triple, verbatim, one per declared column.
pub fn parse_schema(table_name: &str, col_args: &[String]) -> Result<Schema> {
    let mut synthetic_defaults: [Option<String>; SYNTHETIC_COLUMN_COUNT] = [None, None, None];
    let mut user_columns: Vec<ColumnDef> = Vec::new();

    for raw in col_args {
        let tokens = tokenize(raw)?;
        if tokens.len() < 2 {
            return Err(Error::Schema(format!("malformed column declaration: {raw}")));
        }

        let name = parse_column_name(&tokens[0])?;
        let declared_type = tokens[1].to_ascii_uppercase();
        let synthetic_index = SYNTHETIC_NAMES.iter().position(|n| n.eq_ignore_ascii_case(&name));

        if let Some(i) = synthetic_index {
            if declared_type != "TEXT" {
                return Err(Error::Schema(format!(
                    "column \"{name}\" must be declared TEXT, not {declared_type}"
                )));
            }
            if has_generated_clause(&tokens) {
                return Err(Error::Schema(format!(
                    "synthetic column \"{name}\" cannot be GENERATED"
                )));
            }
            if let Some(value) = parse_default_clause(&tokens, &name)? {
                synthetic_defaults[i] = Some(value);
            }
            continue;
        }

        if let Some(value) = parse_default_clause(&tokens, &name)? {
            user_columns.push(ColumnDef {
                name: name.clone(),
                declared_type,
                default_value: Some(value),
                projection: Projection::Direct(name),
            });
            continue;
        }

        if has_generated_clause(&tokens) {
            let path = parse_generated_path(&tokens[5..].join(" "))?;
            user_columns.push(ColumnDef {
                name: name.clone(),
                declared_type,
                default_value: None,
                projection: Projection::GeneratedPath(path),
            });
            continue;
        }

        user_columns.push(ColumnDef {
            name: name.clone(),
            declared_type,
            default_value: None,
            projection: Projection::Direct(name),
        });
    }

    if user_columns.len() > MAX_USER_COLUMNS {
        return Err(Error::Schema(format!(
            "too many columns: {} exceeds the {} column limit",
            user_columns.len(),
            MAX_USER_COLUMNS
        )));
    }

    let mut columns = vec![
        synthetic_column(SYNTHETIC_NAMES[ICOL_URL], synthetic_defaults[ICOL_URL].take()),
        synthetic_column(SYNTHETIC_NAMES[ICOL_HEADERS], synthetic_defaults[ICOL_HEADERS].take()),
        synthetic_column(SYNTHETIC_NAMES[ICOL_BODY], synthetic_defaults[ICOL_BODY].take()),
    ];
    columns.extend(user_columns);

    Ok(Schema {
        table_name: table_name.to_string(),
        columns,
    })
}

fn has_generated_clause(tokens: &[String]) -> bool {
    tokens.len() >= 6
        && tokens[2].eq_ignore_ascii_case("generated")
        && tokens[3].eq_ignore_ascii_case("always")
        && tokens[4].eq_ignore_ascii_case("as")
}

/// Returns `Ok(Some(value))` when tokens `[2..]` form a well-formed `DEFAULT
/// '<value>'` clause, `Ok(None)` when there is no `DEFAULT` clause at all,
/// and `Err` for a `DEFAULT` keyword with a missing or malformed value.
fn parse_default_clause(tokens: &[String], column_name: &str) -> Result<Option<String>> {
    if tokens.len() < 3 || !tokens[2].eq_ignore_ascii_case("default") {
        return Ok(None);
    }
    if tokens.len() != 4 {
        return Err(Error::Schema(format!(
            "DEFAULT clause for column \"{column_name}\" takes exactly one value"
        )));
    }
    Ok(Some(strip_single_quotes(&tokens[3])))
}

fn parse_column_name(raw: &str) -> Result<String> {
    if let Some(stripped) = raw.strip_prefix('"') {
        let inner = stripped
            .strip_suffix('"')
            .ok_or_else(|| Error::Schema(format!("unterminated double-quoted column name: {raw}")))?;
        if inner.is_empty() {
            return Err(Error::Schema("column name cannot be empty".to_string()));
        }
        Ok(inner.to_string())
    } else {
        Ok(raw.to_ascii_lowercase())
    }
}

fn strip_single_quotes(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}

/// Parse a `(key1->key2->...)` generated-column expression into its path
/// segments. Segments wrapped in single quotes have the quotes stripped;
/// an empty segment (`->->`, or leading/trailing `->`) is invalid.
fn parse_generated_path(expr: &str) -> Result<Vec<String>> {
    let trimmed = expr.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| {
            Error::Schema(format!(
                "GENERATED ALWAYS AS expression must be parenthesized: {expr}"
            ))
        })?;

    let segments: Vec<String> = inner
        .split("->")
        .map(|seg| strip_single_quotes(seg.trim()))
        .collect();

    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Schema(format!(
            "empty path segment in generated expression: {expr}"
        )));
    }
    Ok(segments)
}

/// Split one column-declaration argument on whitespace, treating a
/// single-quoted run (which may itself contain spaces, e.g. a `DEFAULT`
/// value) as one token.
fn tokenize(raw: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in raw.chars() {
        match ch {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if in_quotes {
        return Err(Error::Schema(format!("unterminated quote in column declaration: {raw}")));
    }
    if tokens.is_empty() {
        return Err(Error::Schema("empty column declaration".to_string()));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(decls: &[&str]) -> Vec<String> {
        decls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn synthetic_columns_always_present_at_fixed_indices() {
        let schema = parse_schema("t", &args(&["id INT"])).unwrap();
        assert_eq!(schema.columns[0].name, "url");
        assert_eq!(schema.columns[1].name, "headers");
        assert_eq!(schema.columns[2].name, "body");
        assert_eq!(schema.columns[3].name, "id");
    }

    #[test]
    fn default_clause_on_url_sets_synthetic_default() {
        let schema = parse_schema(
            "t",
            &args(&["url TEXT DEFAULT 'https://a.example/x'", "id INT"]),
        )
        .unwrap();
        assert_eq!(
            schema.columns[ICOL_URL].default_value.as_deref(),
            Some("https://a.example/x")
        );
        assert_eq!(schema.columns.len(), 4);
    }

    #[test]
    fn generated_always_as_parses_arrow_path() {
        let schema = parse_schema(
            "t",
            &args(&["name TEXT GENERATED ALWAYS AS (user->profile->name)"]),
        )
        .unwrap();
        assert_eq!(
            schema.columns[3].projection,
            Projection::GeneratedPath(vec![
                "user".to_string(),
                "profile".to_string(),
                "name".to_string()
            ])
        );
    }

    #[test]
    fn quoted_path_segments_have_quotes_stripped() {
        let schema = parse_schema("t", &args(&["x TEXT GENERATED ALWAYS AS ('a'->'b')"])).unwrap();
        assert_eq!(
            schema.columns[3].projection,
            Projection::GeneratedPath(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn empty_path_segment_is_rejected() {
        let err = parse_schema("t", &args(&["x TEXT GENERATED ALWAYS AS (a->->b)"]));
        assert!(err.is_err());
    }

    #[test]
    fn double_quoted_name_preserves_case() {
        let schema = parse_schema("t", &args(&["\"MixedCase\" TEXT"])).unwrap();
        assert_eq!(schema.columns[3].name, "MixedCase");
    }

    #[test]
    fn unquoted_name_is_lowercased() {
        let schema = parse_schema("t", &args(&["MixedCase TEXT"])).unwrap();
        assert_eq!(schema.columns[3].name, "mixedcase");
    }

    #[test]
    fn unterminated_double_quote_is_a_schema_error() {
        let err = parse_schema("t", &args(&["\"oops TEXT"]));
        assert!(err.is_err());
    }

    #[test]
    fn non_text_url_column_is_rejected() {
        let err = parse_schema("t", &args(&["url INTEGER"]));
        assert!(err.is_err());
    }

    #[test]
    fn default_with_no_value_is_rejected() {
        let err = parse_schema("t", &args(&["url TEXT DEFAULT"]));
        assert!(err.is_err());
    }

    #[test]
    fn too_many_user_columns_is_rejected() {
        let decls: Vec<String> = (0..MAX_USER_COLUMNS + 1).map(|i| format!("c{i} TEXT")).collect();
        let refs: Vec<&str> = decls.iter().map(|s| s.as_str()).collect();
        let err = parse_schema("t", &args(&refs));
        assert!(err.is_err());
    }
}
