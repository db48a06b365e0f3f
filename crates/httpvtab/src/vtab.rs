//! The `rusqlite::vtab` ABI binding: a table whose rows are the NDJSON
//! lines `httpvtab_core::FetchWorker` streams back for one HTTP request.
//!
//! Grounded in `examples/original_source/src/vttp.c`'s `xBestIndex`/
//! `xFilter`/`xColumn` lifecycle, reimplemented against `rusqlite`'s safe
//! vtab traits instead of the raw `sqlite3_vtab` C struct.

use std::io::BufRead;
use std::io::BufReader;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};

use rusqlite::vtab::{
    Context, CreateVTab, IndexConstraintOp, IndexInfo, VTab, VTabConnection, VTabCursor, VTabKind, Values,
};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, instrument};

use httpvtab_core::{FetchConfig, FetchHandle, FetchWorker, NdjsonStream};

use crate::decl_parser::{self, Schema, ICOL_BODY, ICOL_HEADERS, ICOL_URL};

/// `idx_num` encodes a `column_index -> argv_position` map (spec.md §3's
/// `PlanMask`), not just which columns were pushed: SQLite enumerates
/// constraints in its own order, so the `body` constraint in `WHERE body =
/// 'b' AND url = 'u'` may be assigned `argvIndex` 1 while `url` gets 2. The
/// position (1-based, 0 = not pushed) for `url` is packed into the low 3
/// bits, `body`'s into the next 3 bits, mirroring `vttp.c`'s
/// `icol_to_arg_index[]` table.
const ARGV_POS_BITS: i32 = 3;
const ARGV_POS_MASK: i32 = 0b111;
const BODY_SHIFT: i32 = ARGV_POS_BITS;

fn pack_idx_num(url_argv_pos: i32, body_argv_pos: i32) -> i32 {
    url_argv_pos | (body_argv_pos << BODY_SHIFT)
}

fn unpack_idx_num(idx_num: i32) -> (i32, i32) {
    (idx_num & ARGV_POS_MASK, (idx_num >> BODY_SHIFT) & ARGV_POS_MASK)
}

pub struct HttpVTab {
    schema: Schema,
    config: FetchConfig,
}

unsafe impl<'vtab> VTab<'vtab> for HttpVTab {
    type Aux = FetchConfig;
    type Cursor = HttpVTabCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&Self::Aux>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        // args[0] = module name, args[1] = db name, args[2] = table name,
        // args[3..] = one string per declared column.
        if args.len() < 3 {
            return Err(rusqlite::Error::ModuleError(
                "httpvtab: CREATE VIRTUAL TABLE requires a table name".to_string(),
            ));
        }
        let table_name = std::str::from_utf8(args[2])
            .map_err(|e| rusqlite::Error::ModuleError(format!("httpvtab: non-utf8 table name: {e}")))?
            .to_string();

        let col_args: Vec<String> = args[3..]
            .iter()
            .map(|a| std::str::from_utf8(a).map(str::to_string))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| rusqlite::Error::ModuleError(format!("httpvtab: non-utf8 column declaration: {e}")))?;

        let schema = decl_parser::parse_schema(&table_name, &col_args)?;
        let create_sql = schema.to_create_table_sql();
        let config = aux.cloned().unwrap_or_default();

        debug!(table = %table_name, columns = schema.columns.len(), "httpvtab table declared");
        Ok((create_sql, HttpVTab { schema, config }))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let mut url_argv_pos = 0i32;
        let mut body_argv_pos = 0i32;
        let mut next_argv = 1;

        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.is_usable() || constraint.operator() != IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ {
                continue;
            }
            let column = constraint.column() as usize;
            if column == ICOL_URL {
                let mut usage = info.constraint_usage(i);
                usage.set_argv_index(next_argv);
                usage.set_omit(true);
                url_argv_pos = next_argv;
                next_argv += 1;
            } else if column == ICOL_BODY {
                let mut usage = info.constraint_usage(i);
                usage.set_argv_index(next_argv);
                usage.set_omit(true);
                body_argv_pos = next_argv;
                next_argv += 1;
            }
        }

        info.set_idx_num(pack_idx_num(url_argv_pos, body_argv_pos));
        info.set_estimated_cost(1_000_000.0);

        let has_default_url = self.schema.columns[ICOL_URL]
            .default_value
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false);

        if url_argv_pos == 0 && !has_default_url {
            return Err(rusqlite::Error::ModuleError(
                "httpvtab: query must constrain url with an equality predicate, or the table must declare a url DEFAULT".to_string(),
            ));
        }

        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<Self::Cursor> {
        Ok(HttpVTabCursor {
            vtab: self,
            reader: None,
            error_slot: None,
            next_doc: None,
            row_id: 0,
            resolved_url: String::new(),
            resolved_body: None,
        })
    }
}

impl<'vtab> CreateVTab<'vtab> for HttpVTab {
    const KIND: VTabKind = VTabKind::Default;
}

pub struct HttpVTabCursor<'vtab> {
    vtab: &'vtab HttpVTab,
    reader: Option<BufReader<NdjsonStream<FetchHandle>>>,
    error_slot: Option<Arc<Mutex<Option<httpvtab_core::Error>>>>,
    next_doc: Option<Value>,
    row_id: i64,
    resolved_url: String,
    resolved_body: Option<String>,
}

impl<'vtab> HttpVTabCursor<'vtab> {
    /// Pull the next NDJSON line off the reader into `self.next_doc`,
    /// leaving it `None` on a clean EOF. Checks the worker's error slot
    /// once the stream is exhausted so a fetch failure surfaces as a query
    /// error rather than a silently-truncated result set.
    fn advance(&mut self) -> rusqlite::Result<()> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => {
                self.next_doc = None;
                return Ok(());
            }
        };

        let mut line = Vec::new();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| rusqlite::Error::ModuleError(format!("httpvtab: stream read error: {e}")))?;

        if n == 0 {
            if let Some(slot) = &self.error_slot {
                if let Some(err) = slot.lock().unwrap().take() {
                    return Err(rusqlite::Error::ModuleError(format!("httpvtab: {err}")));
                }
            }
            self.next_doc = None;
            return Ok(());
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let value: Value = serde_json::from_slice(&line)
            .map_err(|e| rusqlite::Error::ModuleError(format!("httpvtab: malformed json row: {e}")))?;
        self.next_doc = Some(value);
        Ok(())
    }
}

unsafe impl<'vtab> VTabCursor for HttpVTabCursor<'vtab> {
    #[instrument(skip(self, args))]
    fn filter(&mut self, idx_num: c_int, _idx_str: Option<&str>, args: &Values<'_>) -> rusqlite::Result<()> {
        self.row_id = 0;
        self.reader = None;
        self.error_slot = None;
        self.next_doc = None;

        let (url_argv_pos, body_argv_pos) = unpack_idx_num(idx_num);

        let resolved_url = if url_argv_pos != 0 {
            let v: String = args.get((url_argv_pos - 1) as usize)?;
            v
        } else {
            self.vtab.schema.columns[ICOL_URL]
                .default_value
                .clone()
                .ok_or_else(|| rusqlite::Error::ModuleError("httpvtab: no url available for this query".to_string()))?
        };

        let resolved_body = if body_argv_pos != 0 {
            let v: String = args.get((body_argv_pos - 1) as usize)?;
            Some(v)
        } else {
            self.vtab.schema.columns[ICOL_BODY].default_value.clone()
        };

        // Scenario 2 of the table's testable invariants (an array-valued
        // response nested under a key) is exercised directly against
        // `JsonTranscoder`; the table always transcodes from the document
        // root, since the DDL grammar has no syntax for naming a sub-path.
        let (stream, error_slot) = FetchWorker::spawn(resolved_url.clone(), None, self.vtab.config.clone())
            .map_err(|e| rusqlite::Error::ModuleError(e.to_string()))?;

        self.reader = Some(BufReader::new(stream));
        self.error_slot = Some(error_slot);
        self.resolved_url = resolved_url;
        self.resolved_body = resolved_body;

        self.advance()
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        self.row_id += 1;
        self.advance()
    }

    fn eof(&self) -> bool {
        self.next_doc.is_none()
    }

    fn column(&self, ctx: &mut Context, icol: c_int) -> rusqlite::Result<()> {
        let icol = icol as usize;
        match icol {
            ICOL_URL => {
                ctx.set_result(&self.resolved_url)?;
                return Ok(());
            }
            ICOL_HEADERS => {
                // Response headers are never captured (the original fetch
                // engine never wired this column through either); it reads
                // back as NULL.
                ctx.set_result(&rusqlite::types::Null)?;
                return Ok(());
            }
            ICOL_BODY => {
                match &self.resolved_body {
                    Some(body) => ctx.set_result(body)?,
                    None => ctx.set_result(&rusqlite::types::Null)?,
                }
                return Ok(());
            }
            _ => {}
        }

        let def = self.vtab.schema.columns.get(icol).ok_or_else(|| {
            rusqlite::Error::ModuleError(format!("httpvtab: column index {icol} out of range"))
        })?;
        let doc = match &self.next_doc {
            Some(doc) => doc,
            None => {
                ctx.set_result(&rusqlite::types::Null)?;
                return Ok(());
            }
        };
        crate::column_binder::bind_column(ctx, def, doc).map_err(rusqlite::Error::from)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.row_id)
    }
}

/// Register the `httpvtab` module on `conn`, reading transport tunables
/// from the environment once at call time (see `config::fetch_config_from_env`).
#[instrument(skip(conn))]
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let config = crate::config::fetch_config_from_env();
    let module = rusqlite::vtab::read_only_module::<HttpVTab>();
    conn.create_module("httpvtab", module, Some(config))?;
    Ok(())
}
