use serde_json::{Map, Value};

use crate::byte_queue::ByteQueue;
use crate::error::{Error, Result};
use crate::json_lexer::{next_token, Token};

const MAX_DEPTH: usize = 64;

/// A stack frame tracking how deeply the transcoder is nested inside the
/// response document, and whether the subtree currently being parsed is one
/// we need to materialize (`Root`/`Object`/`Array`) or can discard (`Skip`)
/// because a path filter ruled it out.
enum Frame {
    /// Outside a matched subtree; values here are dropped as they close.
    Skip,
    /// The array or object whose direct children are emitted as rows.
    Root,
    /// Walking down the object chain named by the path filter, looking for
    /// the next key in `remaining`. Holds the key most recently read while
    /// its value is pending, exactly like `Object` does.
    Tracking {
        remaining: Vec<String>,
        pending_key: Option<String>,
        /// Set once a child key along `remaining` has matched. A `Tracking`
        /// frame that closes without ever matching means the path filter
        /// named a key the document never had.
        matched: bool,
    },
    Object {
        map: Map<String, Value>,
        pending_key: Option<String>,
        /// True when this object IS the row (the unfiltered top-level
        /// document, or an object-shaped path filter target) rather than
        /// nested content within one.
        is_row: bool,
    },
    Array {
        items: Vec<Value>,
    },
}

/// Incremental ("SAX-style") JSON parser that emits one complete top-level
/// row per call boundary instead of requiring the whole document up front.
///
/// Uses `serde_json::Value`/`Map` only as the in-memory build arena for
/// values the driver decides to keep; the tokenizing and structural
/// decisions are hand-rolled so a row can be recognized as complete the
/// instant its closing brace arrives, which `serde_json::Deserializer`
/// cannot report mid-stream.
pub struct JsonTranscoder {
    buf: Vec<u8>,
    pos: usize,
    stack: Vec<Frame>,
    path_filter: Option<Vec<String>>,
    output: ByteQueue,
}

impl JsonTranscoder {
    /// `path_filter` is a sequence of object-key segments (e.g. `["data",
    /// "items"]`) identifying the array (or object) whose direct children
    /// become rows. `None` or an empty path means the top-level document
    /// itself is the only row (or, if it is an array, each element is a
    /// row).
    pub fn new(path_filter: Option<Vec<String>>) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            stack: Vec::new(),
            path_filter,
            output: ByteQueue::new(),
        }
    }

    /// Append newly arrived body bytes and advance parsing as far as
    /// possible. Any rows completed as a result are available via
    /// `pop_row`.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        self.drive()?;
        if self.pos > 4096 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        Ok(())
    }

    pub fn pop_row(&mut self) -> Option<bytes::Bytes> {
        self.output.pop()
    }

    /// A body that never opened any container (an entirely empty response,
    /// or one consisting only of whitespace) finishes cleanly with zero
    /// rows - `xFilter` relies on this to turn "empty body" into a
    /// zero-row result instead of a query error. A body that opened a
    /// container and never closed it is genuinely truncated.
    pub fn finish(&mut self) -> Result<()> {
        self.output.close();
        if !self.stack.is_empty() {
            return Err(Error::Json("truncated json document".to_string()));
        }
        Ok(())
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            let Some((token, consumed)) = next_token(&self.buf[self.pos..])? else {
                return Ok(());
            };
            self.pos += consumed;
            self.handle_token(token)?;
        }
    }

    fn handle_token(&mut self, token: Token) -> Result<()> {
        match token {
            Token::BraceOpen => self.open_container(true)?,
            Token::BracketOpen => self.open_container(false)?,
            Token::BraceClose => self.close_object()?,
            Token::BracketClose => self.close_array()?,
            Token::Colon | Token::Comma => {}
            Token::String(s) => self.push_value(Value::String(s))?,
            Token::Number(raw) => self.push_value(classify_number(&raw)?)?,
            Token::True => self.push_value(Value::Bool(true))?,
            Token::False => self.push_value(Value::Bool(false))?,
            Token::Null => self.push_value(Value::Null)?,
        }
        Ok(())
    }

    fn open_container(&mut self, is_object: bool) -> Result<()> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(Error::DepthExceeded(MAX_DEPTH));
        }

        if self.stack.is_empty() {
            let segments = self.path_filter.clone().unwrap_or_default();
            if segments.is_empty() {
                if is_object {
                    self.stack.push(Frame::Object {
                        map: Map::new(),
                        pending_key: None,
                        is_row: true,
                    });
                } else {
                    self.stack.push(Frame::Root);
                }
            } else {
                self.stack.push(Frame::Tracking {
                    remaining: segments,
                    pending_key: None,
                    matched: false,
                });
            }
            return Ok(());
        }

        match self.stack.last_mut() {
            Some(Frame::Tracking {
                remaining,
                pending_key,
                matched,
            }) => {
                let key = pending_key
                    .take()
                    .ok_or_else(|| Error::Json("object value with no preceding key".to_string()))?;
                if remaining.first().map(|s| s.as_str()) == Some(key.as_str()) {
                    *matched = true;
                    if remaining.len() == 1 {
                        if is_object {
                            self.stack.push(Frame::Object {
                                map: Map::new(),
                                pending_key: None,
                                is_row: true,
                            });
                        } else {
                            self.stack.push(Frame::Root);
                        }
                    } else {
                        let next_remaining = remaining[1..].to_vec();
                        self.stack.push(Frame::Tracking {
                            remaining: next_remaining,
                            pending_key: None,
                            matched: false,
                        });
                    }
                } else {
                    self.stack.push(Frame::Skip);
                }
            }
            Some(Frame::Skip) => self.stack.push(Frame::Skip),
            _ => {
                if is_object {
                    self.stack.push(Frame::Object {
                        map: Map::new(),
                        pending_key: None,
                        is_row: false,
                    });
                } else {
                    self.stack.push(Frame::Array { items: Vec::new() });
                }
            }
        }
        Ok(())
    }

    fn push_value(&mut self, value: Value) -> Result<()> {
        match self.stack.last_mut() {
            None => Err(Error::Json("value outside of any container".to_string())),
            Some(Frame::Skip) => Ok(()),
            Some(Frame::Root) => {
                // A scalar directly at the matched root (e.g. the path
                // filter pointed at an array of scalars) is itself a row.
                self.emit_row(value)
            }
            Some(Frame::Tracking { pending_key, .. }) => {
                if pending_key.is_none() {
                    match value {
                        Value::String(s) => {
                            *pending_key = Some(s);
                            Ok(())
                        }
                        _ => Err(Error::Json("expected object key".to_string())),
                    }
                } else {
                    // A scalar value for a key along the tracked path: not
                    // a container, so it cannot continue the path. Drop it
                    // and wait for the next key.
                    *pending_key = None;
                    Ok(())
                }
            }
            Some(Frame::Object { map, pending_key, .. }) => {
                if let Some(key) = pending_key.take() {
                    map.insert(key, value);
                } else if let Value::String(s) = value {
                    *pending_key = Some(s);
                } else {
                    return Err(Error::Json("expected object key".to_string()));
                }
                Ok(())
            }
            Some(Frame::Array { items }) => {
                items.push(value);
                Ok(())
            }
        }
    }

    fn close_object(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Object { map, is_row, .. }) => {
                if is_row {
                    self.emit_row(Value::Object(map))
                } else {
                    self.finish_value(Value::Object(map))
                }
            }
            Some(Frame::Root) | Some(Frame::Skip) => Ok(()),
            Some(Frame::Tracking { matched, .. }) => {
                if matched {
                    Ok(())
                } else {
                    Err(Error::Json("path filter target not found".to_string()))
                }
            }
            Some(Frame::Array { .. }) | None => {
                Err(Error::Json("mismatched closing brace".to_string()))
            }
        }
    }

    fn close_array(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Array { items }) => self.finish_value(Value::Array(items)),
            Some(Frame::Root) | Some(Frame::Skip) => Ok(()),
            Some(Frame::Object { .. }) | Some(Frame::Tracking { .. }) | None => {
                Err(Error::Json("mismatched closing bracket".to_string()))
            }
        }
    }

    /// A nested container just finished; either hand it to the enclosing
    /// frame, or, if the enclosing frame is the matched root, emit it as a
    /// row.
    fn finish_value(&mut self, value: Value) -> Result<()> {
        match self.stack.last() {
            Some(Frame::Root) => self.emit_row(value),
            _ => self.push_value(value),
        }
    }

    fn emit_row(&mut self, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value).map_err(|e| Error::Json(e.to_string()))?;
        self.output.push(bytes::Bytes::from(bytes));
        Ok(())
    }
}

/// `.`, `e`, or `E` anywhere in the raw lexeme means the number is a float;
/// otherwise it is an integer. One pass over the already-scanned digits,
/// no separate int/float lookahead.
fn classify_number(raw: &str) -> Result<Value> {
    if raw.contains('.') || raw.contains('e') || raw.contains('E') {
        let f: f64 = raw
            .parse()
            .map_err(|_| Error::Json(format!("invalid number: {raw}")))?;
        Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null))
    } else {
        let i: i64 = raw
            .parse()
            .map_err(|_| Error::Json(format!("invalid number: {raw}")))?;
        Ok(Value::Number(serde_json::Number::from(i)))
    }
}
