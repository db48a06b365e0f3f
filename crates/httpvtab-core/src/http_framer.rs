use crate::error::{Error, Result};

const HEADER_CAP: usize = 8192;
const MAX_CHUNK_SIZE_LINE: usize = 32;

#[derive(Debug)]
enum Phase {
    Headers,
    /// `None` means no `Content-Length` and no chunked encoding was seen:
    /// the body runs until the connection closes.
    IdentityBody(Option<usize>),
    ChunkSize,
    ChunkData(usize),
    /// Waiting for the CRLF that follows chunk data, or (when `final_trailer`
    /// is set) the CRLF that follows the zero-length terminator chunk.
    ChunkTrailer { final_trailer: bool, seen: u8 },
    Done,
}

/// Incremental decoder for an HTTP/1.1 response: splits the header block
/// from the body and removes `Transfer-Encoding: chunked` or
/// `Content-Length` framing, handing the driver a plain byte stream of body
/// content regardless of which framing the server used.
///
/// Fed arbitrarily small slices (down to one byte at a time) and must behave
/// identically to being fed the whole response in one call.
pub struct HttpFramer {
    phase: Phase,
    header_buf: Vec<u8>,
    chunk_size_buf: Vec<u8>,
    header_cap: usize,
}

impl Default for HttpFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFramer {
    pub fn new() -> Self {
        Self::with_header_cap(HEADER_CAP)
    }

    /// Same as `new`, but with a caller-supplied header-block size limit
    /// (`HTTPVTAB_MAX_HEADER_BYTES` at the `httpvtab` layer) instead of the
    /// built-in 8 KiB default.
    pub fn with_header_cap(header_cap: usize) -> Self {
        Self {
            phase: Phase::Headers,
            header_buf: Vec::new(),
            chunk_size_buf: Vec::new(),
            header_cap,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Feed the next chunk of socket bytes. Every complete body byte decoded
    /// from `data` is passed to `on_body`, in order, before this call
    /// returns.
    pub fn feed(&mut self, data: &[u8], on_body: &mut dyn FnMut(&[u8])) -> Result<()> {
        let mut remaining = data.to_vec();

        loop {
            let phase = std::mem::replace(&mut self.phase, Phase::Done);

            match phase {
                Phase::Headers => {
                    if remaining.is_empty() {
                        self.phase = Phase::Headers;
                        return Ok(());
                    }

                    if let Some(consumed) = self.feed_headers(&remaining)? {
                        remaining.drain(..consumed);
                        continue;
                    }
                    self.phase = Phase::Headers;
                    return Ok(());
                }

                Phase::IdentityBody(None) => {
                    if remaining.is_empty() {
                        self.phase = Phase::IdentityBody(None);
                        return Ok(());
                    }
                    on_body(&remaining);
                    remaining.clear();
                    self.phase = Phase::IdentityBody(None);
                    return Ok(());
                }

                Phase::IdentityBody(Some(0)) => {
                    self.phase = Phase::Done;
                    return Ok(());
                }

                Phase::IdentityBody(Some(n)) => {
                    if remaining.is_empty() {
                        self.phase = Phase::IdentityBody(Some(n));
                        return Ok(());
                    }
                    let take = remaining.len().min(n);
                    on_body(&remaining[..take]);
                    let left = n - take;
                    remaining.drain(..take);
                    self.phase = if left == 0 {
                        Phase::Done
                    } else {
                        Phase::IdentityBody(Some(left))
                    };
                    if left == 0 {
                        return Ok(());
                    }
                    continue;
                }

                Phase::ChunkSize => {
                    if let Some(nl) = find_crlf(&remaining) {
                        self.chunk_size_buf.extend_from_slice(&remaining[..nl]);
                        remaining.drain(..nl + 2);
                        let line = std::mem::take(&mut self.chunk_size_buf);
                        let size = parse_chunk_size(&line)?;
                        self.phase = if size == 0 {
                            Phase::ChunkTrailer {
                                final_trailer: true,
                                seen: 0,
                            }
                        } else {
                            Phase::ChunkData(size)
                        };
                        continue;
                    }
                    self.chunk_size_buf.extend_from_slice(&remaining);
                    remaining.clear();
                    if self.chunk_size_buf.len() > MAX_CHUNK_SIZE_LINE {
                        return Err(Error::ChunkFraming(
                            "chunk size line too long".to_string(),
                        ));
                    }
                    self.phase = Phase::ChunkSize;
                    return Ok(());
                }

                Phase::ChunkData(n) => {
                    if remaining.is_empty() {
                        self.phase = Phase::ChunkData(n);
                        return Ok(());
                    }
                    let take = remaining.len().min(n);
                    on_body(&remaining[..take]);
                    let left = n - take;
                    remaining.drain(..take);
                    self.phase = if left == 0 {
                        Phase::ChunkTrailer {
                            final_trailer: false,
                            seen: 0,
                        }
                    } else {
                        Phase::ChunkData(left)
                    };
                    if left > 0 {
                        return Ok(());
                    }
                    continue;
                }

                Phase::ChunkTrailer { final_trailer, seen } => {
                    if remaining.is_empty() {
                        self.phase = Phase::ChunkTrailer { final_trailer, seen };
                        return Ok(());
                    }
                    let expected: &[u8] = b"\r\n";
                    let mut seen = seen;
                    let mut consumed = 0;
                    while (seen as usize) < expected.len() && consumed < remaining.len() {
                        if remaining[consumed] != expected[seen as usize] {
                            return Err(Error::ChunkFraming(
                                "expected CRLF after chunk data".to_string(),
                            ));
                        }
                        seen += 1;
                        consumed += 1;
                    }
                    remaining.drain(..consumed);
                    if (seen as usize) < expected.len() {
                        self.phase = Phase::ChunkTrailer { final_trailer, seen };
                        return Ok(());
                    }
                    self.phase = if final_trailer {
                        Phase::Done
                    } else {
                        Phase::ChunkSize
                    };
                    if final_trailer {
                        return Ok(());
                    }
                    continue;
                }

                Phase::Done => {
                    self.phase = Phase::Done;
                    return Ok(());
                }
            }
        }
    }

    /// Called when the underlying socket reports EOF. Resolves an
    /// unbounded identity body into a clean finish; any other phase means
    /// the response was truncated.
    pub fn on_eof(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::IdentityBody(None) | Phase::Done => {
                self.phase = Phase::Done;
                Ok(())
            }
            _ => Err(Error::UnexpectedEof),
        }
    }

    fn feed_headers(&mut self, data: &[u8]) -> Result<Option<usize>> {
        // Search across the boundary between what we already buffered and
        // the newly fed data, not just within `data` alone. The cap is
        // enforced below, after this probe has had a chance to find a
        // terminator straddling the boundary.
        let probe_start = self.header_buf.len().saturating_sub(3);
        let mut probe = self.header_buf[probe_start..].to_vec();
        probe.extend_from_slice(data);

        if let Some(end_in_probe) = find_header_end(&probe) {
            let included = self.header_buf.len() - probe_start;
            let end_in_data = end_in_probe - included;
            self.header_buf.extend_from_slice(&data[..end_in_data]);
            let header_text = std::mem::take(&mut self.header_buf);
            self.apply_headers(&header_text)?;
            return Ok(Some(end_in_data));
        }

        self.header_buf.extend_from_slice(data);
        if self.header_buf.len() > self.header_cap {
            return Err(Error::HeadersTooLarge(self.header_cap));
        }
        Ok(None)
    }

    fn apply_headers(&mut self, header_text: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(header_text);
        let mut chunked = false;
        let mut content_length: Option<usize> = None;

        for line in text.split("\r\n").skip(1) {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();

            if name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
                chunked = true;
            } else if name == "content-length" {
                let n: usize = value
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad content-length: {value}")))?;
                content_length = Some(n);
            }
        }

        self.phase = if chunked {
            Phase::ChunkSize
        } else {
            Phase::IdentityBody(content_length)
        };
        Ok(())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::ChunkFraming("non-utf8 chunk size".to_string()))?;
    // Strip chunk extensions (";name=value") if present.
    let size_part = text.split(';').next().unwrap_or(text).trim();
    usize::from_str_radix(size_part, 16)
        .map_err(|_| Error::ChunkFraming(format!("invalid chunk size: {size_part}")))
}
