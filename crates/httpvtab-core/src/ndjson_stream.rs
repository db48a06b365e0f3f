use std::io::{self, Read};

use bytes::Bytes;

use crate::byte_queue::ByteQueue;

/// Source of byte buffers consumed by an [`NdjsonStream`].
///
/// `recv` blocks (in whatever sense the implementation defines) until a
/// buffer is available or the producer side is known to be finished, in
/// which case it returns `None`. This is the seam between the queue itself
/// (used directly and synchronously in unit tests) and the cross-thread
/// channel a [`crate::fetch_worker::FetchWorker`] actually feeds.
pub trait BufferSource {
    fn recv(&mut self) -> Option<Bytes>;
}

/// A `BufferSource` over a plain in-memory `ByteQueue`, for single-threaded
/// tests and for driving the transcoder output directly without a worker
/// thread in between.
pub struct QueueSource(pub ByteQueue);

impl BufferSource for QueueSource {
    fn recv(&mut self) -> Option<Bytes> {
        self.0.pop()
    }
}

/// A `BufferSource` over the SPSC channel a `FetchWorker` publishes into.
pub struct ChannelSource(pub std::sync::mpsc::Receiver<Bytes>);

impl BufferSource for ChannelSource {
    fn recv(&mut self) -> Option<Bytes> {
        self.0.recv().ok()
    }
}

/// Byte-oriented readable view over a [`BufferSource`], inserting a `\n`
/// separator after every buffer it drains.
///
/// Each buffer pushed by the `JsonTranscoder` holds exactly one serialized
/// JSON document, so "one buffer, then one newline" gives line-delimited
/// framing for free without the stream needing to understand JSON at all.
pub struct NdjsonStream<S> {
    source: S,
    current: Option<Bytes>,
    offset: usize,
    emit_newline: bool,
}

impl<S: BufferSource> NdjsonStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: None,
            offset: 0,
            emit_newline: false,
        }
    }
}

impl<S: BufferSource> Read for NdjsonStream<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        if self.emit_newline {
            out[0] = b'\n';
            self.emit_newline = false;
            return Ok(1);
        }

        if self.current.is_none() {
            self.current = self.source.recv();
            if self.current.is_none() {
                return Ok(0);
            }
        }

        let buf = self.current.as_ref().expect("checked above");
        let remaining = &buf[self.offset..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;

        if self.offset >= buf.len() {
            self.current = None;
            self.offset = 0;
            self.emit_newline = true;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn single_buffer_is_newline_terminated() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"{\"a\":1}"));
        let stream = NdjsonStream::new(QueueSource(q));
        let mut reader = io::BufReader::new(stream);
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).unwrap();
        assert_eq!(n, line.len());
        assert_eq!(line, b"{\"a\":1}\n");
    }

    #[test]
    fn multiple_buffers_yield_multiple_lines_in_order() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"{\"a\":1}"));
        q.push(Bytes::from_static(b"{\"a\":2}"));
        let stream = NdjsonStream::new(QueueSource(q));
        let mut reader = io::BufReader::new(stream);

        let mut line1 = Vec::new();
        reader.read_until(b'\n', &mut line1).unwrap();
        assert_eq!(line1, b"{\"a\":1}\n");

        let mut line2 = Vec::new();
        reader.read_until(b'\n', &mut line2).unwrap();
        assert_eq!(line2, b"{\"a\":2}\n");

        let mut line3 = Vec::new();
        let n = reader.read_until(b'\n', &mut line3).unwrap();
        assert_eq!(n, 0);
        assert!(line3.is_empty());
    }

    #[test]
    fn read_never_blocks_to_fill_the_whole_request() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"0123456789"));
        let mut stream = NdjsonStream::new(QueueSource(q));
        let mut out = vec![0u8; 1024];
        let n = stream.read(&mut out).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn empty_queue_is_eof() {
        let q = ByteQueue::new();
        let mut stream = NdjsonStream::new(QueueSource(q));
        let mut out = [0u8; 8];
        assert_eq!(stream.read(&mut out).unwrap(), 0);
    }
}
