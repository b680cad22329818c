//! Line framing with fan-out to listeners.

use bytes::BytesMut;
use log::{Level, log};
use memchr::memchr;

use super::StreamTag;
use super::sink::OutputSink;

/// Observer of framed output lines.
pub trait LineListener: Send {
    /// Called once per completed line, without its terminator.
    fn on_line(&mut self, tag: StreamTag, line: &str);

    /// Called after each write that leaves an unterminated tail buffered.
    ///
    /// The tail is offered again (possibly longer) on the next write until
    /// a terminator completes it.
    fn on_partial(&mut self, _tag: StreamTag, _partial: &str) {}
}

/// Logs every line through the `log` facade at a fixed level.
#[derive(Debug, Clone)]
pub struct LogListener {
    prefix: String,
    level: Level,
}

impl LogListener {
    /// Lines are logged as `{prefix}|{line}`.
    pub fn new(prefix: impl Into<String>, level: Level) -> Self {
        Self {
            prefix: prefix.into(),
            level,
        }
    }
}

impl LineListener for LogListener {
    fn on_line(&mut self, _tag: StreamTag, line: &str) {
        log!(self.level, "{}|{}", self.prefix, line);
    }
}

struct FnListener<F>(F);

impl<F> LineListener for FnListener<F>
where
    F: FnMut(StreamTag, &str) + Send,
{
    fn on_line(&mut self, tag: StreamTag, line: &str) {
        (self.0)(tag, line)
    }
}

/// Frames a raw byte feed into lines for one stream.
///
/// Lines end at `\n`; a `\r` right before it is dropped. Bytes are decoded
/// as UTF-8 (invalid sequences replaced) only once a line is complete, so a
/// multi-byte character split across writes survives intact. Whatever is
/// still buffered on [`close`](OutputSink::close) is published as a final
/// line. Listeners fire in registration order.
pub struct LineClassifier {
    tag: StreamTag,
    buffer: BytesMut,
    listeners: Vec<Box<dyn LineListener>>,
    closed: bool,
}

impl LineClassifier {
    pub fn new(tag: StreamTag) -> Self {
        Self {
            tag,
            buffer: BytesMut::with_capacity(1024),
            listeners: Vec::new(),
            closed: false,
        }
    }

    /// The stream this classifier frames.
    pub fn tag(&self) -> StreamTag {
        self.tag
    }

    /// Register a listener; it fires after all previously registered ones.
    pub fn add_listener(&mut self, listener: impl LineListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Register a closure as a line listener.
    pub fn on_line<F>(&mut self, f: F)
    where
        F: FnMut(StreamTag, &str) + Send + 'static,
    {
        self.add_listener(FnListener(f));
    }

    fn publish(&mut self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        for listener in &mut self.listeners {
            listener.on_line(self.tag, &line);
        }
    }
}

impl OutputSink for LineClassifier {
    fn write(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.buffer.extend_from_slice(data);

        while let Some(pos) = memchr(b'\n', &self.buffer) {
            let line = self.buffer.split_to(pos + 1);
            self.publish(&line[..pos]);
        }

        if !self.buffer.is_empty() {
            let partial = String::from_utf8_lossy(&self.buffer).into_owned();
            for listener in &mut self.listeners {
                listener.on_partial(self.tag, &partial);
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            self.publish(&rest);
        }
    }
}

impl std::fmt::Debug for LineClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineClassifier")
            .field("tag", &self.tag)
            .field("buffered", &self.buffer.len())
            .field("listeners", &self.listeners.len())
            .field("closed", &self.closed)
            .finish()
    }
}
