//! The user-facing output sink.
//!
//! A [`Printer`] is handed to the renderer when it is built. Rendered
//! resources go to its `out` stream; warnings and errors meant for the
//! user go to `err`. Tracing output is separate and never passes through
//! here.

use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

fn sink(writer: impl Write + Send + 'static) -> Sink {
    Arc::new(Mutex::new(Box::new(writer)))
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "printer stream lock poisoned")
}

/// Shared handles to the output and error streams.
#[derive(Clone)]
pub struct Printer {
    out: Sink,
    err: Sink,
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer").finish_non_exhaustive()
    }
}

impl Printer {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: sink(out),
            err: sink(err),
        }
    }

    /// Process stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// In-memory streams, returned alongside the printer for inspection.
    pub fn buffered() -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        (Self::new(out.clone(), err.clone()), out, err)
    }

    /// Run `f` with exclusive access to the output stream.
    pub fn with_out<R>(&self, f: impl FnOnce(&mut dyn Write) -> R) -> io::Result<R> {
        let mut out = self.out.lock().map_err(|_| poisoned())?;
        Ok(f(out.as_mut()))
    }

    pub fn write_out(&self, bytes: &[u8]) -> io::Result<()> {
        self.with_out(|out| {
            out.write_all(bytes)?;
            out.flush()
        })?
    }

    /// Print `[WARN] <message>` on the error stream.
    pub fn warn(&self, message: impl std::fmt::Display) -> io::Result<()> {
        self.write_err_line("[WARN]", message)
    }

    /// Print `[ERROR] <message>` on the error stream.
    pub fn error(&self, message: impl std::fmt::Display) -> io::Result<()> {
        self.write_err_line("[ERROR]", message)
    }

    fn write_err_line(&self, tag: &str, message: impl std::fmt::Display) -> io::Result<()> {
        let mut err = self.err.lock().map_err(|_| poisoned())?;
        writeln!(err, "{tag} {message}")?;
        err.flush()
    }
}

/// Cloneable in-memory writer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().map_err(|_| poisoned())?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Cut `text` to at most `limit` bytes for display, on a char boundary,
/// appending a marker with the number of bytes dropped.
pub fn truncate_output(text: &str, limit: usize) -> Cow<'_, str> {
    if text.len() <= limit {
        return Cow::Borrowed(text);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!(
        "{}...({} bytes truncated)",
        &text[..end],
        text.len() - end
    ))
}
