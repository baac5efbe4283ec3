use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

/// Shared diagnostics sink, written to by every worker thread.
#[derive(Clone)]
pub struct ErrorStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ErrorStream {
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Error stream writing to the process' stderr.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write a full error report, including its chain of causes, as one entry.
    pub fn report(&self, error: &(dyn std::error::Error + 'static)) -> io::Result<()> {
        let mut entry = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            entry.push_str(": ");
            entry.push_str(&cause.to_string());
            source = cause.source();
        }
        entry.push('\n');

        let mut inner = self.inner.lock();
        inner.write_all(entry.as_bytes())?;
        inner.flush()
    }

    /// Flush the stream, and discard anything written to it afterwards.
    pub fn close(&self) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.flush()?;
        *inner = Box::new(io::sink());
        Ok(())
    }
}

impl Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl fmt::Debug for ErrorStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorStream")
    }
}
