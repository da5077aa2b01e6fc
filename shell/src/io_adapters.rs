use crate::syscall::{Fd, Kernel};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Result as IoResult, Write};
use std::rc::Rc;

/// `io::Write` over the console.
///
/// Every write becomes one write syscall on STDOUT, so `write!` and friends work against
/// any [`Kernel`].
pub struct Console<'k, K: ?Sized> {
    kernel: &'k mut K,
}

impl<'k, K: Kernel + ?Sized> Console<'k, K> {
    pub fn new(kernel: &'k mut K) -> Self {
        Self { kernel }
    }
}

impl<K: Kernel + ?Sized> Write for Console<'_, K> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.kernel
            .write(Fd::STDOUT, data, 0)
            .map_err(io::Error::other)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

enum Chunk {
    Data(Vec<u8>),
    Fault,
}

/// Memory-backed console input.
///
/// Input is a queue of chunks. A single read never crosses a chunk boundary, the way a
/// terminal hands over one typed line per read. A fault chunk fails exactly one read.
#[derive(Default)]
pub struct MemReader {
    chunks: VecDeque<Chunk>,
}

impl MemReader {
    /// Create a MemReader that will read from the provided buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self::default().then(buf)
    }

    /// One chunk per item.
    pub fn script<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        chunks
            .into_iter()
            .fold(Self::default(), |reader, chunk| reader.then(chunk))
    }

    pub fn then(mut self, data: impl AsRef<[u8]>) -> Self {
        self.chunks.push_back(Chunk::Data(data.as_ref().to_vec()));
        self
    }

    /// Fail the read that reaches this point.
    pub fn then_fault(mut self) -> Self {
        self.chunks.push_back(Chunk::Fault);
        self
    }
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        loop {
            match self.chunks.front_mut() {
                None => return Ok(0),
                Some(Chunk::Fault) => {
                    self.chunks.pop_front();
                    return Err(io::Error::other("console fault"));
                }
                Some(Chunk::Data(data)) if data.is_empty() => {
                    self.chunks.pop_front();
                }
                Some(Chunk::Data(data)) => {
                    let n = data.len().min(out.len());
                    out[..n].copy_from_slice(&data[..n]);
                    data.drain(..n);
                    if data.is_empty() {
                        self.chunks.pop_front();
                    }
                    return Ok(n);
                }
            }
        }
    }
}

/// Memory-backed writer for capturing console output.
#[derive(Default)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return inner Rc so caller can read collected bytes after execution.
    pub fn into_inner(self) -> Rc<RefCell<Vec<u8>>> {
        self.buf
    }

    /// Convenience: create writer and return (writer, rc_handle).
    pub fn with_handle() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let mw = MemWriter::new();
        let rc = mw.buf.clone();
        (mw, rc)
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}
