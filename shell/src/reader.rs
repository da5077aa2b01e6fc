//! Reading one command line from the console.

use crate::heap::{AllocError, Allocation, Heap};
use crate::syscall::{Fd, Kernel, SysError};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fmt;
use std::ops::Deref;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("out of memory while reading the command")]
    Alloc(#[from] AllocError),
    #[error("console read failed")]
    Io(#[from] SysError),
    #[error("command is not valid UTF-8")]
    Encoding,
    #[error("end of input")]
    EndOfInput,
    #[error("line editor failed: {0}")]
    Editor(#[from] ReadlineError),
}

/// One command line without its terminating newline.
///
/// The text is backed by a block on the user heap, freed when the line is dropped.
#[derive(Debug)]
pub struct Line {
    text: String,
    _block: Allocation,
}

impl Line {
    /// Copy `text` into a line charged to `heap`.
    pub fn copy_from(heap: &Heap, text: &str) -> Result<Self, AllocError> {
        let block = heap.malloc(text.len())?;
        let mut owned = String::new();
        owned.try_reserve_exact(text.len())?;
        owned.push_str(text);
        Ok(Self {
            text: owned,
            _block: block,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for Line {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Where the shell gets its commands from.
pub trait LineSource {
    /// Show `prompt` and block until a full line is available.
    ///
    /// Fails with [`ReadError::EndOfInput`] once the input is exhausted. Any other error
    /// leaves no partial line behind.
    fn read_line(&mut self, kernel: &mut dyn Kernel, prompt: &str) -> Result<Line, ReadError>;
}

/// Reads the console through the read syscall.
///
/// Bytes are fetched in batches of `chunk`; whatever follows the newline is kept for the
/// next call. The line buffer starts at one byte and doubles whenever it is full. A line
/// that runs out of memory is dropped through its newline, and the lines behind it are kept.
pub struct ConsoleReader {
    chunk: usize,
    pending: Vec<u8>,
    cursor: usize,
    skipping: bool,
}

impl ConsoleReader {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
            pending: Vec::new(),
            cursor: 0,
            skipping: false,
        }
    }

    fn next_byte(&mut self, kernel: &mut dyn Kernel) -> Result<Option<u8>, SysError> {
        if self.cursor == self.pending.len() {
            self.pending.resize(self.chunk, 0);
            self.cursor = 0;
            let count = match kernel.read(Fd::STDIN, &mut self.pending, 0) {
                Ok(count) => count,
                Err(err) => {
                    self.pending.clear();
                    return Err(err);
                }
            };
            trace!(count, "console batch");
            self.pending.truncate(count);
            if count == 0 {
                return Ok(None);
            }
        }
        let byte = self.pending[self.cursor];
        self.cursor += 1;
        Ok(Some(byte))
    }

    /// Consume the rest of a line abandoned by an earlier call.
    fn finish_skip(&mut self, kernel: &mut dyn Kernel) -> Result<(), SysError> {
        while self.skipping {
            match self.next_byte(kernel)? {
                Some(b'\n') | None => self.skipping = false,
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn fill_line(&mut self, kernel: &mut dyn Kernel) -> Result<Line, ReadError> {
        self.finish_skip(kernel)?;

        let heap = kernel.heap().clone();
        let mut block = heap.malloc(1)?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(1).map_err(AllocError::from)?;

        loop {
            let Some(byte) = self.next_byte(kernel)? else {
                if bytes.is_empty() {
                    return Err(ReadError::EndOfInput);
                }
                debug!(len = bytes.len(), "input ended without newline");
                break;
            };
            if byte == b'\n' {
                break;
            }
            if bytes.len() == block.size() {
                if let Err(err) = grow(&mut block, &mut bytes) {
                    debug!(len = bytes.len(), "line dropped, out of memory");
                    self.skipping = true;
                    return Err(err.into());
                }
            }
            bytes.push(byte);
        }

        let text = String::from_utf8(bytes).map_err(|_| ReadError::Encoding)?;
        Ok(Line {
            text,
            _block: block,
        })
    }
}

fn grow(block: &mut Allocation, bytes: &mut Vec<u8>) -> Result<(), AllocError> {
    let grown = block.size().checked_mul(2).ok_or(AllocError)?;
    block.realloc(grown)?;
    bytes.try_reserve_exact(grown - bytes.len())?;
    Ok(())
}

impl LineSource for ConsoleReader {
    fn read_line(&mut self, kernel: &mut dyn Kernel, prompt: &str) -> Result<Line, ReadError> {
        if !prompt.is_empty() {
            kernel.write(Fd::STDOUT, prompt.as_bytes(), 0)?;
        }
        self.fill_line(kernel)
    }
}

/// Interactive line editing with history, for terminals.
///
/// Ctrl-C abandons the current line, Ctrl-D ends the input.
pub struct EditorReader {
    editor: DefaultEditor,
}

impl EditorReader {
    pub fn new() -> Result<Self, ReadError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorReader {
    fn read_line(&mut self, kernel: &mut dyn Kernel, prompt: &str) -> Result<Line, ReadError> {
        let text = match self.editor.readline(prompt) {
            Ok(text) => text,
            Err(ReadlineError::Interrupted) => String::new(),
            Err(ReadlineError::Eof) => return Err(ReadError::EndOfInput),
            Err(err) => return Err(err.into()),
        };
        if !text.is_empty() {
            self.editor.add_history_entry(text.as_str())?;
        }
        Ok(Line::copy_from(kernel.heap(), &text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{MemReader, MemWriter};
    use crate::sim::SimKernel;
    use pretty_assertions::assert_eq;

    fn kernel(input: MemReader) -> SimKernel {
        SimKernel::new(input, MemWriter::new())
    }

    #[test]
    fn test_strips_newline() {
        let mut kernel = kernel(MemReader::new(b"ls -a\n".to_vec()));
        let mut reader = ConsoleReader::new(64);
        let line = reader.read_line(&mut kernel, "").unwrap();
        assert_eq!(line.as_str(), "ls -a");
    }

    #[test]
    fn test_keeps_rest_of_batch_for_next_line() {
        let mut kernel = kernel(MemReader::new(b"one\ntwo\nthree".to_vec()));
        let mut reader = ConsoleReader::new(64);
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "one");
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "two");
        // final line without newline still counts
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "three");
        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::EndOfInput)
        ));
    }

    #[test]
    fn test_line_spans_several_batches() {
        let mut kernel = kernel(MemReader::script(["abc", "def", "gh\n"]));
        let mut reader = ConsoleReader::new(2);
        let line = reader.read_line(&mut kernel, "").unwrap();
        assert_eq!(line.as_str(), "abcdefgh");
    }

    #[test]
    fn test_empty_line() {
        let mut kernel = kernel(MemReader::new(b"\n".to_vec()));
        let mut reader = ConsoleReader::new(64);
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "");
    }

    #[test]
    fn test_prompt_goes_to_console() {
        let (out, handle) = MemWriter::with_handle();
        let mut kernel = SimKernel::new(MemReader::new(b"x\n".to_vec()), out);
        let mut reader = ConsoleReader::new(64);
        reader.read_line(&mut kernel, "$ ").unwrap();
        assert_eq!(handle.borrow().as_slice(), b"$ ");
    }

    #[test]
    fn test_buffer_doubles() {
        let mut kernel = kernel(MemReader::new(b"hello\n".to_vec()));
        let mut reader = ConsoleReader::new(64);
        let line = reader.read_line(&mut kernel, "").unwrap();
        // 1 -> 2 -> 4 -> 8
        assert_eq!(kernel.heap().in_use(), 8);
        drop(line);
        assert_eq!(kernel.heap().in_use(), 0);
    }

    #[test]
    fn test_allocation_failure_frees_partial_line() {
        let mut kernel = kernel(MemReader::new(b"abcdef\nnext\n".to_vec()));
        kernel.heap().set_limit(Some(4));
        let mut reader = ConsoleReader::new(64);

        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::Alloc(_))
        ));
        assert_eq!(kernel.heap().live_blocks(), 0);

        kernel.heap().set_limit(None);
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "next");
    }

    #[test]
    fn test_dropped_line_spanning_batches() {
        let mut kernel = kernel(MemReader::new(b"abcdefgh\npwd\n".to_vec()));
        kernel.heap().set_limit(Some(4));
        let mut reader = ConsoleReader::new(3);

        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::Alloc(_))
        ));
        kernel.heap().set_limit(None);
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "pwd");
        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::EndOfInput)
        ));
    }

    #[test]
    fn test_read_failure_frees_partial_line() {
        let mut kernel = kernel(MemReader::script(["par"]).then_fault().then("ok\n"));
        let mut reader = ConsoleReader::new(64);

        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::Io(_))
        ));
        assert_eq!(kernel.heap().live_blocks(), 0);
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "ok");
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut kernel = kernel(MemReader::new(vec![0xff, 0xfe, b'\n']));
        let mut reader = ConsoleReader::new(64);
        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::Encoding)
        ));
        assert_eq!(kernel.heap().live_blocks(), 0);
    }

    #[test]
    fn test_line_after_invalid_utf8_survives() {
        let mut kernel = kernel(MemReader::new(b"\xff\npwd\n".to_vec()));
        let mut reader = ConsoleReader::new(64);
        assert!(matches!(
            reader.read_line(&mut kernel, ""),
            Err(ReadError::Encoding)
        ));
        assert_eq!(reader.read_line(&mut kernel, "").unwrap().as_str(), "pwd");
    }

    #[test]
    fn test_copy_from_charges_heap() {
        let heap = Heap::with_limit(3);
        assert!(Line::copy_from(&heap, "abcd").is_err());
        let line = Line::copy_from(&heap, "abc").unwrap();
        assert_eq!(&*line, "abc");
        assert_eq!(heap.live_blocks(), 1);
    }
}
