//! The syscall gateway.
//!
//! Every kernel operation travels as a [`Syscall`] request: an operation number plus up to
//! six word-sized arguments. A [`Kernel`] serves requests through one entry point,
//! [`Kernel::syscall`], and answers with a single word where `-1` is the failure sentinel.
//! The provided methods on [`Kernel`] build the requests and turn the answer back into a
//! `Result`, so callers never look at raw words.

use crate::command::ExitCode;
use crate::heap::Heap;
use thiserror::Error;
use tracing::{error, trace};

/// Operation numbers understood by the kernel.
pub mod number {
    pub const READ: usize = 0x0;
    pub const WRITE: usize = 0x1;
    pub const OPEN: usize = 0x2;
    pub const FSTAT: usize = 0x5;
    pub const WAITPID: usize = 0x7;
    pub const MALLOC: usize = 0x9;
    pub const CALLOC: usize = 0xa;
    pub const FREE: usize = 0xb;
    pub const REALLOC: usize = 0xc;
    pub const EXEC: usize = 0x3b;
    pub const EXIT: usize = 0x3c;
    pub const TRUNCATE: usize = 0x4c;
    pub const FTRUNCATE: usize = 0x4d;
    pub const GET_CURRENT_DIR_NAME: usize = 0x4f;
    pub const CHDIR: usize = 0x50;
    pub const CREAT: usize = 0x55;
    pub const REMOVE_FILE: usize = 0x57;
    pub const READ_DIR: usize = 0x59;

    /// Human readable name of an operation number, used in logs and error messages.
    pub fn name(number: usize) -> &'static str {
        match number {
            READ => "read",
            WRITE => "write",
            OPEN => "open",
            FSTAT => "fstat",
            WAITPID => "waitpid",
            MALLOC => "malloc",
            CALLOC => "calloc",
            FREE => "free",
            REALLOC => "realloc",
            EXEC => "exec",
            EXIT => "exit",
            TRUNCATE => "truncate",
            FTRUNCATE => "ftruncate",
            GET_CURRENT_DIR_NAME => "get_current_dir_name",
            CHDIR => "chdir",
            CREAT => "creat",
            REMOVE_FILE => "remove_file",
            READ_DIR => "readdir",
            _ => "unknown",
        }
    }
}

/// The word every failing operation answers with.
pub const FAILURE: isize = -1;

/// Width of the name field of a [`DirEntry`].
pub const FILE_NAME_LEN: usize = 11;

/// A file descriptor.
///
/// Descriptors below [`Fd::RESERVED`] are the console streams. Every other descriptor is a
/// file handle: the file's id shifted past the reserved range. A handle found in a
/// [`DirEntry`] can be used directly wherever a descriptor is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(i32);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);
    pub const RESERVED: i32 = 3;

    pub const fn from_raw(raw: i32) -> Self {
        Fd(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Handle for the file with id `id`, or `None` if it does not fit a descriptor.
    pub fn from_file_id(id: usize) -> Option<Self> {
        let raw = i32::try_from(id).ok()?.checked_add(Self::RESERVED)?;
        Some(Fd(raw))
    }

    /// The file id behind this handle, `None` for console streams and negative descriptors.
    pub fn file_id(self) -> Option<usize> {
        usize::try_from(self.0.checked_sub(Self::RESERVED)?).ok()
    }
}

/// Identifier of a spawned process. Disjoint from file handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(i64);

impl Pid {
    pub const fn from_raw(raw: i64) -> Self {
        Pid(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }
}

/// Information about a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes for files, number of entries for directories.
    pub size: usize,
    pub directory: bool,
}

/// One entry of a directory listing.
///
/// The name lives in a fixed-width field padded with NUL bytes; a name that fills the whole
/// field has no terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; FILE_NAME_LEN],
    pub id: Fd,
}

impl DirEntry {
    /// Build an entry, cutting `name` to the field width on a character boundary.
    pub fn new(name: &str, id: Fd) -> Self {
        let mut end = name.len().min(FILE_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut field = [0; FILE_NAME_LEN];
        field[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self { name: field, id }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_LEN);
        std::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    pub fn raw_name(&self) -> &[u8; FILE_NAME_LEN] {
        &self.name
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            name: [0; FILE_NAME_LEN],
            id: Fd(-1),
        }
    }
}

/// A syscall answered with the failure sentinel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{name} failed")]
pub struct SysError {
    pub number: usize,
    pub name: &'static str,
}

impl SysError {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            name: number::name(number),
        }
    }
}

/// A request to the kernel.
///
/// Buffers and out-parameters are borrowed for the duration of the call, the same way a
/// user program hands the kernel pointers into its own memory.
#[derive(Debug)]
pub enum Syscall<'a> {
    Read {
        fd: Fd,
        buf: &'a mut [u8],
        offset: usize,
    },
    Write {
        fd: Fd,
        buf: &'a [u8],
        offset: usize,
    },
    Open {
        path: &'a str,
    },
    Fstat {
        fd: Fd,
        stat: &'a mut Stat,
    },
    Waitpid {
        pid: Pid,
        status: &'a mut ExitCode,
    },
    Exec {
        path: &'a str,
        argv: &'a [&'a str],
    },
    Exit {
        status: ExitCode,
    },
    Truncate {
        path: &'a str,
        length: usize,
    },
    Ftruncate {
        fd: Fd,
        length: usize,
    },
    GetCurrentDirName {
        buf: &'a mut String,
    },
    Chdir {
        path: &'a str,
    },
    Creat {
        path: &'a str,
        directory: bool,
    },
    RemoveFile {
        path: &'a str,
    },
    ReadDir {
        fd: Fd,
        offset: usize,
        entry: &'a mut DirEntry,
    },
}

impl Syscall<'_> {
    pub fn number(&self) -> usize {
        match self {
            Syscall::Read { .. } => number::READ,
            Syscall::Write { .. } => number::WRITE,
            Syscall::Open { .. } => number::OPEN,
            Syscall::Fstat { .. } => number::FSTAT,
            Syscall::Waitpid { .. } => number::WAITPID,
            Syscall::Exec { .. } => number::EXEC,
            Syscall::Exit { .. } => number::EXIT,
            Syscall::Truncate { .. } => number::TRUNCATE,
            Syscall::Ftruncate { .. } => number::FTRUNCATE,
            Syscall::GetCurrentDirName { .. } => number::GET_CURRENT_DIR_NAME,
            Syscall::Chdir { .. } => number::CHDIR,
            Syscall::Creat { .. } => number::CREAT,
            Syscall::RemoveFile { .. } => number::REMOVE_FILE,
            Syscall::ReadDir { .. } => number::READ_DIR,
        }
    }

    /// The six argument words of this request, in register order.
    ///
    /// Strings and slices travel as a pointer followed by a length.
    pub fn args(&self) -> [usize; 6] {
        match self {
            Syscall::Read { fd, buf, offset } => {
                [word(fd.raw()), buf.as_ptr() as usize, buf.len(), *offset, 0, 0]
            }
            Syscall::Write { fd, buf, offset } => {
                [word(fd.raw()), buf.as_ptr() as usize, buf.len(), *offset, 0, 0]
            }
            Syscall::Open { path } | Syscall::Chdir { path } | Syscall::RemoveFile { path } => {
                [path.as_ptr() as usize, path.len(), 0, 0, 0, 0]
            }
            Syscall::Fstat { fd, stat } => {
                [word(fd.raw()), &**stat as *const Stat as usize, 0, 0, 0, 0]
            }
            Syscall::Waitpid { pid, status } => [
                pid.raw() as usize,
                &**status as *const ExitCode as usize,
                0,
                0,
                0,
                0,
            ],
            Syscall::Exec { path, argv } => [
                path.as_ptr() as usize,
                path.len(),
                argv.as_ptr() as usize,
                argv.len(),
                0,
                0,
            ],
            Syscall::Exit { status } => [word(*status), 0, 0, 0, 0, 0],
            Syscall::Truncate { path, length } => {
                [path.as_ptr() as usize, path.len(), *length, 0, 0, 0]
            }
            Syscall::Ftruncate { fd, length } => [word(fd.raw()), *length, 0, 0, 0, 0],
            Syscall::GetCurrentDirName { buf } => {
                [&**buf as *const String as usize, 0, 0, 0, 0, 0]
            }
            Syscall::Creat { path, directory } => [
                path.as_ptr() as usize,
                path.len(),
                usize::from(*directory),
                0,
                0,
                0,
            ],
            Syscall::ReadDir { fd, offset, entry } => [
                word(fd.raw()),
                *offset,
                &**entry as *const DirEntry as usize,
                0,
                0,
                0,
            ],
        }
    }
}

// Sign-extends like a C `int` passed in a 64-bit register.
fn word(value: i32) -> usize {
    value as isize as usize
}

/// Something that serves syscalls: the real kernel behind a trap, the host OS, or an
/// in-memory simulation.
///
/// Implementors provide [`Kernel::syscall`] and [`Kernel::heap`]; everything else is built
/// on top of those two.
pub trait Kernel {
    /// Serve one request. Answers with a non-negative word, or [`FAILURE`].
    ///
    /// [`Syscall::Exit`] ends the calling process and must never return.
    fn syscall(&mut self, call: Syscall<'_>) -> isize;

    /// The heap behind malloc, calloc, realloc and free.
    fn heap(&self) -> &Heap;

    /// Read up to `buf.len()` bytes starting at `offset`. The offset is ignored for STDIN.
    /// Returns the number of bytes read, 0 at end of input.
    fn read(&mut self, fd: Fd, buf: &mut [u8], offset: usize) -> Result<usize, SysError> {
        invoke(self, Syscall::Read { fd, buf, offset })
    }

    /// Write all of `buf` at `offset`. Writing past the end of a file leaves a zero-filled
    /// hole. The offset is ignored for the console.
    fn write(&mut self, fd: Fd, buf: &[u8], offset: usize) -> Result<(), SysError> {
        invoke(self, Syscall::Write { fd, buf, offset }).map(drop)
    }

    fn open(&mut self, path: &str) -> Result<Fd, SysError> {
        invoke(self, Syscall::Open { path }).and_then(|raw| descriptor(number::OPEN, raw))
    }

    fn fstat(&mut self, fd: Fd) -> Result<Stat, SysError> {
        let mut stat = Stat::default();
        invoke(self, Syscall::Fstat { fd, stat: &mut stat })?;
        Ok(stat)
    }

    /// Read the entry at index `offset` of the directory `fd`. No cursor is kept between
    /// calls: listing a directory means asking for every index below its size.
    fn readdir(&mut self, fd: Fd, offset: usize) -> Result<DirEntry, SysError> {
        let mut entry = DirEntry::default();
        invoke(
            self,
            Syscall::ReadDir {
                fd,
                offset,
                entry: &mut entry,
            },
        )?;
        Ok(entry)
    }

    fn creat(&mut self, path: &str, directory: bool) -> Result<Fd, SysError> {
        invoke(self, Syscall::Creat { path, directory })
            .and_then(|raw| descriptor(number::CREAT, raw))
    }

    /// Remove a file, or a directory that is empty.
    fn remove_file(&mut self, path: &str) -> Result<(), SysError> {
        invoke(self, Syscall::RemoveFile { path }).map(drop)
    }

    /// Set the length of a file. Growing zero-fills, shrinking discards.
    fn truncate(&mut self, path: &str, length: usize) -> Result<(), SysError> {
        invoke(self, Syscall::Truncate { path, length }).map(drop)
    }

    fn ftruncate(&mut self, fd: Fd, length: usize) -> Result<(), SysError> {
        invoke(self, Syscall::Ftruncate { fd, length }).map(drop)
    }

    /// Start the program at `path` in a new process. The returned identifier must be
    /// consumed by exactly one [`Kernel::waitpid`].
    fn exec(&mut self, path: &str, argv: &[&str]) -> Result<Pid, SysError> {
        let raw = invoke(self, Syscall::Exec { path, argv })?;
        i64::try_from(raw)
            .map(Pid::from_raw)
            .map_err(|_| SysError::new(number::EXEC))
    }

    /// Block until process `pid` terminates and return its exit status.
    fn waitpid(&mut self, pid: Pid) -> Result<ExitCode, SysError> {
        let mut status = 0;
        invoke(
            self,
            Syscall::Waitpid {
                pid,
                status: &mut status,
            },
        )?;
        Ok(status)
    }

    fn chdir(&mut self, path: &str) -> Result<(), SysError> {
        invoke(self, Syscall::Chdir { path }).map(drop)
    }

    fn get_current_dir_name(&mut self) -> Result<String, SysError> {
        let mut buf = String::new();
        invoke(self, Syscall::GetCurrentDirName { buf: &mut buf })?;
        Ok(buf)
    }

    /// Terminate the calling process.
    ///
    /// # Panics
    ///
    /// If the kernel answers the exit request instead of ending the process.
    fn exit(&mut self, status: ExitCode) -> ! {
        let res = invoke(self, Syscall::Exit { status });
        error!(status, ?res, "exit returned to its caller");
        panic!("exit({status}) returned to its caller")
    }
}

fn invoke<K: Kernel + ?Sized>(kernel: &mut K, call: Syscall<'_>) -> Result<usize, SysError> {
    let number = call.number();
    trace!(
        syscall = number::name(number),
        number,
        args = ?call.args(),
        "trap"
    );
    let res = kernel.syscall(call);
    if res.is_negative() {
        trace!(syscall = number::name(number), res, "failed");
        Err(SysError::new(number))
    } else {
        Ok(res as usize)
    }
}

fn descriptor(number: usize, raw: usize) -> Result<Fd, SysError> {
    i32::try_from(raw)
        .map(Fd::from_raw)
        .map_err(|_| SysError::new(number))
}
