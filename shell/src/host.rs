//! The syscall surface served by the host operating system.
//!
//! Paths resolve against a working directory kept inside the kernel, not the host
//! process's, and file handles index a table of resolved paths. Spawned children inherit
//! the console and the kernel's working directory.

use crate::command::ExitCode;
use crate::heap::Heap;
use crate::path;
use crate::syscall::{
    DirEntry, FAILURE, FILE_NAME_LEN, Fd, Kernel, Pid, Stat, Syscall, number,
};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use tracing::debug;

pub struct HostKernel {
    cwd: String,
    files: Vec<Option<PathBuf>>,
    handles: HashMap<PathBuf, usize>,
    free: Vec<usize>,
    children: HashMap<Pid, Child>,
    heap: Heap,
}

impl HostKernel {
    /// A kernel starting in the host process's current directory.
    pub fn new() -> io::Result<Self> {
        Self::with_cwd(std::env::current_dir()?)
    }

    pub fn with_cwd(cwd: impl AsRef<Path>) -> io::Result<Self> {
        let cwd = fs::canonicalize(cwd)?;
        let cwd = cwd
            .to_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "cwd is not UTF-8"))?
            .to_string();
        Ok(Self {
            cwd,
            files: Vec::new(),
            handles: HashMap::new(),
            free: Vec::new(),
            children: HashMap::new(),
            heap: Heap::unbounded(),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        PathBuf::from(path::absolute(&self.cwd, path))
    }

    fn handle_for(&mut self, path: PathBuf) -> io::Result<Fd> {
        let id = match self.handles.get(&path) {
            Some(&id) => id,
            None => {
                let id = match self.free.pop() {
                    Some(id) => id,
                    None => {
                        self.files.push(None);
                        self.files.len() - 1
                    }
                };
                self.files[id] = Some(path.clone());
                self.handles.insert(path, id);
                id
            }
        };
        Fd::from_file_id(id).ok_or_else(|| io::Error::other("descriptor table full"))
    }

    /// Forget the handle of a removed path; its slot goes to the next new path.
    fn retire(&mut self, path: &Path) {
        if let Some(id) = self.handles.remove(path) {
            self.files[id] = None;
            self.free.push(id);
        }
    }

    fn path_of(&self, fd: Fd) -> io::Result<&Path> {
        fd.file_id()
            .and_then(|id| self.files.get(id))
            .and_then(Option::as_deref)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "bad descriptor"))
    }

    fn read_at(&mut self, fd: Fd, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        if fd == Fd::STDIN {
            return io::stdin().read(buf);
        }
        let path = self.path_of(fd)?;
        if path.is_dir() {
            return Err(io::Error::other("is a directory"));
        }
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    fn write_at(&mut self, fd: Fd, buf: &[u8], offset: usize) -> io::Result<usize> {
        if fd == Fd::STDOUT || fd == Fd::STDERR {
            let mut stdout = io::stdout().lock();
            stdout.write_all(buf)?;
            stdout.flush()?;
            return Ok(0);
        }
        let mut file = OpenOptions::new().write(true).open(self.path_of(fd)?)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(buf)?;
        Ok(0)
    }

    fn lookup(&mut self, path: &str) -> io::Result<usize> {
        let path = self.resolve(path);
        fs::metadata(&path)?;
        raw(self.handle_for(path)?)
    }

    fn stat_of(&self, fd: Fd, stat: &mut Stat) -> io::Result<usize> {
        let path = self.path_of(fd)?;
        let meta = fs::metadata(path)?;
        *stat = if meta.is_dir() {
            Stat {
                size: fs::read_dir(path)?.count(),
                directory: true,
            }
        } else {
            Stat {
                size: usize::try_from(meta.len()).map_err(io::Error::other)?,
                directory: false,
            }
        };
        Ok(0)
    }

    fn entry_at(&mut self, fd: Fd, offset: usize, entry: &mut DirEntry) -> io::Result<usize> {
        let dir = self.path_of(fd)?.to_path_buf();
        let mut names = fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        let name = names
            .get(offset)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such entry"))?;
        let id = self.handle_for(dir.join(name))?;
        *entry = DirEntry::new(name, id);
        Ok(0)
    }

    fn create(&mut self, path: &str, directory: bool) -> io::Result<usize> {
        let path = self.resolve(path);
        let name_len = path.file_name().map_or(0, |name| name.len());
        if name_len == 0 || name_len > FILE_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "bad file name length",
            ));
        }
        if directory {
            fs::create_dir(&path)?;
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
        }
        raw(self.handle_for(path)?)
    }

    fn unlink(&mut self, path: &str) -> io::Result<usize> {
        let path = self.resolve(path);
        if fs::metadata(&path)?.is_dir() {
            fs::remove_dir(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        self.retire(&path);
        Ok(0)
    }

    fn resize(path: &Path, length: usize) -> io::Result<usize> {
        OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(length as u64)?;
        Ok(0)
    }

    fn spawn(&mut self, path: &str, argv: &[&str]) -> io::Result<usize> {
        let program = self.resolve(path);
        let child = Command::new(&program)
            .args(argv.iter().skip(1))
            .current_dir(&self.cwd)
            .spawn()?;
        let pid = Pid::from_raw(i64::from(child.id()));
        debug!(program = %program.display(), pid = pid.raw(), "spawned host process");
        self.children.insert(pid, child);
        usize::try_from(pid.raw()).map_err(io::Error::other)
    }

    fn reap(&mut self, pid: Pid, status: &mut ExitCode) -> io::Result<usize> {
        let mut child = self
            .children
            .remove(&pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such process"))?;
        let exit_status = child.wait()?;
        *status = match exit_status.code() {
            Some(x) => x,
            None => terminated_by_signal(exit_status),
        };
        Ok(0)
    }

    fn change_dir(&mut self, path: &str) -> io::Result<usize> {
        let resolved = path::absolute(&self.cwd, path);
        if !fs::metadata(&resolved)?.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotADirectory, resolved));
        }
        self.cwd = resolved;
        Ok(0)
    }
}

fn raw(fd: Fd) -> io::Result<usize> {
    usize::try_from(fd.raw()).map_err(io::Error::other)
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}

impl Kernel for HostKernel {
    fn syscall(&mut self, call: Syscall<'_>) -> isize {
        let number = call.number();
        let res = match call {
            Syscall::Read { fd, buf, offset } => self.read_at(fd, buf, offset),
            Syscall::Write { fd, buf, offset } => self.write_at(fd, buf, offset),
            Syscall::Open { path } => self.lookup(path),
            Syscall::Fstat { fd, stat } => self.stat_of(fd, stat),
            Syscall::Waitpid { pid, status } => self.reap(pid, status),
            Syscall::Exec { path, argv } => self.spawn(path, argv),
            Syscall::Exit { status } => std::process::exit(status),
            Syscall::Truncate { path, length } => Self::resize(&self.resolve(path), length),
            Syscall::Ftruncate { fd, length } => {
                self.path_of(fd).and_then(|path| Self::resize(path, length))
            }
            Syscall::GetCurrentDirName { buf } => {
                buf.clear();
                buf.push_str(&self.cwd);
                Ok(0)
            }
            Syscall::Chdir { path } => self.change_dir(path),
            Syscall::Creat { path, directory } => self.create(path, directory),
            Syscall::RemoveFile { path } => self.unlink(path),
            Syscall::ReadDir { fd, offset, entry } => self.entry_at(fd, offset, entry),
        };
        match res.map(isize::try_from) {
            Ok(Ok(word)) => word,
            Ok(Err(_)) => FAILURE,
            Err(err) => {
                debug!(syscall = number::name(number), %err, "host refused");
                FAILURE
            }
        }
    }

    fn heap(&self) -> &Heap {
        &self.heap
    }
}
