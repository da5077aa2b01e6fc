//! An in-memory kernel.
//!
//! Files and directories live in an inode table, programs are images bound to files, and
//! spawned processes sit in a process table until they are waited for. Waiting runs the
//! child to completion in the child's own working directory. The console is any pair of
//! byte streams, so the same kernel serves tests and interactive sessions.

use crate::command::ExitCode;
use crate::heap::Heap;
use crate::path;
use crate::programs::{self, Main};
use crate::syscall::{
    DirEntry, FAILURE, FILE_NAME_LEN, Fd, Kernel, Pid, Stat, SysError, Syscall, number,
};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::mem;
use tracing::{debug, info};

const ROOT: usize = 0;

enum Data {
    File(Vec<u8>),
    Dir(Vec<usize>),
}

struct Inode {
    name: String,
    parent: usize,
    data: Data,
}

struct Process {
    main: Main,
    argv: Vec<String>,
    cwd: String,
}

pub struct SimKernel {
    inodes: Vec<Option<Inode>>,
    images: HashMap<usize, Main>,
    processes: BTreeMap<i64, Process>,
    next_pid: i64,
    cwd: String,
    console_in: Box<dyn Read>,
    console_out: Box<dyn Write>,
    heap: Heap,
}

impl SimKernel {
    /// A kernel with an empty root directory and nothing installed.
    pub fn new(console_in: impl Read + 'static, console_out: impl Write + 'static) -> Self {
        let root = Inode {
            name: String::new(),
            parent: ROOT,
            data: Data::Dir(Vec::new()),
        };
        Self {
            inodes: vec![Some(root)],
            images: HashMap::new(),
            processes: BTreeMap::new(),
            next_pid: 0,
            cwd: "/".to_string(),
            console_in: Box::new(console_in),
            console_out: Box::new(console_out),
            heap: Heap::unbounded(),
        }
    }

    /// A kernel with `/tmp` and every bundled program installed at `/<name>`.
    pub fn booted(console_in: impl Read + 'static, console_out: impl Write + 'static) -> Self {
        let mut kernel = Self::new(console_in, console_out);
        let mut boot = || -> Result<(), SysError> {
            kernel.creat("/tmp", true)?;
            for &(name, main) in programs::PROGRAMS {
                kernel.install(&format!("/{name}"), main)?;
            }
            Ok(())
        };
        if let Err(err) = boot() {
            debug!(%err, "boot incomplete");
        }
        kernel
    }

    /// Create a file at `path` and bind a program image to it.
    pub fn install(&mut self, path: &str, main: Main) -> Result<Fd, SysError> {
        let fd = self.creat(path, false)?;
        if let Some(id) = fd.file_id() {
            self.images.insert(id, main);
        }
        Ok(fd)
    }

    /// Processes spawned but not waited for yet.
    pub fn running(&self) -> usize {
        self.processes.len()
    }

    /// Contents of the file at `path`, for inspection.
    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        match &self.inode(self.lookup(path)?)?.data {
            Data::File(bytes) => Some(bytes),
            Data::Dir(_) => None,
        }
    }

    fn inode(&self, id: usize) -> Option<&Inode> {
        self.inodes.get(id)?.as_ref()
    }

    fn inode_mut(&mut self, id: usize) -> Option<&mut Inode> {
        self.inodes.get_mut(id)?.as_mut()
    }

    fn children(&self, id: usize) -> Option<&[usize]> {
        match &self.inode(id)?.data {
            Data::Dir(children) => Some(children),
            Data::File(_) => None,
        }
    }

    fn lookup(&self, path: &str) -> Option<usize> {
        let absolute = path::absolute(&self.cwd, path);
        path::components(&absolute).try_fold(ROOT, |dir, name| {
            self.children(dir)?
                .iter()
                .copied()
                .find(|&child| self.inode(child).is_some_and(|inode| inode.name == name))
        })
    }

    fn handle(&self, fd: Fd) -> Option<usize> {
        let id = fd.file_id()?;
        self.inode(id).map(|_| id)
    }

    fn file_mut(&mut self, id: usize) -> Option<&mut Vec<u8>> {
        match &mut self.inode_mut(id)?.data {
            Data::File(bytes) => Some(bytes),
            Data::Dir(_) => None,
        }
    }

    fn read_at(&mut self, fd: Fd, buf: &mut [u8], offset: usize) -> Option<isize> {
        if fd == Fd::STDIN {
            return self.console_in.read(buf).ok().map(|n| n as isize);
        }
        let id = self.handle(fd)?;
        let Data::File(bytes) = &self.inode(id)?.data else {
            return None;
        };
        let available = bytes.get(offset..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Some(n as isize)
    }

    fn write_at(&mut self, fd: Fd, buf: &[u8], offset: usize) -> Option<isize> {
        if fd == Fd::STDOUT || fd == Fd::STDERR {
            self.console_out.write_all(buf).ok()?;
            self.console_out.flush().ok()?;
            return Some(0);
        }
        let id = self.handle(fd)?;
        let bytes = self.file_mut(id)?;
        let end = offset.checked_add(buf.len())?;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(buf);
        Some(0)
    }

    fn descriptor(id: usize) -> Option<isize> {
        Fd::from_file_id(id).map(|fd| fd.raw() as isize)
    }

    fn stat_of(&self, fd: Fd, stat: &mut Stat) -> Option<isize> {
        let inode = self.inode(self.handle(fd)?)?;
        *stat = match &inode.data {
            Data::File(bytes) => Stat {
                size: bytes.len(),
                directory: false,
            },
            Data::Dir(children) => Stat {
                size: children.len(),
                directory: true,
            },
        };
        Some(0)
    }

    fn entry_at(&self, fd: Fd, offset: usize, entry: &mut DirEntry) -> Option<isize> {
        let child = *self.children(self.handle(fd)?)?.get(offset)?;
        *entry = DirEntry::new(&self.inode(child)?.name, Fd::from_file_id(child)?);
        Some(0)
    }

    fn create(&mut self, path: &str, directory: bool) -> Option<isize> {
        let absolute = path::absolute(&self.cwd, path);
        let (parent_path, name) = path::split_last(&absolute)?;
        if name.len() > FILE_NAME_LEN || self.lookup(&absolute).is_some() {
            return None;
        }
        let parent = self.lookup(parent_path)?;
        self.children(parent)?;

        let id = self.inodes.len();
        self.inodes.push(Some(Inode {
            name: name.to_string(),
            parent,
            data: if directory {
                Data::Dir(Vec::new())
            } else {
                Data::File(Vec::new())
            },
        }));
        if let Some(Inode {
            data: Data::Dir(children),
            ..
        }) = self.inode_mut(parent)
        {
            children.push(id);
        }
        Self::descriptor(id)
    }

    fn unlink(&mut self, path: &str) -> Option<isize> {
        let id = self.lookup(path)?;
        if id == ROOT || self.children(id).is_some_and(|children| !children.is_empty()) {
            return None;
        }
        let parent = self.inode(id)?.parent;
        if let Some(Inode {
            data: Data::Dir(children),
            ..
        }) = self.inode_mut(parent)
        {
            children.retain(|&child| child != id);
        }
        self.inodes[id] = None;
        self.images.remove(&id);
        Some(0)
    }

    fn resize(&mut self, id: usize, length: usize) -> Option<isize> {
        self.file_mut(id)?.resize(length, 0);
        Some(0)
    }

    fn spawn(&mut self, path: &str, argv: &[&str]) -> Option<isize> {
        let id = self.lookup(path)?;
        let main = *self.images.get(&id)?;
        let pid = self.next_pid;
        self.next_pid += 1;
        self.processes.insert(
            pid,
            Process {
                main,
                argv: argv.iter().map(ToString::to_string).collect(),
                cwd: self.cwd.clone(),
            },
        );
        info!(path, pid, "process created");
        isize::try_from(pid).ok()
    }

    fn reap(&mut self, pid: Pid, status: &mut ExitCode) -> Option<isize> {
        let process = self.processes.remove(&pid.raw())?;
        let parent_cwd = mem::replace(&mut self.cwd, process.cwd);
        let code = programs::start(process.main, self, &process.argv);
        self.cwd = parent_cwd;
        info!(pid = pid.raw(), code, "process reaped");
        *status = code;
        Some(0)
    }

    fn change_dir(&mut self, path: &str) -> Option<isize> {
        let id = self.lookup(path)?;
        self.children(id)?;
        self.cwd = path::absolute(&self.cwd, path);
        Some(0)
    }
}

impl Kernel for SimKernel {
    fn syscall(&mut self, call: Syscall<'_>) -> isize {
        let number = call.number();
        let res = match call {
            Syscall::Read { fd, buf, offset } => self.read_at(fd, buf, offset),
            Syscall::Write { fd, buf, offset } => self.write_at(fd, buf, offset),
            Syscall::Open { path } => self.lookup(path).and_then(Self::descriptor),
            Syscall::Fstat { fd, stat } => self.stat_of(fd, stat),
            Syscall::Waitpid { pid, status } => self.reap(pid, status),
            Syscall::Exec { path, argv } => self.spawn(path, argv),
            Syscall::Exit { status } => std::process::exit(status),
            Syscall::Truncate { path, length } => self
                .lookup(path)
                .and_then(|id| self.resize(id, length)),
            Syscall::Ftruncate { fd, length } => self
                .handle(fd)
                .and_then(|id| self.resize(id, length)),
            Syscall::GetCurrentDirName { buf } => {
                buf.clear();
                buf.push_str(&self.cwd);
                Some(0)
            }
            Syscall::Chdir { path } => self.change_dir(path),
            Syscall::Creat { path, directory } => self.create(path, directory),
            Syscall::RemoveFile { path } => self.unlink(path),
            Syscall::ReadDir { fd, offset, entry } => self.entry_at(fd, offset, entry),
        };
        res.unwrap_or_else(|| {
            debug!(syscall = number::name(number), "refused");
            FAILURE
        })
    }

    fn heap(&self) -> &Heap {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{MemReader, MemWriter};
    use pretty_assertions::assert_eq;

    fn kernel() -> SimKernel {
        SimKernel::new(MemReader::default(), MemWriter::new())
    }

    #[test]
    fn test_root_is_an_empty_directory() {
        let mut k = kernel();
        let fd = k.open("/").unwrap();
        assert_eq!(fd.raw(), 3);
        assert_eq!(
            k.fstat(fd).unwrap(),
            Stat {
                size: 0,
                directory: true
            }
        );
    }

    #[test]
    fn test_creat_then_list() {
        let mut k = kernel();
        let dir = k.creat("/docs", true).unwrap();
        let file = k.creat("/docs/a.txt", false).unwrap();

        assert_eq!(k.fstat(dir).unwrap().size, 1);
        let entry = k.readdir(dir, 0).unwrap();
        assert_eq!(entry.name(), "a.txt");
        assert_eq!(entry.id, file);
        assert!(k.readdir(dir, 1).is_err());
    }

    #[test]
    fn test_entry_id_is_a_usable_descriptor() {
        let mut k = kernel();
        let file = k.creat("/f", false).unwrap();
        k.write(file, b"hello", 0).unwrap();

        let root = k.open("/").unwrap();
        let entry = k.readdir(root, 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(k.read(entry.id, &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_creat_refuses_duplicates_long_names_and_missing_parents() {
        let mut k = kernel();
        k.creat("/a", false).unwrap();
        assert!(k.creat("/a", false).is_err());
        assert!(k.creat("/abcdefghijkl", false).is_err());
        assert!(k.creat("/abcdefghijk", false).is_ok());
        assert!(k.creat("/missing/b", false).is_err());
        assert!(k.creat("/a/b", false).is_err());
        assert!(k.creat("/", true).is_err());
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut k = kernel();
        let fd = k.creat("/f", false).unwrap();
        k.write(fd, b"ab", 0).unwrap();
        k.write(fd, b"z", 4).unwrap();
        assert_eq!(k.contents("/f").unwrap(), b"ab\0\0z");

        let mut buf = [0u8; 4];
        assert_eq!(k.read(fd, &mut buf, 9).unwrap(), 0);
    }

    #[test]
    fn test_reading_a_directory_fails() {
        let mut k = kernel();
        let fd = k.open("/").unwrap();
        let mut buf = [0u8; 4];
        assert!(k.read(fd, &mut buf, 0).is_err());
    }

    #[test]
    fn test_truncate_grows_and_shrinks() {
        let mut k = kernel();
        let fd = k.creat("/f", false).unwrap();
        k.write(fd, b"abcdef", 0).unwrap();
        k.truncate("/f", 3).unwrap();
        assert_eq!(k.contents("/f").unwrap(), b"abc");
        k.ftruncate(fd, 5).unwrap();
        assert_eq!(k.contents("/f").unwrap(), b"abc\0\0");
        assert!(k.truncate("/", 0).is_err());
    }

    #[test]
    fn test_remove_only_empty_directories() {
        let mut k = kernel();
        k.creat("/d", true).unwrap();
        k.creat("/d/f", false).unwrap();
        assert!(k.remove_file("/d").is_err());
        k.remove_file("/d/f").unwrap();
        k.remove_file("/d").unwrap();
        assert!(k.open("/d").is_err());
        assert!(k.remove_file("/").is_err());
        let root = k.open("/").unwrap();
        assert_eq!(k.fstat(root).unwrap().size, 0);
    }

    #[test]
    fn test_relative_paths_follow_cwd() {
        let mut k = kernel();
        k.creat("/d", true).unwrap();
        k.chdir("d").unwrap();
        k.creat("f", false).unwrap();
        assert!(k.open("/d/f").is_ok());
        k.chdir("..").unwrap();
        assert_eq!(k.get_current_dir_name().unwrap(), "/");
        assert!(k.chdir("/d/f").is_err());
        assert!(k.chdir("/nope").is_err());
        assert_eq!(k.get_current_dir_name().unwrap(), "/");
    }

    #[test]
    fn test_waitpid_consumes_identifier() {
        let (out, handle) = MemWriter::with_handle();
        let mut k = SimKernel::booted(MemReader::default(), out);

        let first = k.exec("/repeat", &["/repeat", "a"]).unwrap();
        let second = k.exec("/repeat", &["/repeat", "b"]).unwrap();
        assert_ne!(first, second);
        assert_eq!(k.running(), 2);

        assert_eq!(k.waitpid(second).unwrap(), 0);
        assert_eq!(k.waitpid(first).unwrap(), 0);
        assert!(k.waitpid(first).is_err());
        assert!(k.waitpid(Pid::from_raw(-1)).is_err());
        assert!(k.waitpid(Pid::from_raw(99)).is_err());

        let expected = format!("{}\n{}\n", "b".repeat(50), "a".repeat(50));
        assert_eq!(String::from_utf8(handle.borrow().clone()).unwrap(), expected);
    }

    #[test]
    fn test_exec_requires_program_image() {
        let mut k = SimKernel::booted(MemReader::default(), MemWriter::new());
        k.creat("/plain", false).unwrap();
        assert!(k.exec("/plain", &["/plain"]).is_err());
        assert!(k.exec("/tmp", &["/tmp"]).is_err());
        assert!(k.exec("/nope", &["/nope"]).is_err());
    }

    fn print_cwd(kernel: &mut dyn Kernel, _argv: &[String]) -> anyhow::Result<ExitCode> {
        let cwd = kernel.get_current_dir_name()?;
        kernel.chdir("/")?;
        kernel.write(Fd::STDOUT, cwd.as_bytes(), 0)?;
        Ok(7)
    }

    #[test]
    fn test_child_inherits_cwd_without_changing_parent() {
        let (out, handle) = MemWriter::with_handle();
        let mut k = SimKernel::booted(MemReader::default(), out);
        k.install("/pcwd", print_cwd).unwrap();

        k.chdir("/tmp").unwrap();
        let pid = k.exec("/pcwd", &["/pcwd"]).unwrap();
        assert_eq!(k.waitpid(pid).unwrap(), 7);

        assert_eq!(handle.borrow().as_slice(), b"/tmp");
        assert_eq!(k.get_current_dir_name().unwrap(), "/tmp");
    }

    #[test]
    fn test_booted_layout() {
        let mut k = SimKernel::booted(MemReader::default(), MemWriter::new());
        let root = k.open("/").unwrap();
        let size = k.fstat(root).unwrap().size;
        let names: Vec<String> = (0..size)
            .map(|i| k.readdir(root, i).unwrap().name().to_string())
            .collect();
        assert_eq!(names[0], "tmp");
        assert!(names.iter().any(|n| n == "repeat"));
        assert_eq!(names.len(), 1 + programs::PROGRAMS.len());
    }
}
