//! User-mode utilities, as program images the in-memory kernel can run.
//!
//! Every program sees only its arguments and the syscall surface. Diagnostics go to the
//! console and the return value becomes the exit status.

use crate::command::{ExitCode, FAILURE, SUCCESS};
use crate::io_adapters::Console;
use crate::reader::{ConsoleReader, LineSource, ReadError};
use crate::syscall::{Fd, Kernel};
use anyhow::{Context, Result};
use std::io::Write;
use tracing::warn;

/// Entry point of a program image: `main(argc, argv)`.
pub type Main = fn(&mut dyn Kernel, &[String]) -> Result<ExitCode>;

/// Every bundled program, by the name it is installed under.
pub const PROGRAMS: &[(&str, Main)] = &[
    ("repeat", repeat),
    ("ls", ls),
    ("cat", cat),
    ("echo", echo),
    ("touch", touch),
    ("mkdir", mkdir),
    ("rm", rm),
    ("rmdir", rmdir),
    ("edit", edit),
];

const REPEAT_COUNT: usize = 50;

/// Run `main` and turn whatever it returns into an exit status.
///
/// An error escaping the program is printed on the console and exits with [`FAILURE`].
pub fn start(main: Main, kernel: &mut dyn Kernel, argv: &[String]) -> ExitCode {
    let program = argv.first().map_or("?", String::as_str);
    match main(kernel, argv) {
        Ok(code) => code,
        Err(err) => {
            warn!(program, error = %err, "program failed");
            if let Err(err) = writeln!(Console::new(kernel), "{program}: {err:#}") {
                warn!(program, error = %err, "console unavailable");
            }
            FAILURE
        }
    }
}

fn usage(kernel: &mut dyn Kernel, text: &str) -> Result<ExitCode> {
    writeln!(Console::new(kernel), "{text}")?;
    Ok(FAILURE)
}

fn repeat(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(text) = argv.get(1) else {
        return usage(kernel, "repeat: missing parameter to print");
    };
    let mut out = Console::new(kernel);
    for _ in 0..REPEAT_COUNT {
        out.write_all(text.as_bytes())?;
    }
    writeln!(out)?;
    Ok(SUCCESS)
}

fn ls(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let dir = argv.get(1).map_or(".", String::as_str);
    let Ok(fd) = kernel.open(dir) else {
        return usage(kernel, &format!("ls: {dir}: directory does not exist"));
    };
    let stat = kernel.fstat(fd)?;
    if !stat.directory {
        return usage(kernel, &format!("ls: {dir}: not a directory"));
    }

    let mut listing = String::new();
    for offset in 0..stat.size {
        let entry = kernel
            .readdir(fd, offset)
            .context("ls: failed to read directory")?;
        let child = kernel
            .fstat(entry.id)
            .context("ls: failed to read directory")?;
        listing.push_str(entry.name());
        if child.directory {
            listing.push('/');
        }
        listing.push('\n');
    }
    Console::new(kernel).write_all(listing.as_bytes())?;
    Ok(SUCCESS)
}

fn cat(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "cat: missing file operand\nUsage: cat <file>");
    };
    let Ok(fd) = kernel.open(path) else {
        return usage(kernel, &format!("cat: {path}: file does not exist"));
    };
    let stat = kernel.fstat(fd)?;
    if stat.directory {
        return usage(kernel, &format!("cat: {path}: is a directory"));
    }

    let mut buf = vec![0; stat.size];
    let n = kernel.read(fd, &mut buf, 0)?;
    buf.truncate(n);
    if buf.last() != Some(&b'\n') {
        buf.push(b'\n');
    }
    kernel.write(Fd::STDOUT, &buf, 0)?;
    Ok(SUCCESS)
}

fn echo(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let words = argv.get(1..).unwrap_or_default();
    writeln!(Console::new(kernel), "{}", words.join(" "))?;
    Ok(SUCCESS)
}

fn touch(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "touch: missing file operand\nUsage: touch <file>");
    };
    if kernel.open(path).is_ok() {
        return Ok(SUCCESS);
    }
    if kernel.creat(path, false).is_err() {
        return usage(kernel, &format!("touch: cannot create {path}"));
    }
    Ok(SUCCESS)
}

fn mkdir(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "mkdir: missing operand\nUsage: mkdir <dir>");
    };
    if kernel.creat(path, true).is_err() {
        return usage(kernel, &format!("mkdir: cannot create directory {path}"));
    }
    Ok(SUCCESS)
}

fn rm(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "rm: missing file operand\nUsage: rm <file>");
    };
    let Ok(fd) = kernel.open(path) else {
        return usage(kernel, &format!("rm: {path}: no such file"));
    };
    if kernel.fstat(fd)?.directory {
        return usage(kernel, &format!("rm: {path}: is a directory, use rmdir"));
    }
    kernel
        .remove_file(path)
        .with_context(|| format!("rm: cannot remove {path}"))?;
    Ok(SUCCESS)
}

fn rmdir(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "rmdir: missing operand\nUsage: rmdir <dir>");
    };
    let Ok(fd) = kernel.open(path) else {
        return usage(kernel, &format!("rmdir: {path}: no such directory"));
    };
    if !kernel.fstat(fd)?.directory {
        return usage(kernel, &format!("rmdir: {path}: not a directory, use rm"));
    }
    if kernel.remove_file(path).is_err() {
        return usage(kernel, &format!("rmdir: {path}: directory not empty"));
    }
    Ok(SUCCESS)
}

/// Replace a file's content with lines typed on the console, up to an empty line.
fn edit(kernel: &mut dyn Kernel, argv: &[String]) -> Result<ExitCode> {
    let Some(path) = argv.get(1) else {
        return usage(kernel, "edit: missing file operand\nUsage: edit <file>");
    };
    let Ok(fd) = kernel.open(path) else {
        return usage(kernel, &format!("edit: {path}: file does not exist"));
    };
    if kernel.fstat(fd)?.directory {
        return usage(kernel, &format!("edit: {path}: is a directory"));
    }

    // one byte per read, so input after the terminating empty line stays with the shell
    let mut input = ConsoleReader::new(1);
    let mut content = String::new();
    loop {
        let line = match input.read_line(kernel, "") {
            Ok(line) => line,
            Err(ReadError::EndOfInput) => break,
            Err(err) => anyhow::bail!("edit: failed to read input ({err})"),
        };
        if line.is_empty() {
            break;
        }
        content.push_str(&line);
        content.push('\n');
    }

    kernel.ftruncate(fd, 0)?;
    kernel.write(fd, content.as_bytes(), 0)?;
    Ok(SUCCESS)
}
