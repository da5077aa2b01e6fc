use crate::builtin::Builtins;
use crate::command::{ExitCode, FAILURE};
use crate::external::{ExecutablePrefixes, handle_executable};
use crate::io_adapters::Console;
use crate::lexer::{Token, TokenArray, parse_command};
use crate::reader::{ConsoleReader, LineSource, ReadError};
use crate::syscall::Kernel;
use std::error::Error;
use std::io::Write;
use tracing::{debug, trace, warn};

/// Printed whenever a command line could not be read or split into words.
pub const READ_FAILED: &str = "shell: failed to read the command";

/// Knobs of the command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    pub executable_prefixes: ExecutablePrefixes,
    /// Bytes requested from the console per read.
    pub read_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: "$ ".to_string(),
            executable_prefixes: ExecutablePrefixes::default(),
            read_chunk: 64,
        }
    }
}

/// What one pass through the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The line had no words.
    Empty,
    /// A command ran to completion with this exit code.
    Completed(ExitCode),
    /// The line could not be read or tokenized; a diagnostic was printed.
    Rejected,
    EndOfInput,
}

/// The command loop.
///
/// Each pass prompts, reads a line, splits it into words, classifies the first word and
/// dispatches to a builtin or to a spawned executable. The line and every token are freed
/// before the pass ends, whichever path ran.
///
/// Example
/// ```
/// use yos_shell::{Config, MemReader, MemWriter, Outcome, Shell, SimKernel};
/// let kernel = SimKernel::booted(MemReader::new(b"cd /tmp\n".to_vec()), MemWriter::new());
/// let mut sh = Shell::new(kernel, Config::default());
/// assert_eq!(sh.step(), Outcome::Completed(0));
/// ```
pub struct Shell<K> {
    kernel: K,
    input: Box<dyn LineSource>,
    builtins: Builtins,
    prefixes: ExecutablePrefixes,
    prompt: String,
}

impl<K: Kernel> Shell<K> {
    /// A shell reading the console through the read syscall.
    pub fn new(kernel: K, config: Config) -> Self {
        Self {
            kernel,
            input: Box::new(ConsoleReader::new(config.read_chunk)),
            builtins: Builtins::default(),
            prefixes: config.executable_prefixes,
            prompt: config.prompt,
        }
    }

    pub fn with_input(mut self, input: Box<dyn LineSource>) -> Self {
        self.input = input;
        self
    }

    pub fn with_builtins(mut self, builtins: Builtins) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn into_kernel(self) -> K {
        self.kernel
    }

    /// Run passes until the input is exhausted.
    pub fn run(&mut self) {
        while self.step() != Outcome::EndOfInput {}
        debug!("end of input");
    }

    /// One pass: prompt, read, tokenize, classify, dispatch, clean up.
    pub fn step(&mut self) -> Outcome {
        trace!(state = "read");
        let line = match self.input.read_line(&mut self.kernel, &self.prompt) {
            Ok(line) => line,
            Err(ReadError::EndOfInput) => return Outcome::EndOfInput,
            Err(err) => return self.reject(&err),
        };

        trace!(state = "tokenize");
        let tokens = match parse_command(&line, self.kernel.heap()) {
            Ok(tokens) => tokens,
            Err(err) => return self.reject(&err),
        };
        drop(line);

        if tokens.is_empty() {
            return Outcome::Empty;
        }
        let code = self.dispatch(&tokens);
        trace!(state = "cleanup");
        Outcome::Completed(code)
    }

    fn dispatch(&mut self, tokens: &TokenArray) -> ExitCode {
        let argv: Vec<&str> = tokens.iter().map(Token::as_str).collect();
        let executable = self.prefixes.matching(argv[0]);
        debug!(command = argv[0], prefix = ?executable, "classified");

        let result = match executable {
            Some(_) => handle_executable(&mut self.kernel, &argv),
            None => self.builtins.dispatch(&mut self.kernel, &argv),
        };
        result.unwrap_or_else(|err| {
            warn!(command = argv[0], error = %err, "dispatch failed");
            FAILURE
        })
    }

    fn reject(&mut self, err: &dyn Error) -> Outcome {
        warn!(error = %err, "command rejected");
        if let Err(err) = writeln!(Console::new(&mut self.kernel), "{READ_FAILED}") {
            warn!(error = %err, "console unavailable");
        }
        Outcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{MemReader, MemWriter};
    use crate::sim::SimKernel;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn shell(input: MemReader) -> (Shell<SimKernel>, Rc<RefCell<Vec<u8>>>) {
        let (out, handle) = MemWriter::with_handle();
        let config = Config {
            prompt: String::new(),
            ..Config::default()
        };
        (Shell::new(SimKernel::booted(input, out), config), handle)
    }

    fn output(handle: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8(handle.borrow().clone()).unwrap()
    }

    #[test]
    fn test_cd_then_pwd_shows_new_directory() {
        let (mut sh, handle) = shell(MemReader::script(["cd /tmp\n", "pwd\n"]));

        sh.run();

        assert_eq!(output(&handle), "/tmp\n");
    }

    #[test]
    fn test_executable_is_spawned_and_waited_once() {
        let (mut sh, handle) = shell(MemReader::new(b"./repeat a\n".to_vec()));

        assert_eq!(sh.step(), Outcome::Completed(0));
        assert_eq!(sh.step(), Outcome::EndOfInput);

        let expected = format!("{}\n./repeat exited with code 0\n", "a".repeat(50));
        assert_eq!(output(&handle), expected);
        assert_eq!(sh.kernel().running(), 0);
    }

    #[test]
    fn test_empty_line_does_nothing() {
        let (mut sh, handle) = shell(MemReader::script(["\n", "    \n"]));

        assert_eq!(sh.step(), Outcome::Empty);
        assert_eq!(sh.step(), Outcome::Empty);
        assert_eq!(output(&handle), "");
    }

    #[test]
    fn test_prompt_is_printed_each_pass() {
        let (out, handle) = MemWriter::with_handle();
        let kernel = SimKernel::booted(MemReader::script(["\n", "\n"]), out);
        let mut sh = Shell::new(kernel, Config::default());

        sh.run();

        assert_eq!(output(&handle), "$ $ $ ");
    }

    #[test]
    fn test_read_failure_is_reported_and_loop_continues() {
        let (mut sh, handle) = shell(MemReader::default().then_fault().then("pwd\n"));

        assert_eq!(sh.step(), Outcome::Rejected);
        assert_eq!(sh.step(), Outcome::Completed(0));
        assert_eq!(output(&handle), format!("{READ_FAILED}\n/\n"));
    }

    #[test]
    fn test_allocation_failure_is_reported_and_loop_continues() {
        let (mut sh, handle) = shell(MemReader::script(["pwd\n", "pwd\n"]));
        sh.kernel().heap().set_limit(Some(0));

        assert_eq!(sh.step(), Outcome::Rejected);
        sh.kernel().heap().set_limit(None);
        assert_eq!(sh.step(), Outcome::Completed(0));

        assert_eq!(output(&handle), format!("{READ_FAILED}\n/\n"));
    }

    #[test]
    fn test_rejected_line_keeps_commands_typed_after_it() {
        let (mut sh, handle) = shell(MemReader::new(b"\xff\npwd\n".to_vec()));

        assert_eq!(sh.step(), Outcome::Rejected);
        assert_eq!(sh.step(), Outcome::Completed(0));
        assert_eq!(output(&handle), format!("{READ_FAILED}\n/\n"));
    }

    #[test]
    fn test_overlong_line_is_dropped_up_to_its_newline() {
        let (mut sh, handle) = shell(MemReader::new(b"abcdefgh\npwd\n".to_vec()));
        sh.kernel().heap().set_limit(Some(4));

        assert_eq!(sh.step(), Outcome::Rejected);
        sh.kernel().heap().set_limit(None);
        assert_eq!(sh.step(), Outcome::Completed(0));
        assert_eq!(sh.step(), Outcome::EndOfInput);
        assert_eq!(output(&handle), format!("{READ_FAILED}\n/\n"));
    }

    #[test]
    fn test_tokenize_failure_is_reported() {
        // enough for the line buffer, not for the token array
        let (mut sh, handle) = shell(MemReader::new(b"pwd\n".to_vec()));
        sh.kernel().heap().set_limit(Some(4));

        assert_eq!(sh.step(), Outcome::Rejected);
        assert_eq!(output(&handle), format!("{READ_FAILED}\n"));
        assert_eq!(sh.kernel().heap().live_blocks(), 0);
    }

    #[test]
    fn test_no_blocks_survive_a_pass() {
        let lines = [
            "cd /tmp\n",
            "cd\n",
            "nosuch a b\n",
            "./missing\n",
            "/repeat xy\n",
            "\n",
            "pwd\n",
        ];
        let (mut sh, _handle) = shell(MemReader::script(lines));

        for _ in lines {
            assert_ne!(sh.step(), Outcome::EndOfInput);
            assert_eq!(sh.kernel().heap().live_blocks(), 0);
            assert_eq!(sh.kernel().heap().in_use(), 0);
        }
    }

    #[test]
    fn test_builtin_name_is_never_probed_on_disk() {
        // /repeat exists, but without a prefix the word is a builtin name
        let (mut sh, handle) = shell(MemReader::new(b"repeat a\n".to_vec()));

        assert_eq!(sh.step(), Outcome::Completed(crate::command::NOT_FOUND));
        assert_eq!(output(&handle), "repeat: command not found\n");
    }

    #[test]
    fn test_custom_prefixes() {
        let (out, handle) = MemWriter::with_handle();
        let kernel = SimKernel::booted(MemReader::new(b"/repeat z\n".to_vec()), out);
        let config = Config {
            prompt: String::new(),
            executable_prefixes: ExecutablePrefixes::new(["./"]),
            ..Config::default()
        };
        let mut sh = Shell::new(kernel, config);

        sh.step();

        assert_eq!(output(&handle), "/repeat: command not found\n");
    }

    #[test]
    fn test_final_line_without_newline_runs() {
        let (mut sh, handle) = shell(MemReader::new(b"pwd".to_vec()));

        assert_eq!(sh.step(), Outcome::Completed(0));
        assert_eq!(sh.step(), Outcome::EndOfInput);
        assert_eq!(output(&handle), "/\n");
    }
}
