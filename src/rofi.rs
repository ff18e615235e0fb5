//! Menus drawn by rofi in dmenu mode, for launching outside a terminal.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::menu::Menu;

/// rofi's exit code when the user dismisses the menu.
const DISMISSED: i32 = 1;

pub struct RofiMenu {
    program: PathBuf,
    flags: Vec<String>,
}

impl RofiMenu {
    /// `flags` is split on whitespace and appended to every invocation,
    /// e.g. `-theme nord`.
    pub fn new(flags: &str) -> io::Result<Self> {
        let program = which::which("rofi").map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("rofi not found in PATH: {e}"),
            )
        })?;
        Ok(Self::with_program(program, flags))
    }

    pub fn with_program(program: impl Into<PathBuf>, flags: &str) -> Self {
        Self {
            program: program.into(),
            flags: flags.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Runs rofi once. `Ok(None)` when the user dismissed it.
    fn run(&self, args: &[String], input: Option<&str>) -> io::Result<Option<String>> {
        debug!(program = %self.program.display(), ?args, "running rofi");
        let mut child = Command::new(&self.program)
            .args(args)
            .args(&self.flags)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(input) = input
            && let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(input.as_bytes())
            && e.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(e);
        }

        let output = child.wait_with_output()?;
        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(DISMISSED) => Ok(None),
            _ => Err(io::Error::other(format!("rofi exited with {}", output.status))),
        }
    }

    fn choose(&self, label: &str, items: &[String], multi: bool) -> io::Result<Option<Vec<usize>>> {
        let input = list_input(items);
        let Some(out) = self.run(&dmenu_args(label, multi, true), Some(&input))? else {
            return Ok(None);
        };
        Ok(Some(parse_indices(&out, items.len())))
    }
}

/// Arguments for one dmenu call. With `indices`, rofi prints the picked
/// row numbers instead of their text.
fn dmenu_args(label: &str, multi: bool, indices: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-dmenu", "-i", "-p", "anistream", "-mesg", label]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if indices {
        args.extend(["-format".to_string(), "i".to_string()]);
    }
    if multi {
        args.push("-multi-select".to_string());
    }
    args
}

/// One row per item; rofi splits rows on newlines.
fn list_input(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.replace('\n', " "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Row numbers rofi printed, sorted, skipping anything outside `len`.
/// Text the user typed that matches no row comes back as `-1` and is dropped.
fn parse_indices(out: &str, len: usize) -> Vec<usize> {
    let mut picks: Vec<usize> = out
        .lines()
        .filter_map(|line| line.trim().parse::<usize>().ok())
        .filter(|&i| i < len)
        .collect();
    picks.sort_unstable();
    picks.dedup();
    picks
}

impl Menu for RofiMenu {
    fn select_one(&mut self, label: &str, items: &[String]) -> io::Result<Option<usize>> {
        Ok(self
            .choose(label, items, false)?
            .and_then(|picks| picks.first().copied()))
    }

    fn select_many(&mut self, label: &str, items: &[String]) -> io::Result<Option<Vec<usize>>> {
        self.choose(label, items, true)
    }

    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        Ok(self
            .run(&dmenu_args(label, false, false), None)?
            .map(|text| text.trim().to_string()))
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        self.run(&["-e".to_string(), message.to_string()], None)
            .map(drop)
    }

    fn show_status(&mut self, message: &str) -> io::Result<()> {
        // rofi has no non-blocking message window
        debug!(status = %message, "status");
        Ok(())
    }
}
