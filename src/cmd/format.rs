/*!
format.rs

Human output for `rexec exec`: one prefixed line per node message.

  ==> web-1: acknowledged        (info / status lines)
      web-1: Tue Oct 14 ...      (captured output)

Goals:
  - Keep output readable while many nodes interleave.
  - Color the arrow and node name unless NO_COLOR is set.
  - Never route this through logging; it is the command's result output (stdout).

Public API Summary:
  - StyleOptions::detect() -> StyleOptions
  - color(role, text, &StyleOptions) -> String
  - prefix_lines(arrow, target, message, &StyleOptions) -> String
  - TargetedUi: `rexec::Report` implementation over any writer
*/

use std::io::Write;

use crate::rexec::Report;

/* -------------------------------------------------------------------------- */
/* Style Options                                                              */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone)]
pub struct StyleOptions {
    pub use_color: bool,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self::detect()
    }
}

impl StyleOptions {
    pub fn detect() -> Self {
        StyleOptions {
            use_color: std::env::var_os("NO_COLOR").is_none(),
        }
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        StyleOptions { use_color: false }
    }
}

/* -------------------------------------------------------------------------- */
/* Color                                                                      */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy)]
pub enum Role {
    Primary,
    Error,
    Bold,
}

pub fn color(role: Role, text: impl AsRef<str>, style: &StyleOptions) -> String {
    if !style.use_color {
        return text.as_ref().to_string();
    }
    let code = match role {
        Role::Primary => "38;5;45", // cyan-ish
        Role::Error => "38;5;196",  // red
        Role::Bold => "1",
    };
    format!("\x1b[{code}m{}\x1b[0m", text.as_ref())
}

/* -------------------------------------------------------------------------- */
/* Targeted Lines                                                             */
/* -------------------------------------------------------------------------- */

const ARROW: &str = "==>";

/// Prefix every line of `message` with `==> target: ` (or blanks of the same
/// width when `arrow` is false). Trailing whitespace of the result is dropped.
pub fn prefix_lines(arrow: bool, target: &str, message: &str, style: &StyleOptions) -> String {
    let lead = if arrow {
        color(Role::Bold, ARROW, style)
    } else {
        " ".repeat(ARROW.len())
    };
    let target = color(Role::Primary, target, style);

    let mut out = String::new();
    for line in message.split('\n') {
        out.push_str(&format!("{lead} {target}: {line}\n"));
    }
    out.trim_end().to_string()
}

/* -------------------------------------------------------------------------- */
/* Report Sink                                                                */
/* -------------------------------------------------------------------------- */

/// Writes progress for each node to `out`.
pub struct TargetedUi<W: Write + Send> {
    out: W,
    style: StyleOptions,
}

impl<W: Write + Send> TargetedUi<W> {
    pub fn new(out: W, style: StyleOptions) -> Self {
        Self { out, style }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        // Nothing useful to do when stdout is gone.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> Report for TargetedUi<W> {
    fn info(&mut self, node: &str, msg: &str) {
        let text = prefix_lines(true, node, msg, &self.style);
        self.line(&text);
    }

    fn output(&mut self, node: &str, output: &[u8]) {
        let text = prefix_lines(false, node, &String::from_utf8_lossy(output), &self.style);
        self.line(&text);
    }

    fn notice(&mut self, msg: &str) {
        let text = color(Role::Bold, msg, &self.style);
        self.line(&text);
    }
}

/* -------------------------------------------------------------------------- */
/* Tests                                                                       */
/* -------------------------------------------------------------------------- */
