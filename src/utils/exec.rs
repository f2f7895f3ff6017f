//! External command execution utilities.
//!
//! The Sass compiler and the module bundler run as child processes. This
//! module spawns them, optionally feeds stdin, and turns failures into errors
//! carrying the filtered stderr.

use crate::log;
use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use std::{
    ffi::OsString,
    io::Write,
    path::Path,
    process::{Command, Output, Stdio},
    sync::OnceLock,
};

// ============================================================================
// Macros
// ============================================================================

/// Run an external command with arguments in a working directory.
///
/// # Examples
/// ```ignore
/// exec!(root; &config.build.esbuild; "--bundle", entry)?;
///
/// // Feed stdin and keep stdout
/// let out = exec!(stdin=source.as_bytes(); root; &config.build.sass; "--stdin")?;
///
/// // With custom filter
/// exec!(filter=&SASS_FILTER; root; &config.build.sass; "--version")?;
/// ```
#[macro_export]
macro_rules! exec {
    (stdin=$stdin:expr; $($rest:tt)*) => {
        $crate::exec!(@filter Some($stdin); $($rest)*)
    };
    (@filter $stdin:expr; filter=$filter:expr; $root:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            $root,
            $cmd,
            &$crate::utils::exec::filter_args(&[$($crate::utils::exec::to_os($arg)),*]),
            $stdin,
            $filter,
        )
    };
    (@filter $stdin:expr; $root:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::exec!(@filter $stdin; filter=&$crate::utils::exec::EMPTY_FILTER; $root; $cmd; $($arg),*)
    };
    ($($rest:tt)*) => {
        $crate::exec!(@filter None; $($rest)*)
    };
}

// ============================================================================
// Argument Conversion
// ============================================================================

/// Convert to `OsString`.
#[inline]
pub fn to_os<S: Into<OsString>>(s: S) -> OsString {
    s.into()
}

/// Filter out empty args, so conditional flags can be written as `""`.
#[inline]
pub fn filter_args(args: &[OsString]) -> Vec<OsString> {
    args.iter().filter(|a| !a.is_empty()).cloned().collect()
}

// ============================================================================
// Command Execution
// ============================================================================

/// Fail early with a readable message when a configured tool is missing.
pub fn require_command(key: &str, cmd: &[String]) -> Result<()> {
    let name = cmd
        .first()
        .ok_or_else(|| anyhow!("{key} is empty"))?;
    which::which(name)
        .map(|_| ())
        .with_context(|| format!("{key}: `{name}` not found in PATH"))
}

/// Execute a command and capture its output.
///
/// # Errors
/// Returns error if command fails to execute or returns non-zero exit code.
pub fn exec(
    root: &Path,
    cmd: &[String],
    args: &[OsString],
    stdin: Option<&[u8]>,
    filter: &'static FilterRule,
) -> Result<Output> {
    let name = cmd.first().context("Empty command")?.to_owned();

    let mut command = Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .args(args)
        .current_dir(root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to execute `{name}`"))?;

    // Feed stdin from a separate thread so a child writing a large stdout
    // cannot deadlock against us.
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(std::thread::spawn(move || pipe.write_all(&input)))
        }
        _ => None,
    };

    let output = child
        .wait_with_output()
        .with_context(|| format!("`{name}` process failed"))?;

    if let Some(writer) = writer {
        // A broken pipe only matters when the child also failed, which the
        // exit status below reports.
        let _ = writer.join();
    }

    log_output(&name, &output, filter)?;
    Ok(output)
}

// ============================================================================
// Output Filtering
// ============================================================================

fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    re.replace_all(s, "")
}

/// Filter rule for skipping known noise in tool output.
pub struct FilterRule {
    /// Prefixes to match at the start of output lines.
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, line: &str) -> bool {
        line.is_empty() || self.skip_prefixes.iter().any(|p| line.starts_with(p))
    }

    /// Log the lines that survive the filter under the command name.
    fn log(&self, name: &str, output: &str) {
        let lines: Vec<_> = output
            .lines()
            .filter(|line| !self.should_skip(strip_ansi(line).trim()))
            .collect();

        if !lines.is_empty() {
            log!(name; "{}", lines.join("\n"));
        }
    }
}

/// Empty filter (no skipping).
pub const EMPTY_FILTER: FilterRule = FilterRule::new(&[]);

/// Log command output, filtering known noise.
fn log_output(name: &str, output: &Output, filter: &'static FilterRule) -> Result<()> {
    if !output.status.success() {
        bail!(format_error(name, output, filter));
    }

    // On success, only stderr (warnings) is interesting; stdout is the artifact
    let stderr = String::from_utf8_lossy(&output.stderr);
    filter.log(name, stderr.trim());

    Ok(())
}

/// Format command error message with filtering.
fn format_error(name: &str, output: &Output, filter: &'static FilterRule) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail: Vec<_> = stderr
        .lines()
        .filter(|line| {
            let plain = strip_ansi(line);
            let plain = plain.trim();
            plain.is_empty() || !filter.should_skip(plain)
        })
        .collect();

    let mut msg = format!("Command `{name}` failed with {}", output.status);
    let detail = detail.join("\n");
    let detail = detail.trim();
    if !detail.is_empty() {
        msg.push('\n');
        msg.push_str(detail);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_os() {
        assert_eq!(to_os("hello"), OsString::from("hello"));
        assert_eq!(to_os(String::from("world")), OsString::from("world"));
    }

    #[test]
    fn test_filter_args() {
        let args = [OsString::from("a"), OsString::from(""), OsString::from("b")];
        let filtered = filter_args(&args);
        assert_eq!(filtered, [OsString::from("a"), OsString::from("b")]);
    }

    #[test]
    fn test_filter_rule() {
        let filter = FilterRule::new(&["Deprecation", "WARN:"]);

        assert!(filter.should_skip("Deprecation Warning: old syntax"));
        assert!(filter.should_skip("WARN: something"));
        assert!(!filter.should_skip("Error: expected \";\""));
        assert!(filter.should_skip(""));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_ansi("\x1b[1;32mGreen Bold\x1b[0m"), "Green Bold");
        assert_eq!(strip_ansi("Plain text"), "Plain text");
    }

    #[test]
    fn test_require_command_missing() {
        let cmd = vec!["pipewright-no-such-tool".to_string()];
        let err = require_command("[build.sass]", &cmd).unwrap_err();
        assert!(format!("{err:#}").contains("pipewright-no-such-tool"));

        assert!(require_command("[build.sass]", &[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_pipes_stdin_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let cat = vec!["cat".to_string()];
        let output = crate::exec!(stdin=b"hello".as_slice(); dir.path(); &cat;).unwrap();
        assert_eq!(output.stdout, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sh = vec!["sh".to_string()];
        let err = crate::exec!(dir.path(); &sh; "-c", "echo broken >&2; exit 3").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Command `sh` failed"));
        assert!(msg.contains("broken"));
    }
}
