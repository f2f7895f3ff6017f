//! Context directives embedded in source comments.
//!
//! ```text
//! <title><!-- @echo APP --></title>
//! <!-- @exec makeOpenBuildTag('css', 'styles/app.css') -->
//! /* @ifdef PROD */ ... /* @endif */
//! // @if BUILD_ENV == 'QA'
//! ```
//!
//! Directive comments that sit alone on a line disappear together with the
//! line. Unknown `@words` (e.g. `/* @license */`) are left as they are.

use super::context::{BuildContext, CallError};
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};
use thiserror::Error;

const DIRECTIVES: &[&str] = &[
    "echo",
    "exec",
    "if",
    "ifdef",
    "ifndef",
    "else",
    "endif",
    "exclude",
    "endexclude",
];

static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--[ \t]*@(?P<name>[a-z]+)\b(?P<args>[^\n]*?)[ \t]*-->").unwrap()
});
static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/\*[ \t]*@(?P<name>[a-z]+)\b(?P<args>[^\n]*?)[ \t]*\*/").unwrap()
});
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]*)//[ \t]*@(?P<name>[a-z]+)\b(?P<args>[^\n]*?)[ \t]*$")
        .unwrap()
});

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("{}:{line}: unknown context key `{key}`", file.display())]
    UnknownKey {
        file: PathBuf,
        line: usize,
        key: String,
    },

    #[error("{}:{line}: {source}", file.display())]
    Call {
        file: PathBuf,
        line: usize,
        source: CallError,
    },

    #[error("{}:{line}: cannot parse `{text}`", file.display())]
    BadExpression {
        file: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{}:{line}: `@{directive}` without a matching opening directive", file.display())]
    Unbalanced {
        file: PathBuf,
        line: usize,
        directive: &'static str,
    },

    #[error("{}:{line}: `@{directive}` is never closed", file.display())]
    Unclosed {
        file: PathBuf,
        line: usize,
        directive: &'static str,
    },
}

// ============================================================================
// Comment syntax
// ============================================================================

/// Which comment forms carry directives in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentSyntax {
    /// `<!-- @x -->`
    Html,
    /// `/* @x */` and `// @x`
    Script,
    /// `/* @x */`
    Style,
    /// `/* @x */` and `// @x`
    Sass,
}

impl CommentSyntax {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "html" => Some(Self::Html),
            "js" | "mjs" => Some(Self::Script),
            "css" => Some(Self::Style),
            "sass" | "scss" => Some(Self::Sass),
            _ => None,
        }
    }

    fn patterns(self) -> Vec<&'static Regex> {
        match self {
            Self::Html => vec![&*HTML_COMMENT],
            Self::Style => vec![&*BLOCK_COMMENT],
            Self::Script | Self::Sass => vec![&*BLOCK_COMMENT, &*LINE_COMMENT],
        }
    }
}

// ============================================================================
// Directive scanning
// ============================================================================

#[derive(Debug)]
struct Directive<'a> {
    start: usize,
    end: usize,
    /// Leading whitespace captured by line comments.
    indent: &'a str,
    name: &'static str,
    args: &'a str,
}

fn scan(content: &str, syntax: CommentSyntax) -> Vec<Directive<'_>> {
    let mut found: Vec<Directive<'_>> = syntax
        .patterns()
        .into_iter()
        .flat_map(|re| re.captures_iter(content))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.name("name")?.as_str();
            let name = DIRECTIVES.iter().copied().find(|d| *d == name)?;
            Some(Directive {
                start: whole.start(),
                end: whole.end(),
                indent: caps.name("indent").map_or("", |m| m.as_str()),
                name,
                args: caps.name("args").map_or("", |m| m.as_str().trim()),
            })
        })
        .collect();

    found.sort_by_key(|d| d.start);

    // Drop matches nested inside an earlier one, e.g. `// /* @echo X */`
    let mut last_end = 0;
    found.retain(|d| {
        let keep = d.start >= last_end;
        if keep {
            last_end = d.end;
        }
        keep
    });
    found
}

/// Widen `[start, end)` to the whole line when nothing else is on it.
fn standalone_span(content: &str, start: usize, end: usize) -> (usize, usize) {
    let line_start = content[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = content[end..].find('\n').map_or(content.len(), |i| end + i + 1);

    let before = &content[line_start..start];
    let after = &content[end..line_end];
    if before.trim().is_empty() && after.trim().is_empty() {
        (line_start, line_end)
    } else {
        (start, end)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Conditional,
    Exclude,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    opened: &'static str,
    line: usize,
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Frame {
    fn is_active(&self) -> bool {
        match self.kind {
            FrameKind::Exclude => false,
            FrameKind::Conditional => self.parent_active && (self.condition != self.in_else),
        }
    }
}

struct Engine<'a> {
    ctx: &'a BuildContext,
    file: &'a Path,
}

impl Engine<'_> {
    fn unknown_key(&self, line: usize, key: &str) -> PreprocessError {
        PreprocessError::UnknownKey {
            file: self.file.to_path_buf(),
            line,
            key: key.to_owned(),
        }
    }

    fn bad_expression(&self, line: usize, text: &str) -> PreprocessError {
        PreprocessError::BadExpression {
            file: self.file.to_path_buf(),
            line,
            text: text.to_owned(),
        }
    }

    fn key<'k>(&self, line: usize, text: &'k str) -> Result<&'k str, PreprocessError> {
        let text = text.trim();
        if is_identifier(text) {
            Ok(text)
        } else {
            Err(self.bad_expression(line, text))
        }
    }

    fn echo(&self, line: usize, args: &str) -> Result<String, PreprocessError> {
        let key = self.key(line, args)?;
        self.ctx
            .get(key)
            .map(ToString::to_string)
            .ok_or_else(|| self.unknown_key(line, key))
    }

    fn exec(&self, line: usize, args: &str) -> Result<String, PreprocessError> {
        let (name, rest) = args
            .split_once('(')
            .ok_or_else(|| self.bad_expression(line, args))?;
        let inner = rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| self.bad_expression(line, args))?;
        let name = self.key(line, name)?;

        let values = split_arguments(inner)
            .ok_or_else(|| self.bad_expression(line, args))?
            .into_iter()
            .map(|arg| match arg {
                Argument::Literal(text) => Ok(text),
                Argument::Key(key) => self
                    .ctx
                    .get(&key)
                    .map(ToString::to_string)
                    .ok_or_else(|| self.unknown_key(line, &key)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ctx
            .call(name, &values)
            .map_err(|source| PreprocessError::Call {
                file: self.file.to_path_buf(),
                line,
                source,
            })
    }

    /// `KEY`, `!KEY`, `KEY == 'v'` or `KEY != 'v'`.
    fn condition(&self, line: usize, expr: &str) -> Result<bool, PreprocessError> {
        let lookup = |key: &str| {
            let key = self.key(line, key)?;
            self.ctx.get(key).ok_or_else(|| self.unknown_key(line, key))
        };

        if let Some((key, value)) = expr.split_once("!=") {
            let value = unquote(value.trim()).ok_or_else(|| self.bad_expression(line, expr))?;
            return Ok(lookup(key)?.to_string() != value);
        }
        if let Some((key, value)) = expr.split_once("==") {
            let value = unquote(value.trim()).ok_or_else(|| self.bad_expression(line, expr))?;
            return Ok(lookup(key)?.to_string() == value);
        }
        if let Some(key) = expr.trim().strip_prefix('!') {
            return Ok(!lookup(key)?.is_truthy());
        }
        Ok(lookup(expr)?.is_truthy())
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(text: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Argument {
    Literal(String),
    Key(String),
}

/// Split `'a', "b", KEY` into arguments. Commas inside quotes are kept.
fn split_arguments(inner: &str) -> Option<Vec<Argument>> {
    let mut args = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        if first == '\'' || first == '"' {
            chars.next();
            let text: String = chars.by_ref().take_while(|c| *c != first).collect();
            args.push(Argument::Literal(text));
        } else {
            let mut text = String::new();
            while let Some(c) = chars.next_if(|c| *c != ',' && !c.is_whitespace()) {
                text.push(c);
            }
            if !is_identifier(&text) {
                return None;
            }
            args.push(Argument::Key(text));
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return None,
        }
    }

    Some(args)
}

// ============================================================================
// Public API
// ============================================================================

/// Apply all directives in `content`.
///
/// `file` is only used in error messages.
pub fn preprocess(
    content: &str,
    syntax: CommentSyntax,
    ctx: &BuildContext,
    file: &Path,
) -> Result<String, PreprocessError> {
    let directives = scan(content, syntax);
    if directives.is_empty() {
        return Ok(content.to_owned());
    }

    let engine = Engine { ctx, file };
    let mut out = String::with_capacity(content.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut cursor = 0;
    let mut line = 1;
    let mut line_cursor = 0;

    for directive in directives {
        line += content[line_cursor..directive.start].matches('\n').count();
        line_cursor = directive.start;

        let active = stack.last().is_none_or(Frame::is_active);
        let inline = matches!(directive.name, "echo" | "exec");
        let (start, end) = if inline {
            (directive.start, directive.end)
        } else {
            standalone_span(content, directive.start, directive.end)
        };

        if active {
            out.push_str(&content[cursor..start]);
        }
        cursor = end;

        match directive.name {
            "echo" | "exec" if active => {
                let value = if directive.name == "echo" {
                    engine.echo(line, directive.args)?
                } else {
                    engine.exec(line, directive.args)?
                };
                out.push_str(directive.indent);
                out.push_str(&value);
            }
            "echo" | "exec" => {}
            "if" | "ifdef" | "ifndef" => {
                let condition = active
                    && match directive.name {
                        "ifdef" => ctx.is_defined(engine.key(line, directive.args)?),
                        "ifndef" => !ctx.is_defined(engine.key(line, directive.args)?),
                        _ => engine.condition(line, directive.args)?,
                    };
                stack.push(Frame {
                    kind: FrameKind::Conditional,
                    opened: directive.name,
                    line,
                    parent_active: active,
                    condition,
                    in_else: false,
                });
            }
            "else" => match stack.last_mut() {
                Some(frame) if frame.kind == FrameKind::Conditional && !frame.in_else => {
                    frame.in_else = true;
                }
                _ => return Err(unbalanced(file, line, "else")),
            },
            "endif" => match stack.pop() {
                Some(frame) if frame.kind == FrameKind::Conditional => {}
                _ => return Err(unbalanced(file, line, "endif")),
            },
            "exclude" => stack.push(Frame {
                kind: FrameKind::Exclude,
                opened: "exclude",
                line,
                parent_active: active,
                condition: false,
                in_else: false,
            }),
            "endexclude" => match stack.pop() {
                Some(frame) if frame.kind == FrameKind::Exclude => {}
                _ => return Err(unbalanced(file, line, "endexclude")),
            },
            _ => unreachable!("directive names come from DIRECTIVES"),
        }
    }

    if let Some(frame) = stack.last() {
        return Err(PreprocessError::Unclosed {
            file: file.to_path_buf(),
            line: frame.line,
            directive: frame.opened,
        });
    }

    out.push_str(&content[cursor..]);
    Ok(out)
}

fn unbalanced(file: &Path, line: usize, directive: &'static str) -> PreprocessError {
    PreprocessError::Unbalanced {
        file: file.to_path_buf(),
        line,
        directive,
    }
}
