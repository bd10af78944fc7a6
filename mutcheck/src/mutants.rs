//! Mutant records: where a mutant came from, what it compiles to, and the
//! source coordinates of the mutated token.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Error;

/// A source-coordinate span. Lines are 1-based and inclusive on both ends;
/// columns are 1-based with an exclusive end column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// First line of the span
    pub start_line: u32,
    /// Column of the first character
    pub start_col: u32,
    /// Last line of the span
    pub end_line: u32,
    /// Column one past the last character
    pub end_col: u32,
}

impl SourceSpan {
    /// Number of source lines the span touches.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// One mutant of one instruction's semantics function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    /// Source file name of the mutated unit
    pub src: String,
    /// Name of the compiled target
    pub target: String,
    /// The instruction this mutant belongs to
    pub insn: String,
    /// Span of the mutated token in the original source
    pub before: SourceSpan,
    /// Span of the replacement token in the mutated source
    pub after: SourceSpan,
}

/// Load the mutant list artifact the mutation tool produced.
pub fn load_mutants<P>(path: P) -> Result<Vec<Mutant>, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| Error::missing_artifact(format!("mutant list {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&text)?)
}

/// Annotate the span's lines of `source` with caret markers, the way a
/// human-readable mutant report shows the mutated token.
pub fn annotate(source: &str, span: &SourceSpan) -> Result<String, Error> {
    let lines: Vec<&str> = source.lines().collect();
    if span.start_line == 0
        || span.start_col == 0
        || span.end_line < span.start_line
        || lines.len() < span.end_line as usize
    {
        return Err(Error::illegal_argument(format!(
            "span {span:?} does not fit a {}-line source",
            lines.len()
        )));
    }

    let mut out = String::new();
    for lineno in span.start_line..=span.end_line {
        let line = lines[lineno as usize - 1];
        out.push_str(line);
        out.push('\n');

        let start = if lineno == span.start_line {
            span.start_col
        } else {
            1
        };
        let end = if lineno == span.end_line {
            span.end_col
        } else {
            u32::try_from(line.chars().count()).unwrap_or(u32::MAX).saturating_add(1)
        };
        out.push_str(&" ".repeat(start as usize - 1));
        out.push_str(&"^".repeat((end.saturating_sub(start)).max(1) as usize));
        out.push('\n');
    }
    Ok(out)
}
