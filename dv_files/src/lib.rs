//! Source registry, spans, and warning rendering.
//!
//! Every analyzed compilation unit registers its original source text
//! here. Spans are (file, byte range) triples and all line/column
//! arithmetic lives in one place. `Report` is the wire format between
//! the analysis and the terminal: a rule code, a message, and one or
//! more source fragments rendered as excerpts with an ASCII underline.

use std::{
    fmt, io,
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::Utf8Error,
    sync::Arc,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(NonZeroU32);

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// A byte range within a registered source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

struct SourceFile {
    name: String,
    path: PathBuf,
    text: Arc<str>,
    line_starts: Vec<u32>,
}

#[derive(Default)]
pub struct Sources {
    files: Vec<SourceFile>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(
        &mut self,
        name: String,
        contents: &[u8],
        path: PathBuf,
    ) -> Result<FileId, Utf8Error> {
        let text = std::str::from_utf8(contents)?;
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        self.files.push(SourceFile {
            name,
            path,
            text: Arc::from(text),
            line_starts,
        });
        let id = u32::try_from(self.files.len()).unwrap();
        Ok(FileId(NonZeroU32::new(id).unwrap()))
    }

    fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0.get() as usize - 1]
    }

    pub fn name(&self, id: FileId) -> &str {
        &self.file(id).name
    }

    pub fn path(&self, id: FileId) -> &Path {
        &self.file(id).path
    }

    pub fn text(&self, id: FileId) -> &str {
        &self.file(id).text
    }

    /// 1-based line and column of a byte offset.
    pub fn line_col(&self, id: FileId, offset: u32) -> (u32, u32) {
        let f = self.file(id);
        let line = match f.line_starts.binary_search(&offset) {
            Ok(l) => l,
            Err(l) => l - 1,
        };
        (line as u32 + 1, offset - f.line_starts[line] + 1)
    }

    /// The text of a 1-based line, without its trailing newline.
    pub fn line_text(&self, id: FileId, line: u32) -> &str {
        let f = self.file(id);
        let start = f.line_starts[line as usize - 1] as usize;
        let end = f
            .line_starts
            .get(line as usize)
            .map(|&e| e as usize)
            .unwrap_or(f.text.len());
        f.text[start..end].trim_end_matches(['\n', '\r'])
    }

    /// Render a report as a warning with source excerpts and underlines.
    pub fn emit<W: io::Write>(&self, report: &Report, out: &mut W) -> io::Result<()> {
        writeln!(out, "warning[{}]: {}", report.code, report.msg)?;
        for fragment in &report.fragments {
            let span = fragment.full_text;
            let (line, col) = self.line_col(span.file, span.start);
            writeln!(
                out,
                "  --> {}:{}:{}",
                self.path(span.file).display(),
                line,
                col
            )?;

            let inlays: Vec<(&str, Span)> = if fragment.inlay_messages.is_empty() {
                vec![("", span)]
            } else {
                fragment
                    .inlay_messages
                    .iter()
                    .map(|(m, s)| (m.as_str(), *s))
                    .collect()
            };
            let width = inlays
                .iter()
                .map(|(_, s)| digit_count(self.line_col(s.file, s.start).0))
                .max()
                .unwrap_or(1);

            writeln!(out, "{:width$} |", "", width = width)?;
            for (msg, s) in inlays {
                let (l, c) = self.line_col(s.file, s.start);
                let text = self.line_text(s.file, l);
                writeln!(out, "{:width$} | {}", l, text, width = width)?;

                let from_b = (c - 1) as usize;
                let line_start = s.start - (c - 1);
                let to_b = (s.end.saturating_sub(line_start) as usize)
                    .min(text.len())
                    .max(from_b + 1);
                // char-based columns so the carets line up under the text
                let from = text
                    .get(..from_b.min(text.len()))
                    .map(|t| t.chars().count())
                    .unwrap_or(from_b);
                let to = text
                    .get(..to_b)
                    .map(|t| t.chars().count())
                    .unwrap_or(to_b)
                    .max(from + 1);
                let carets = "^".repeat(to - from);
                if msg.is_empty() {
                    writeln!(out, "{:width$} | {:from$}{}", "", "", carets, width = width, from = from)?;
                } else {
                    writeln!(
                        out,
                        "{:width$} | {:from$}{} {}",
                        "", "", carets, msg,
                        width = width,
                        from = from
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn digit_count(mut n: u32) -> usize {
    if n == 0 {
        return 1;
    }
    let mut count = 0;
    while n > 0 {
        count += 1;
        n /= 10;
    }
    count
}

/// A rendered warning: rule code, message, underlined fragments.
pub struct Report {
    pub code: &'static str,
    pub msg: String,
    pub fragments: Vec<Fragment>,
}

pub struct Fragment {
    pub full_text: Span,
    pub inlay_messages: Vec<(String, Span)>,
}
