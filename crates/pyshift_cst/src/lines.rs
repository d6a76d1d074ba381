//! Splits source text into logical lines: one entry per Python statement
//! header, with continuation lines (inside brackets, or behind a trailing
//! `\`) folded in. This is the layer that makes the rest of the lowering
//! pass whitespace-preserving: a [`LogicalLine`] always records the exact
//! byte range it was cut from, so re-slicing the original source for any
//! untouched line reproduces it exactly.

use pyshift_text_size::TextSize;

#[derive(Debug, Clone)]
pub(crate) struct LogicalLine {
    /// Byte range of the line's content, including its own indentation and
    /// trailing newline (if any), but not including any blank/comment-only
    /// lines before it.
    pub start: u32,
    pub end: u32,
    /// Column (in bytes) of the first non-whitespace character, or the full
    /// line length for a blank line.
    pub indent: usize,
    pub is_blank_or_comment: bool,
}

impl LogicalLine {
    pub(crate) fn range(&self) -> pyshift_text_size::TextRange {
        pyshift_text_size::TextRange::new(TextSize::new(self.start), TextSize::new(self.end))
    }
}

/// Scans `src` into logical lines. Never fails: inputs that confuse the
/// bracket/string tracker (e.g. an odd number of quotes) just stop merging
/// continuations early, which only affects how finely we slice the text, not
/// whether re-slicing losslessly reproduces it.
pub(crate) fn logical_lines(src: &str) -> Vec<LogicalLine> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut lines = Vec::new();
    let mut pos = 0usize;

    while pos < len {
        let line_start = pos;
        let mut depth: i32 = 0;
        let mut in_string: Option<(u8, bool)> = None; // (quote char, is_triple)
        let mut i = pos;
        let mut saw_backslash_continuation;

        loop {
            saw_backslash_continuation = false;
            while i < len {
                let b = bytes[i];
                if let Some((quote, triple)) = in_string {
                    if b == b'\\' && !triple {
                        i += 2;
                        continue;
                    }
                    if b == quote {
                        if triple {
                            if i + 2 < len && bytes[i + 1] == quote && bytes[i + 2] == quote {
                                in_string = None;
                                i += 3;
                                continue;
                            }
                        } else {
                            in_string = None;
                            i += 1;
                            continue;
                        }
                    }
                    i += 1;
                    continue;
                }

                match b {
                    b'#' => {
                        while i < len && bytes[i] != b'\n' {
                            i += 1;
                        }
                    }
                    b'\'' | b'"' => {
                        let triple = i + 2 < len && bytes[i + 1] == b && bytes[i + 2] == b;
                        in_string = Some((b, triple));
                        i += if triple { 3 } else { 1 };
                    }
                    b'(' | b'[' | b'{' => {
                        depth += 1;
                        i += 1;
                    }
                    b')' | b']' | b'}' => {
                        depth -= 1;
                        i += 1;
                    }
                    b'\\' if i + 1 < len && bytes[i + 1] == b'\n' => {
                        saw_backslash_continuation = true;
                        i += 2;
                        break;
                    }
                    b'\n' => {
                        i += 1;
                        break;
                    }
                    _ => i += 1,
                }
            }

            if i >= len {
                break;
            }
            if saw_backslash_continuation || depth > 0 {
                continue;
            }
            break;
        }

        let end = i.max(line_start);
        let content = &src[line_start..end];
        let trimmed = content.trim_start_matches([' ', '\t']);
        let indent = content.len() - trimmed.len();
        let is_blank_or_comment =
            trimmed.is_empty() || trimmed.trim_end_matches(['\n', '\r']).trim_start().starts_with('#');

        lines.push(LogicalLine {
            start: u32::try_from(line_start).unwrap_or(u32::MAX),
            end: u32::try_from(end).unwrap_or(u32::MAX),
            indent,
            is_blank_or_comment,
        });
        pos = end;
    }

    lines
}
