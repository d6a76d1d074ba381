//! A narrow expression parser: just enough postfix-chain structure (`a.b`,
//! `a.b(...)`, keyword/positional/starred call arguments, string literals)
//! for the Usage Index and Transformer Library to match on. Anything outside
//! that shape — binary operators, comprehensions, subscripts, lambdas,
//! f-strings — is preserved as a single opaque [`CstKind::Raw`] span rather
//! than guessed at, which keeps every rewrite that *is* modeled exact and
//! every rewrite that *isn't* safely untouched.

use pyshift_text_size::{TextRange, TextSize};

use crate::arena::{Arena, NodeId};
use crate::node::{CallArg, CstKind};

pub(crate) fn parse_expr(src: &str, range: TextRange, arena: &mut Arena, parent: Option<NodeId>) -> NodeId {
    let range = trim_range(src, range);
    match parse_postfix_chain(src, range, arena, parent) {
        Some(id) => id,
        None => arena.push(range, CstKind::Raw, parent),
    }
}

/// Returns `None` (meaning "fall back to Raw") whenever trailing input is
/// left over that isn't a recognized `.` or `(...)` postfix — e.g. a binary
/// operator or subscript — rather than mis-model it.
fn parse_postfix_chain(src: &str, range: TextRange, arena: &mut Arena, parent: Option<NodeId>) -> Option<NodeId> {
    let text = range.slice(src);
    let start = range.start().to_usize();

    let (mut current, mut consumed) = parse_primary(src, range, arena, parent)?;

    loop {
        let rest_start = consumed;
        let rest = &text[rest_start..];
        let skip = leading_ws(rest);
        let after_ws = rest_start + skip;
        if after_ws >= text.len() {
            consumed = after_ws;
            break;
        }
        let c = text.as_bytes()[after_ws];
        if c == b'.' {
            let name_start = after_ws + 1;
            let name_len = identifier_len(&text[name_start..]);
            if name_len == 0 {
                return None;
            }
            let attr = text[name_start..name_start + name_len].to_string();
            let new_range = TextRange::new(range.start(), offset(start, name_start + name_len));
            let new_node = arena.push(new_range, CstKind::Attribute { value: current, attr }, parent);
            reparent(arena, current, new_node);
            current = new_node;
            consumed = name_start + name_len;
        } else if c == b'(' {
            let open = after_ws;
            let close = match matching_bracket(&text[open..], b'(', b')') {
                Some(rel) => open + rel,
                None => return None,
            };
            let args_text_range = TextRange::new(offset(start, open + 1), offset(start, close));
            let args = parse_call_args(src, args_text_range, arena, Some(current));
            let new_range = TextRange::new(range.start(), offset(start, close + 1));
            let new_node = arena.push(new_range, CstKind::Call { func: current, args }, parent);
            reparent(arena, current, new_node);
            current = new_node;
            consumed = close + 1;
        } else {
            return None;
        }
    }

    if consumed != text.len() {
        return None;
    }
    Some(current)
}

fn reparent(arena: &mut Arena, child: NodeId, parent: NodeId) {
    arena.get_mut(child).parent = Some(parent);
}

fn parse_primary(src: &str, range: TextRange, arena: &mut Arena, parent: Option<NodeId>) -> Option<(NodeId, usize)> {
    let text = range.slice(src);
    let start = range.start().to_usize();
    if text.is_empty() {
        return None;
    }

    if let Some((raw, value, len)) = parse_string_literal(text) {
        let node_range = TextRange::new(range.start(), offset(start, len));
        let node = arena.push(node_range, CstKind::Str { value, raw }, parent);
        return Some((node, len));
    }

    let ident_len = identifier_len(text);
    if ident_len > 0 && !text.as_bytes()[0].is_ascii_digit() {
        let node_range = TextRange::new(range.start(), offset(start, ident_len));
        let node = arena.push(node_range, CstKind::Name { id: text[..ident_len].to_string() }, parent);
        return Some((node, ident_len));
    }

    None
}

fn parse_call_args(src: &str, range: TextRange, arena: &mut Arena, parent: Option<NodeId>) -> Vec<CallArg> {
    let text = range.slice(src);
    let start = range.start().to_usize();
    let mut args = Vec::new();

    for piece in split_top_level(text, b',') {
        if piece.trim().is_empty() {
            continue;
        }
        let piece_start = start + (piece.as_ptr() as usize - text.as_ptr() as usize);
        let piece_range = trim_range(
            src,
            TextRange::new(offset(0, piece_start), offset(0, piece_start + piece.len())),
        );
        let piece_text = piece_range.slice(src);

        let is_starred = piece_text.starts_with('*') && !piece_text.starts_with("**");
        let body_range = if is_starred {
            trim_range(
                src,
                TextRange::new(
                    piece_range.start() + TextSize::new(1),
                    piece_range.end(),
                ),
            )
        } else {
            piece_range
        };
        let body_text = body_range.slice(src);

        if let Some(eq) = top_level_kwarg_eq(body_text) {
            let name = body_text[..eq].trim();
            if is_identifier(name) {
                let name_start = body_range.start().to_usize();
                let name_range = TextRange::new(offset(0, name_start), offset(0, name_start + eq));
                let keyword = arena.push(name_range, CstKind::Name { id: name.to_string() }, parent);
                let value_range = trim_range(
                    src,
                    TextRange::new(
                        offset(0, name_start + eq + 1),
                        body_range.end(),
                    ),
                );
                let value = parse_expr(src, value_range, arena, parent);
                args.push(CallArg { keyword: Some(keyword), value, is_starred: false });
                continue;
            }
        }

        let value = parse_expr(src, body_range, arena, parent);
        args.push(CallArg { keyword: None, value, is_starred });
    }

    args
}

/// Finds the `=` of a top-level `name=value` keyword argument, ignoring `==`
/// and anything nested in brackets/strings.
fn top_level_kwarg_eq(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => in_string = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'=' if depth == 0 => {
                let next_is_eq = bytes.get(i + 1) == Some(&b'=');
                let prev_is_cmp = i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>');
                if !next_is_eq && !prev_is_cmp {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

pub(crate) fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;
    let mut last = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => in_string = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            _ if b == sep && depth == 0 => {
                parts.push(&text[last..i]);
                last = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&text[last..]);
    parts
}

pub(crate) fn matching_bracket(text: &str, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => in_string = Some(b),
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_string_literal(text: &str) -> Option<(String, String, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len().min(2) && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let quote = *bytes.get(i)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let triple = bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote);
    let quote_len = if triple { 3 } else { 1 };
    let body_start = i + quote_len;
    let mut j = body_start;
    loop {
        if j >= bytes.len() {
            return None;
        }
        if bytes[j] == b'\\' && !triple {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            if !triple || (bytes.get(j + 1) == Some(&quote) && bytes.get(j + 2) == Some(&quote)) {
                let end = j + quote_len;
                let raw = text[..end].to_string();
                let value = text[body_start..j].to_string();
                return Some((raw, value, end));
            }
        }
        j += 1;
    }
}

fn identifier_len(text: &str) -> usize {
    text.char_indices()
        .take_while(|(idx, c)| {
            if *idx == 0 {
                c.is_alphabetic() || *c == '_'
            } else {
                c.is_alphanumeric() || *c == '_'
            }
        })
        .count()
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty() && identifier_len(text) == text.chars().count() && identifier_len(text) == text.len()
}

fn leading_ws(text: &str) -> usize {
    text.bytes().take_while(|b| b.is_ascii_whitespace()).count()
}

fn trim_range(src: &str, range: TextRange) -> TextRange {
    let text = range.slice(src);
    let start_trim = text.bytes().take_while(|b| b.is_ascii_whitespace()).count();
    let end_trim = text.bytes().rev().take_while(|b| b.is_ascii_whitespace()).count();
    let new_start = range.start().to_usize() + start_trim;
    let new_end = (range.end().to_usize()).saturating_sub(end_trim).max(new_start);
    TextRange::new(TextSize::new(u32::try_from(new_start).unwrap_or(0)), TextSize::new(u32::try_from(new_end).unwrap_or(0)))
}

fn offset(_base: usize, absolute: usize) -> TextSize {
    TextSize::new(u32::try_from(absolute).unwrap_or(u32::MAX))
}
