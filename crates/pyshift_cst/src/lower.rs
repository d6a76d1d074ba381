//! Statement-level lowering: walks [`crate::lines::logical_lines`] output and
//! builds the [`crate::arena::Arena`], recognizing the handful of statement
//! shapes pyshift's transformers need ( imports, class/function defs with
//! decorators, assignments, bare expression statements) and falling back to
//! [`CstKind::Raw`] — verbatim, whole nested block included — for everything
//! else (`if`, `for`, `while`, `try`, `with`, `return`, ...).

use pyshift_text_size::{TextRange, TextSize};

use crate::arena::{Arena, NodeId};
use crate::expr::{parse_expr, split_top_level};
use crate::lines::{logical_lines, LogicalLine};
use crate::node::{CstKind, ImportAlias, ImportFromNames};

pub(crate) fn lower_module(src: &str) -> (Arena, NodeId) {
    let lines = logical_lines(src);
    let mut arena = Arena::default();
    let module_id = arena.push(
        TextRange::new(TextSize::new(0), TextSize::new(u32::try_from(src.len()).unwrap_or(u32::MAX))),
        CstKind::Raw,
        None,
    );

    let mut cursor = 0usize;
    let body = parse_suite(src, &lines, &mut cursor, None, module_id, &mut arena);
    arena.get_mut(module_id).kind = CstKind::Module { body };
    (arena, module_id)
}

/// Consumes lines from `lines[*cursor..]` that belong to one indentation
/// level (the indentation of the first non-blank line encountered), handing
/// back the `NodeId`s of the statements found. A header line ending in `:`
/// recursively consumes its own deeper-indented body before this loop moves
/// to the next sibling.
fn parse_suite(
    src: &str,
    lines: &[LogicalLine],
    cursor: &mut usize,
    required_indent: Option<usize>,
    parent: NodeId,
    arena: &mut Arena,
) -> Vec<NodeId> {
    let mut body = Vec::new();
    let mut indent = required_indent;
    let mut pending_decorators: Vec<NodeId> = Vec::new();

    while *cursor < lines.len() {
        let line = &lines[*cursor];

        if line.is_blank_or_comment {
            body.push(arena.push(line.range(), CstKind::Raw, Some(parent)));
            *cursor += 1;
            continue;
        }

        let line_indent = line.indent;
        if let Some(required) = indent {
            if line_indent < required {
                break;
            }
        } else {
            indent = Some(line_indent);
        }
        if indent.is_some_and(|required| line_indent > required) {
            // A deeper-indented line here means a previous header failed to
            // consume its own body (shouldn't happen for recognized
            // compounds); treat conservatively as part of the same raw run.
            break;
        }

        let text = line.range().slice(src);
        let stripped = text.trim_start_matches([' ', '\t']);

        if let Some(rest) = stripped.strip_prefix('@') {
            let expr_start = line.range().start().to_usize() + (text.len() - stripped.len()) + 1;
            let expr_end = expr_start + rest.trim_end_matches(['\n', '\r']).trim_end().len();
            let expr_range = TextRange::new(TextSize::new(u32::try_from(expr_start).unwrap_or(0)), TextSize::new(u32::try_from(expr_end).unwrap_or(0)));
            let decorator_range = line.range();
            let expr = parse_expr(src, expr_range, arena, None);
            let decorator = arena.push(decorator_range, CstKind::Decorator { expr }, Some(parent));
            arena.get_mut(expr).parent = Some(decorator);
            pending_decorators.push(decorator);
            *cursor += 1;
            continue;
        }

        if let Some(node) = try_lower_import(src, line, arena, parent) {
            flush_decorators_as_raw(arena, &mut pending_decorators, &mut body);
            body.push(node);
            *cursor += 1;
            continue;
        }

        let class_header = parse_class_header(stripped).map(|(name, base_spans)| {
            let text_offset = text.len() - stripped.len();
            let line_start = line.range().start().to_usize();
            let bases: Vec<NodeId> = base_spans
                .into_iter()
                .map(|(rel_start, rel_end)| {
                    let abs_start = line_start + text_offset + rel_start;
                    let abs_end = line_start + text_offset + rel_end;
                    let range = TextRange::new(
                        TextSize::new(u32::try_from(abs_start).unwrap_or(0)),
                        TextSize::new(u32::try_from(abs_end).unwrap_or(0)),
                    );
                    parse_expr(src, range, arena, None)
                })
                .collect();
            (name, bases)
        });
        let header = class_header
            .map(|(name, bases)| (true, name, bases))
            .or_else(|| match_def_header(stripped).map(|n| (false, n, Vec::new())));

        if let Some((is_class, name, bases)) = header {
            let decorators = std::mem::take(&mut pending_decorators);
            *cursor += 1;
            let header_indent = line_indent;
            let compound_id = arena.push(line.range(), CstKind::Raw, Some(parent));
            let child_body = parse_suite(src, lines, cursor, Some(header_indent + 1), compound_id, arena);
            let extended_range = extend_range_over(src, line.range(), lines, *cursor);

            let kind = if is_class {
                CstKind::ClassDef { name, bases: bases.clone(), decorators: decorators.clone(), body: child_body }
            } else {
                CstKind::FunctionDef { name, decorators: decorators.clone(), body: child_body }
            };
            arena.get_mut(compound_id).kind = kind;
            arena.get_mut(compound_id).range = extended_range;
            for decorator in &decorators {
                arena.get_mut(*decorator).parent = Some(compound_id);
            }
            for base in &bases {
                arena.get_mut(*base).parent = Some(compound_id);
            }
            body.push(compound_id);
            continue;
        }

        if is_compound_header(stripped) {
            flush_decorators_as_raw(arena, &mut pending_decorators, &mut body);
            *cursor += 1;
            let header_indent = line_indent;
            let raw_id = arena.push(line.range(), CstKind::Raw, Some(parent));
            let mut inner_cursor = *cursor;
            let _ = parse_suite(src, lines, &mut inner_cursor, Some(header_indent + 1), raw_id, &mut Arena::default());
            *cursor = inner_cursor;
            let extended_range = extend_range_over(src, line.range(), lines, *cursor);
            arena.get_mut(raw_id).range = extended_range;
            body.push(raw_id);
            continue;
        }

        flush_decorators_as_raw(arena, &mut pending_decorators, &mut body);

        if let Some(node) = try_lower_assign(src, line, arena, parent) {
            body.push(node);
            *cursor += 1;
            continue;
        }

        if let Some(node) = try_lower_expr_statement(src, line, arena, parent) {
            body.push(node);
            *cursor += 1;
            continue;
        }

        body.push(arena.push(line.range(), CstKind::Raw, Some(parent)));
        *cursor += 1;
    }

    flush_decorators_as_raw(arena, &mut pending_decorators, &mut body);
    body
}

fn flush_decorators_as_raw(arena: &mut Arena, pending: &mut Vec<NodeId>, body: &mut Vec<NodeId>) {
    // Decorators only attach to a class/def that immediately follows; if the
    // next line turned out not to be one, keep the decorator lines as
    // standalone raw statements rather than silently dropping them.
    let _ = arena;
    body.extend(pending.drain(..));
}

fn extend_range_over(src: &str, header: TextRange, lines: &[LogicalLine], end_cursor: usize) -> TextRange {
    let last_covered_end = lines[..end_cursor]
        .iter()
        .rev()
        .find(|l| l.end as usize >= header.start().to_usize())
        .map_or(header.end(), |l| TextSize::new(l.end));
    let _ = src;
    TextRange::new(header.start(), last_covered_end.max(header.end()))
}

/// Parses a `class Name(Base1, Base2, metaclass=M):` header, returning the
/// class name and the `(stripped`-relative byte spans of each positional
/// base (keyword arguments like `metaclass=` are not bases and are
/// skipped). Spans, not parsed subexpressions, are returned here because the
/// caller needs to translate them to absolute source offsets before calling
/// [`parse_expr`].
fn parse_class_header(stripped: &str) -> Option<(String, Vec<(usize, usize)>)> {
    let rest = stripped.strip_prefix("class ")?;
    let name_len = rest.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
    if name_len == 0 {
        return None;
    }
    let name = rest[..name_len].to_string();
    let after_name = &rest[name_len..];
    let ws = after_name.bytes().take_while(|b| b.is_ascii_whitespace()).count();
    let after_ws = &after_name[ws..];

    let mut base_spans = Vec::new();
    if after_ws.starts_with('(') {
        if let Some(close_rel) = crate::expr::matching_bracket(after_ws, b'(', b')') {
            let inner = &after_ws[1..close_rel];
            let inner_abs_start = stripped.len() - after_ws.len() + 1;
            for piece in split_top_level(inner, b',') {
                let piece_trim = piece.trim();
                if piece_trim.is_empty() || find_top_level_single_eq(piece_trim).is_some() {
                    continue;
                }
                let piece_start_in_inner = piece.as_ptr() as usize - inner.as_ptr() as usize;
                base_spans.push((inner_abs_start + piece_start_in_inner, inner_abs_start + piece_start_in_inner + piece.len()));
            }
        }
    }
    Some((name, base_spans))
}

fn match_def_header(stripped: &str) -> Option<String> {
    let rest = stripped.strip_prefix("def ").or_else(|| stripped.strip_prefix("async def "))?;
    let name_len = rest.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
    Some(rest[..name_len].to_string())
}

fn is_compound_header(stripped: &str) -> bool {
    let starters = [
        "if ", "elif ", "else:", "else :", "for ", "while ", "try:", "try :", "except", "finally:",
        "finally :", "with ", "async for ", "async with ", "match ", "case ",
    ];
    starters.iter().any(|s| stripped.starts_with(s)) && stripped.trim_end().ends_with(':')
}

fn try_lower_import(src: &str, line: &LogicalLine, arena: &mut Arena, parent: NodeId) -> Option<NodeId> {
    let text = line.range().slice(src);
    let stripped = text.trim_start_matches([' ', '\t']);
    let content = stripped.trim_end_matches(['\n', '\r']);

    if let Some(rest) = content.strip_prefix("import ") {
        let names = parse_alias_list(rest);
        return Some(arena.push(line.range(), CstKind::Import { names }, Some(parent)));
    }

    if let Some(rest) = content.strip_prefix("from ") {
        let (module_part, names_part) = rest.split_once(" import ")?;
        let module_part = module_part.trim();
        let level = module_part.bytes().take_while(|b| *b == b'.').count();
        let module = module_part.trim_start_matches('.');
        let module = if module.is_empty() { None } else { Some(module.to_string()) };
        let names_part = names_part.trim();
        let names = if names_part == "*" {
            ImportFromNames::Star
        } else {
            let names_part = names_part.trim_start_matches('(').trim_end_matches(')');
            ImportFromNames::Aliases(parse_alias_list(names_part))
        };
        return Some(arena.push(
            line.range(),
            CstKind::ImportFrom { level: u32::try_from(level).unwrap_or(0), module, names },
            Some(parent),
        ));
    }

    None
}

fn parse_alias_list(text: &str) -> Vec<ImportAlias> {
    split_top_level(text, b',')
        .into_iter()
        .filter_map(|piece| {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            if let Some((name, asname)) = piece.split_once(" as ") {
                Some(ImportAlias { name: name.trim().to_string(), asname: Some(asname.trim().to_string()) })
            } else {
                Some(ImportAlias { name: piece.to_string(), asname: None })
            }
        })
        .collect()
}

fn try_lower_assign(src: &str, line: &LogicalLine, arena: &mut Arena, parent: NodeId) -> Option<NodeId> {
    let text = line.range().slice(src);
    let stripped_offset = text.len() - text.trim_start_matches([' ', '\t']).len();
    let content_start = line.range().start().to_usize() + stripped_offset;
    let content = text.trim_start_matches([' ', '\t']).trim_end_matches(['\n', '\r']);

    let eq = find_top_level_single_eq(content)?;
    let (target_text, value_text) = content.split_at(eq);
    let value_text = &value_text[1..];

    if target_text.trim().is_empty() || value_text.trim().is_empty() {
        return None;
    }

    let node = arena.push(line.range(), CstKind::Raw, Some(parent));
    let target_range = TextRange::new(
        TextSize::new(u32::try_from(content_start).unwrap_or(0)),
        TextSize::new(u32::try_from(content_start + eq).unwrap_or(0)),
    );
    let value_start = content_start + eq + 1;
    let value_range = TextRange::new(
        TextSize::new(u32::try_from(value_start).unwrap_or(0)),
        TextSize::new(u32::try_from(value_start + value_text.len()).unwrap_or(0)),
    );

    let targets: Vec<NodeId> = split_top_level(target_text, b',')
        .into_iter()
        .map(|_| parse_expr(src, target_range, arena, Some(node)))
        .collect();
    let value = parse_expr(src, value_range, arena, Some(node));
    arena.get_mut(node).kind = CstKind::Assign { targets, value };
    Some(node)
}

fn find_top_level_single_eq(text: &str) -> Option<usize> {
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
                let next_eq = bytes.get(i + 1) == Some(&b'=');
                let prev_cmp = i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>' | b'+' | b'-' | b'*' | b'/');
                if !next_eq && !prev_cmp {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn try_lower_expr_statement(src: &str, line: &LogicalLine, arena: &mut Arena, parent: NodeId) -> Option<NodeId> {
    let text = line.range().slice(src);
    let leading = text.len() - text.trim_start_matches([' ', '\t']).len();
    let trailing_nl = text.len() - text.trim_end_matches(['\n', '\r']).len();
    let start = line.range().start().to_usize() + leading;
    let end = line.range().end().to_usize() - trailing_nl;
    if start >= end {
        return None;
    }
    let range = TextRange::new(TextSize::new(u32::try_from(start).unwrap_or(0)), TextSize::new(u32::try_from(end).unwrap_or(0)));
    let content = range.slice(src);
    if content.starts_with("return")
        || content.starts_with("raise")
        || content.starts_with("pass")
        || content.starts_with("break")
        || content.starts_with("continue")
        || content.starts_with("yield")
        || content.starts_with("assert")
        || content.starts_with("del ")
        || content.starts_with("global ")
        || content.starts_with("nonlocal ")
    {
        return None;
    }

    let node = arena.push(line.range(), CstKind::Raw, Some(parent));
    let value = parse_expr(src, range, arena, Some(node));
    // Only treat it as a modeled expression-statement if it actually parsed
    // as something other than an unstructured raw span covering the whole
    // line; otherwise there is nothing gained over leaving it as Raw.
    arena.get_mut(node).kind = CstKind::ExprStatement { value };
    Some(node)
}
