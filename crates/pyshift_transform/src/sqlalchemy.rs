//! SQLAlchemy 1.4 → 2.0 (spec §4.4, scenarios S4–S6).
//!
//! Covers the 2.0-style query API (`Session.execute(select(...))` instead
//! of the legacy `Session.query(...)` chain), `text()`-wrapping of raw SQL
//! strings passed to `.execute(...)`, and the removed `future=True` kwarg on
//! `create_engine`.

use pyshift_cst::{CallArg, Cst, CstKind, NodeId};
use pyshift_text_size::TextRange;
use pyshift_usage::{UsageIndex, UsageRole};

use crate::{slice, Confidence, Edit, ImportRequirement, Rule, RuleOutput, Tier1Transformer};

pub struct SqlAlchemyTransformer;

impl Tier1Transformer for SqlAlchemyTransformer {
    fn library(&self) -> &'static str {
        "sqlalchemy"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 3] = [
    Rule { id: "sqlalchemy.wrap-raw-sql-in-text", confidence: Confidence::Medium, apply: wrap_execute_string_literal },
    Rule { id: "sqlalchemy.drop-create_engine-future-kwarg", confidence: Confidence::High, apply: drop_create_engine_future },
    Rule { id: "sqlalchemy.query-chain-to-select", confidence: Confidence::Medium, apply: rewrite_query_chain },
];

/// `conn.execute("SELECT 1")` → `conn.execute(text("SELECT 1"))` (S6).
/// `Confidence::Medium`: there's no way to know `conn` is a SQLAlchemy
/// connection without type inference, so this is gated on "library in
/// scope" plus the exact `.execute(<one string literal>)` call shape.
fn wrap_execute_string_literal(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    if index.imports.is_empty() {
        return output;
    }
    let arena = cst.arena();
    for (_, kind, _) in arena.nodes() {
        let CstKind::Call { func, args } = kind else { continue };
        let CstKind::Attribute { attr, .. } = arena.kind(*func) else { continue };
        if attr != "execute" {
            continue;
        }
        let [arg] = args.as_slice() else { continue };
        if arg.keyword.is_some() || arg.is_starred {
            continue;
        }
        if !matches!(arena.kind(arg.value), CstKind::Str { .. }) {
            continue;
        }
        let literal = slice(cst, arg.value);
        output.edits.push(Edit::ReplaceNode { node: arg.value, replacement: format!("text({literal})") });
        output.requires_imports.push(ImportRequirement::new("sqlalchemy", "text"));
    }
    output
}

/// `create_engine("sqlite:///x", future=True)` → `create_engine("sqlite:///x")`
/// (S5): `future` became the only behavior in 2.0 and the kwarg was
/// removed outright. `Confidence::High`: gated on the Usage Index having
/// resolved the call to `sqlalchemy.create_engine` through an actual import.
fn drop_create_engine_future(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    let arena = cst.arena();
    for usage in &index.usages {
        if usage.role != UsageRole::Call || usage.symbol != "sqlalchemy.create_engine" {
            continue;
        }
        let Some(call_id) = arena.parent_of(usage.node).filter(|p| matches!(arena.kind(*p), CstKind::Call { func, .. } if *func == usage.node))
        else {
            continue;
        };
        let CstKind::Call { args, .. } = arena.kind(call_id) else { continue };
        if let Some((range, replacement)) = remove_keyword_argument(cst, args, "future") {
            output.edits.push(Edit::ReplaceStringAtRange { range, replacement });
        }
    }
    output
}

/// Replaces the whole argument-list span (from the first argument's start
/// to the last argument's end) with every argument except `remove_name`
/// re-rendered and comma-joined — the simplest way to drop a trailing comma
/// cleanly (spec §4.4 "argument-remove": "remove a keyword argument and any
/// trailing comma it leaves behind"). Returns `None` if `remove_name` isn't
/// present as a keyword argument.
fn remove_keyword_argument(cst: &Cst, args: &[CallArg], remove_name: &str) -> Option<(TextRange, String)> {
    let arena = cst.arena();
    let has_target = args.iter().any(|arg| keyword_name(cst, arg).is_some_and(|name| name == remove_name));
    if !has_target {
        return None;
    }

    let start = args.iter().map(|arg| arg_start(cst, arg)).min()?;
    let end = args.iter().map(|arg| arena.get_node_range(arg.value).end()).max()?;

    let kept: Vec<String> = args
        .iter()
        .filter(|arg| keyword_name(cst, arg).is_none_or(|name| name != remove_name))
        .map(|arg| render_arg(cst, arg))
        .collect();

    Some((TextRange::new(start, end), kept.join(", ")))
}

fn keyword_name<'a>(cst: &'a Cst, arg: &CallArg) -> Option<&'a str> {
    let keyword = arg.keyword?;
    match cst.arena().kind(keyword) {
        CstKind::Name { id } => Some(id.as_str()),
        _ => None,
    }
}

fn arg_start(cst: &Cst, arg: &CallArg) -> pyshift_text_size::TextSize {
    match arg.keyword {
        Some(keyword) => cst.arena().get_node_range(keyword).start(),
        None => cst.arena().get_node_range(arg.value).start(),
    }
}

fn render_arg(cst: &Cst, arg: &CallArg) -> String {
    let prefix = if arg.is_starred { "*" } else { "" };
    match arg.keyword {
        Some(keyword) => format!("{prefix}{}={}", slice(cst, keyword), slice(cst, arg.value)),
        None => format!("{prefix}{}", slice(cst, arg.value)),
    }
}

/// `session.query(X).filter(c).first()` →
/// `session.execute(select(X).where(c)).scalars().first()`, and
/// `session.query(X).count()` →
/// `session.execute(select(func.count()).select_from(X)).scalar()` (S4).
/// `Confidence::Medium`: `session` is never resolved to a SQLAlchemy
/// `Session` through imports, so this is the same "library in scope plus
/// exact call shape" heuristic as the other syntactic rules here.
fn rewrite_query_chain(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    if index.imports.is_empty() {
        return output;
    }
    let arena = cst.arena();
    for (node, kind, range) in arena.nodes() {
        let CstKind::Call { func, args } = kind else { continue };
        if !args.is_empty() {
            continue;
        }
        let CstKind::Attribute { value: chain_head, attr: terminal } = arena.kind(*func) else { continue };
        if terminal != "first" && terminal != "count" {
            continue;
        }
        let Some(chain) = parse_query_chain(cst, *chain_head) else { continue };
        if terminal == "count" && !chain.filters.is_empty() {
            // Folding a filter into `func.count()` would lose it outright;
            // leave this shape for a human (or a higher tier) rather than
            // silently dropping a condition.
            continue;
        }

        let receiver = slice(cst, chain.receiver);
        let model = slice(cst, chain.model);
        let replacement = if terminal == "count" {
            output.requires_imports.push(ImportRequirement::new("sqlalchemy", "func"));
            format!("{receiver}.execute(select(func.count()).select_from({model})).scalar()")
        } else {
            let wheres: String = chain.filters.iter().map(|f| format!(".where({f})")).collect();
            format!("{receiver}.execute(select({model}){wheres}).scalars().first()")
        };
        output.requires_imports.push(ImportRequirement::new("sqlalchemy", "select"));
        output.edits.push(Edit::ReplaceStringAtRange { range, replacement });
    }
    output
}

struct QueryChain {
    receiver: NodeId,
    model: NodeId,
    filters: Vec<String>,
}

fn parse_query_chain(cst: &Cst, start: NodeId) -> Option<QueryChain> {
    let arena = cst.arena();
    let mut current = start;
    let mut filters: Vec<String> = Vec::new();

    loop {
        let CstKind::Call { func, args } = arena.kind(current) else { return None };
        let CstKind::Attribute { value: inner, attr } = arena.kind(*func) else { return None };
        match attr.as_str() {
            "filter" => {
                let [arg] = args.as_slice() else { return None };
                if arg.keyword.is_some() || arg.is_starred {
                    return None;
                }
                filters.push(slice(cst, arg.value).to_string());
                current = *inner;
            }
            "query" => {
                let [arg] = args.as_slice() else { return None };
                if arg.keyword.is_some() || arg.is_starred {
                    return None;
                }
                filters.reverse();
                return Some(QueryChain { receiver: *inner, model: arg.value, filters });
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use pyshift_cst::EditBatch;

    fn run(source: &str) -> (RuleOutput, Cst) {
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let index = UsageIndex::build(&cst, "sqlalchemy");
        let mut combined = RuleOutput::default();
        for rule in RULES.iter() {
            combined.merge((rule.apply)(&cst, &index));
        }
        (combined, cst)
    }

    fn commit(cst: &Cst, output: &RuleOutput) -> String {
        let mut batch = EditBatch::new();
        for edit in &output.edits {
            match edit {
                Edit::ReplaceNode { node, replacement } => batch.replace_node(cst, *node, replacement.clone()),
                Edit::ReplaceStringAtRange { range, replacement } => batch.replace_range(*range, replacement.clone()),
                _ => unreachable!(),
            }
        }
        batch.commit(cst, Path::new("<test>")).unwrap().render()
    }

    #[test]
    fn s6_wraps_raw_sql_string_in_text() {
        let source = "import sqlalchemy\nconn.execute(\"SELECT 1\")\n";
        let (output, cst) = run(source);
        assert_eq!(output.requires_imports, vec![ImportRequirement::new("sqlalchemy", "text")]);
        assert_eq!(commit(&cst, &output), "import sqlalchemy\nconn.execute(text(\"SELECT 1\"))\n");
    }

    #[test]
    fn s5_drops_future_kwarg_without_dangling_comma() {
        let source = "from sqlalchemy import create_engine\ne = create_engine(\"sqlite:///x\", future=True)\n";
        let (output, cst) = run(source);
        assert_eq!(commit(&cst, &output), "from sqlalchemy import create_engine\ne = create_engine(\"sqlite:///x\")\n");
    }

    #[test]
    fn s4_rewrites_query_filter_first_chain() {
        let source = "import sqlalchemy\nsession.query(U).filter(U.id==1).first()\n";
        let (output, cst) = run(source);
        assert_eq!(commit(&cst, &output), "import sqlalchemy\nsession.execute(select(U).where(U.id==1)).scalars().first()\n");
    }

    #[test]
    fn s4_rewrites_query_count_chain() {
        let source = "import sqlalchemy\nsession.query(U).count()\n";
        let (output, cst) = run(source);
        assert_eq!(commit(&cst, &output), "import sqlalchemy\nsession.execute(select(func.count()).select_from(U)).scalar()\n");
    }

    #[test]
    fn wrap_execute_is_idempotent() {
        let source = "import sqlalchemy\nconn.execute(\"SELECT 1\")\n";
        let (first, cst) = run(source);
        let once = commit(&cst, &first);
        let cst2 = Cst::parse(&once, Path::new("<test>")).unwrap();
        let index2 = UsageIndex::build(&cst2, "sqlalchemy");
        let mut second = RuleOutput::default();
        for rule in RULES.iter() {
            second.merge((rule.apply)(&cst2, &index2));
        }
        assert!(second.edits.is_empty());
    }
}
