//! Import bookkeeping (spec §4.1 "import ops" + key algorithm): deciding
//! whether a `from module import name` already exists before adding one,
//! where a new top-of-file import belongs, and which existing imports have
//! no remaining reference once a transformer's edits are queued.
//!
//! Kept as a standalone module rather than folded into [`crate::edit`]
//! because both [`crate::edit::EditBatch`] and, eventually, a caller that
//! only wants to *ask* ("is `name` already imported?") without queuing an
//! edit need these queries independently.

use pyshift_text_size::{TextRange, TextSize};

use crate::arena::NodeId;
use crate::node::{CstKind, ImportAlias, ImportFromNames};
use crate::parser::Cst;

/// True if `from module import name [as alias]` already binds an equivalent
/// name — per spec §4.1, "an import is considered equivalent if the
/// imported symbol set is a superset" (so an existing `from x import *`
/// always satisfies any `name`) — "existing aliases are preserved" (an
/// alias is only equivalent to a request for the *same* alias, not the bare
/// name).
#[must_use]
pub fn has_equivalent_import(cst: &Cst, module: &str, name: &str, alias: Option<&str>) -> bool {
    for (_, kind, _) in cst.arena().nodes() {
        let CstKind::ImportFrom { level: 0, module: Some(m), names } = kind else { continue };
        if m != module {
            continue;
        }
        match names {
            ImportFromNames::Aliases(aliases) => {
                if aliases.iter().any(|a| a.name == name && a.asname.as_deref() == alias) {
                    return true;
                }
            }
            ImportFromNames::Star => return true,
        }
    }
    false
}

/// Where a new top-of-file import should be inserted: right after the last
/// contiguous leading import statement, skipping blank lines, comments, and
/// a module docstring; or right before the first substantive statement if
/// there are no imports yet.
#[must_use]
pub fn top_of_file_insert_point(cst: &Cst) -> TextRange {
    let arena = cst.arena();
    let CstKind::Module { body } = arena.kind(cst.root()) else {
        return TextRange::new(TextSize::new(0), TextSize::new(0));
    };

    let mut insert_at: Option<TextSize> = None;
    let mut first_substantive: Option<TextSize> = None;

    for &stmt in body {
        let range = arena.get_node_range(stmt);
        match arena.kind(stmt) {
            CstKind::Import { .. } | CstKind::ImportFrom { .. } => {
                insert_at = Some(range.end());
            }
            CstKind::ExprStatement { value } if matches!(arena.kind(*value), CstKind::Str { .. }) => {
                // module docstring; keep scanning
            }
            CstKind::Raw => {
                let text = range.slice(cst.source());
                let trimmed = text.trim_start();
                if text.trim().is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                first_substantive = Some(range.start());
                break;
            }
            _ => {
                first_substantive = Some(range.start());
                break;
            }
        }
    }

    let pos = insert_at.or(first_substantive).unwrap_or(TextSize::new(0));
    TextRange::new(pos, pos)
}

/// Every local name an import statement binds, paired with the node whose
/// range spans the whole statement — used by
/// [`crate::edit::EditBatch::remove_unused_imports`] to decide, per
/// statement, whether to drop it outright, narrow it to a subset of names,
/// or leave it untouched.
pub(crate) struct ImportStatement<'a> {
    pub node: NodeId,
    pub range: TextRange,
    pub bound_names: Vec<&'a str>,
    pub rerender: Box<dyn Fn(&[&ImportAlias]) -> String + 'a>,
}

pub(crate) fn import_statements(cst: &Cst) -> Vec<ImportStatement<'_>> {
    let arena = cst.arena();
    let mut out = Vec::new();
    for (node, kind, range) in arena.nodes() {
        match kind {
            CstKind::Import { names } => {
                let bound_names: Vec<&str> = names.iter().map(|a| a.asname.as_deref().unwrap_or(a.name.as_str())).collect();
                out.push(ImportStatement {
                    node,
                    range,
                    bound_names,
                    rerender: Box::new(|kept: &[&ImportAlias]| format!("import {}\n", render_alias_list(kept))),
                });
            }
            CstKind::ImportFrom { level: 0, module: Some(module), names: ImportFromNames::Aliases(aliases) } => {
                let bound_names: Vec<&str> = aliases.iter().map(|a| a.asname.as_deref().unwrap_or(a.name.as_str())).collect();
                let module = module.clone();
                out.push(ImportStatement {
                    node,
                    range,
                    bound_names,
                    rerender: Box::new(move |kept: &[&ImportAlias]| format!("from {module} import {}\n", render_alias_list(kept))),
                });
            }
            // Wildcard imports and unresolved relative imports are never
            // candidates for removal: we can't tell what a `*` import binds,
            // and a relative import's package path is unknown (spec §4.3
            // rule 5), so neither is safe to drop.
            _ => {}
        }
    }
    out
}

fn render_alias_list(aliases: &[&ImportAlias]) -> String {
    aliases
        .iter()
        .map(|a| match &a.asname {
            Some(asname) => format!("{} as {asname}", a.name),
            None => a.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn equivalent_import_matches_alias_exactly() {
        let cst = Cst::parse("from pydantic import BaseModel as BM\n", Path::new("<test>")).unwrap();
        assert!(has_equivalent_import(&cst, "pydantic", "BaseModel", Some("BM")));
        assert!(!has_equivalent_import(&cst, "pydantic", "BaseModel", None));
    }

    #[test]
    fn wildcard_import_satisfies_any_name() {
        let cst = Cst::parse("from pydantic import *\n", Path::new("<test>")).unwrap();
        assert!(has_equivalent_import(&cst, "pydantic", "ConfigDict", None));
    }

    #[test]
    fn insert_point_lands_after_last_leading_import() {
        let cst = Cst::parse("\"\"\"doc\"\"\"\nimport os\nfrom pydantic import BaseModel\n\nx = 1\n", Path::new("<test>")).unwrap();
        let point = top_of_file_insert_point(&cst);
        let before = &cst.source()[..point.start().to_usize()];
        assert!(before.ends_with("import BaseModel\n"));
    }

    #[test]
    fn insert_point_is_file_start_with_no_imports() {
        let cst = Cst::parse("x = 1\n", Path::new("<test>")).unwrap();
        let point = top_of_file_insert_point(&cst);
        assert_eq!(point.start().to_usize(), 0);
    }
}
