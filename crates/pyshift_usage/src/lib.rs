//! The Usage Index (spec §4.3): given a parsed file and a target library,
//! builds the complete set of [`ImportRecord`]s and [`UsageRecord`]s that
//! refer to it, applying the six import-resolution rules from spec §4.3 in
//! order.
//!
//! This crate does not itself decide what to *do* about a usage — that is
//! the Transformer Library's job, one layer up — it only answers "where does
//! this file touch the target library, and how confident are we in that
//! resolution". `Confidence::Low` is never a silently dropped usage (spec
//! §4.3 note on rule 4 and rule 6): wildcard imports and post-import
//! rebinding both still produce [`UsageRecord`]s, just tagged accordingly.

use rustc_hash::FxHashMap;

use pyshift_cst::{Cst, CstKind, ImportFromNames, NodeId};
use pyshift_text_size::{TextRange, TextSize};

/// How an import bound its local name(s) to the library (spec §3
/// `ImportRecord.kind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import library` or `import library as alias`.
    Module,
    /// `from library import name` or `from library import name as alias`.
    FromModule,
    /// `from library import *`.
    Wildcard,
}

#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub kind: ImportKind,
    /// The module path as written, e.g. `"pydantic"` or `"sqlalchemy.orm"`.
    pub module: String,
    /// The imported symbol for a from-import, e.g. `Some("BaseModel")`.
    pub imported_symbol: Option<String>,
    /// The name this import binds in the file: the alias if one was given,
    /// otherwise the imported name itself.
    pub local_name: String,
    pub is_aliased: bool,
    pub range: TextRange,
    pub node: NodeId,
}

/// The syntactic context a usage was found in (spec §3 `UsageRecord`, spec
/// §4.3 "syntactic role").
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRole {
    Call,
    Decorator,
    AttributeChain,
    ClassBody,
    AssignmentTarget,
    Other,
}

/// Whether a usage's resolution to the library is certain or merely
/// plausible (spec §4.3 rules 4 and 6: wildcard imports and post-import
/// rebinding are both reported, never dropped, but flagged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionConfidence {
    Certain,
    Low,
}

#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// The fully qualified symbol being used, resolved through imports and
    /// aliases, e.g. `"pydantic.BaseModel"`.
    pub symbol: String,
    pub node: NodeId,
    pub range: TextRange,
    pub role: UsageRole,
    pub confidence: ResolutionConfidence,
}

/// The complete set of import and usage records for one file, against one
/// target library.
#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    pub imports: Vec<ImportRecord>,
    pub usages: Vec<UsageRecord>,
}

impl UsageIndex {
    /// Builds the index for `library` over `cst`. Never fails: a file with
    /// no references to `library` simply yields an empty index.
    #[must_use]
    pub fn build(cst: &Cst, library: &str) -> Self {
        let arena = cst.arena();
        let mut nodes: Vec<(NodeId, &CstKind, TextRange)> = arena.nodes().collect();
        nodes.sort_by_key(|(id, _, range)| (range.start(), *id));

        let mut imports = Vec::new();
        let mut bindings: FxHashMap<String, (String, TextRange)> = FxHashMap::default();
        let mut wildcard: Option<(String, TextRange)> = None;

        for &(node, kind, range) in &nodes {
            match kind {
                CstKind::Import { names } => {
                    for alias in names {
                        if alias.name != library && !alias.name.starts_with(&format!("{library}.")) {
                            continue;
                        }
                        let local_name = alias.asname.clone().unwrap_or_else(|| alias.name.clone());
                        imports.push(ImportRecord {
                            kind: ImportKind::Module,
                            module: alias.name.clone(),
                            imported_symbol: None,
                            local_name: local_name.clone(),
                            is_aliased: alias.asname.is_some(),
                            range,
                            node,
                        });
                        bindings.insert(local_name, (alias.name.clone(), range));
                    }
                }
                CstKind::ImportFrom { level, module, names } => {
                    // Rule 5: relative imports are resolved only if the
                    // file's package path is known. The scanner does not
                    // track package paths, so every relative import is
                    // conservatively left unresolved rather than guessed at.
                    if *level > 0 {
                        continue;
                    }
                    let Some(module) = module else { continue };
                    if *module != library && !module.starts_with(&format!("{library}.")) {
                        continue;
                    }
                    match names {
                        ImportFromNames::Aliases(aliases) => {
                            for alias in aliases {
                                let local_name = alias.asname.clone().unwrap_or_else(|| alias.name.clone());
                                let symbol = format!("{module}.{}", alias.name);
                                imports.push(ImportRecord {
                                    kind: ImportKind::FromModule,
                                    module: module.clone(),
                                    imported_symbol: Some(alias.name.clone()),
                                    local_name: local_name.clone(),
                                    is_aliased: alias.asname.is_some(),
                                    range,
                                    node,
                                });
                                bindings.insert(local_name, (symbol, range));
                            }
                        }
                        ImportFromNames::Star => {
                            imports.push(ImportRecord {
                                kind: ImportKind::Wildcard,
                                module: module.clone(),
                                imported_symbol: None,
                                local_name: "*".to_string(),
                                is_aliased: false,
                                range,
                                node,
                            });
                            wildcard = Some((module.clone(), range));
                        }
                    }
                }
                _ => {}
            }
        }

        // Rule 6: track the earliest point (if any) where a bound local
        // name is reassigned to something else. Every usage at or after
        // that point is still indexed, just marked Low confidence, per the
        // documented open question on rebinding.
        let mut rebind_after: FxHashMap<String, TextSize> = FxHashMap::default();
        for &(_, kind, _) in &nodes {
            let CstKind::Assign { targets, .. } = kind else { continue };
            for target in targets {
                let CstKind::Name { id } = arena.kind(*target) else { continue };
                let Some((_, import_range)) = bindings.get(id) else { continue };
                let target_range = arena.get_node_range(*target);
                if target_range.start() <= import_range.start() {
                    continue;
                }
                rebind_after
                    .entry(id.clone())
                    .and_modify(|existing| *existing = (*existing).min(target_range.start()))
                    .or_insert(target_range.start());
            }
        }

        let mut usages = Vec::new();
        for &(node, kind, range) in &nodes {
            let CstKind::Name { id } = kind else { continue };
            if let Some((symbol, _)) = bindings.get(id) {
                // `>`, not `>=`: the rebind assignment's own target occurrence
                // is still the certain one being tracked; only usages that
                // come strictly after it are degraded.
                let confidence = match rebind_after.get(id) {
                    Some(&rebound_at) if range.start() > rebound_at => ResolutionConfidence::Low,
                    _ => ResolutionConfidence::Certain,
                };
                usages.push(UsageRecord { symbol: symbol.clone(), node, range, role: role_of(arena, node), confidence });
            } else if let Some((module, _)) = &wildcard {
                // Conservative subset of rule 4: a bare call to an
                // unresolved name when a wildcard import is in scope is
                // reported as a possible reference, never silently ignored.
                if matches!(arena.kind(arena.parent_of(node).unwrap_or(node)), CstKind::Call { func, .. } if *func == node)
                {
                    usages.push(UsageRecord {
                        symbol: format!("{module}.{id}"),
                        node,
                        range,
                        role: UsageRole::Call,
                        confidence: ResolutionConfidence::Low,
                    });
                }
            }
        }

        Self { imports, usages }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.usages.is_empty()
    }
}

fn role_of(arena: &pyshift_cst::Arena, node: NodeId) -> UsageRole {
    let mut cursor = Some(node);
    for _ in 0..8 {
        let Some(id) = cursor else { break };
        if matches!(arena.kind(id), CstKind::Decorator { .. }) {
            return UsageRole::Decorator;
        }
        cursor = arena.parent_of(id);
    }

    match arena.parent_of(node) {
        Some(parent) => match arena.kind(parent) {
            CstKind::Call { func, .. } if *func == node => UsageRole::Call,
            CstKind::Attribute { value, .. } if *value == node => UsageRole::AttributeChain,
            CstKind::ClassDef { bases, .. } if bases.contains(&node) => UsageRole::ClassBody,
            CstKind::Assign { targets, .. } if targets.contains(&node) => UsageRole::AssignmentTarget,
            _ => UsageRole::Other,
        },
        None => UsageRole::Other,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;

    use super::*;

    fn build(source: &str, library: &str) -> UsageIndex {
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        UsageIndex::build(&cst, library)
    }

    #[test]
    fn resolves_plain_import_and_call() {
        let index = build("import pydantic\nu = pydantic.BaseModel()\n", "pydantic");
        assert_eq!(index.imports.len(), 1);
        assert_eq!(index.imports[0].kind, ImportKind::Module);
        assert!(index.usages.iter().any(|u| u.symbol == "pydantic" && u.role == UsageRole::AttributeChain));
    }

    #[test]
    fn resolves_aliased_from_import() {
        let index = build("from pydantic import BaseModel as BM\nu = BM()\n", "pydantic");
        let import = &index.imports[0];
        assert!(import.is_aliased);
        assert_eq!(import.local_name, "BM");
        let usage = index.usages.iter().find(|u| u.role == UsageRole::Call).unwrap();
        assert_eq!(usage.symbol, "pydantic.BaseModel");
        assert_eq!(usage.confidence, ResolutionConfidence::Certain);
    }

    #[test]
    fn wildcard_import_flags_calls_low_confidence() {
        let index = build("from pydantic import *\nm = BaseModel()\n", "pydantic");
        assert_eq!(index.imports[0].kind, ImportKind::Wildcard);
        let usage = index.usages.iter().find(|u| u.role == UsageRole::Call).unwrap();
        assert_eq!(usage.confidence, ResolutionConfidence::Low);
        assert_eq!(usage.symbol, "pydantic.BaseModel");
    }

    #[test]
    fn relative_import_is_left_unresolved() {
        let index = build("from . import BaseModel\nm = BaseModel()\n", "pydantic");
        assert!(index.imports.is_empty());
        assert!(index.usages.is_empty());
    }

    #[test]
    fn rebinding_after_import_degrades_subsequent_usages() {
        let index = build("import pydantic\npydantic = None\nx = pydantic\n", "pydantic");
        let usages: Vec<_> = index.usages.iter().collect();
        // The rebind assignment target itself is recorded at Certain
        // confidence (it's the binding occurrence being tracked);
        // everything after it is Low.
        let target = usages.iter().find(|u| u.role == UsageRole::AssignmentTarget).unwrap();
        assert_eq!(target.confidence, ResolutionConfidence::Certain);
        let later = usages.iter().find(|u| u.role == UsageRole::Other || u.role == UsageRole::AttributeChain).unwrap();
        assert_eq!(later.confidence, ResolutionConfidence::Low);
    }

    #[test]
    fn base_class_usage_is_tagged_class_body() {
        let source = indoc! {"
            from pydantic import BaseModel

            class U(BaseModel):
                x = 1
        "};
        let index = build(source, "pydantic");
        let usage = index.usages.iter().find(|u| u.role == UsageRole::ClassBody).unwrap();
        assert_eq!(usage.symbol, "pydantic.BaseModel");
    }

    #[test]
    fn decorator_usage_is_tagged_decorator() {
        let source = indoc! {"
            from pydantic import validator

            @validator(\"age\")
            def v(cls, x):
                return x
        "};
        let index = build(source, "pydantic");
        let usage = index.usages.iter().find(|u| u.role == UsageRole::Decorator).unwrap();
        assert_eq!(usage.symbol, "pydantic.validator");
    }
}
