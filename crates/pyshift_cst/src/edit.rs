//! Queued edits and `commit()`. Every rewrite is expressed as a
//! `(TextRange, String)` splice against the tree's *current* source text;
//! `commit()` sorts them, rejects overlaps, stitches the untouched spans back
//! in between, and re-parses the result. There is no in-place arena mutation,
//! so a committed [`crate::Cst`] is always consistent with its own text.

use std::path::Path;

use pyshift_text_size::TextRange;
use thiserror::Error;

use crate::arena::NodeId;
use crate::imports::{has_equivalent_import, import_statements, top_of_file_insert_point};
use crate::node::CstKind;
use crate::parser::{Cst, ParseError};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("overlapping edits at {first} and {second}")]
    OverlappingEdits { first: TextRange, second: TextRange },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A single queued text replacement.
#[derive(Debug, Clone)]
struct QueuedEdit {
    range: TextRange,
    replacement: String,
}

/// Accumulates edits against one [`Cst`] before they are applied together.
/// Built up by a transformer, then handed to [`Cst::with_edits`] (via
/// [`EditBatch::commit`]) once a whole rule's rewrites have been queued, so
/// that e.g. replacing a call and inserting an import happen atomically.
#[derive(Debug, Clone, Default)]
pub struct EditBatch {
    edits: Vec<QueuedEdit>,
}

impl EditBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_range(&mut self, range: TextRange, replacement: impl Into<String>) {
        self.edits.push(QueuedEdit { range, replacement: replacement.into() });
    }

    /// Replaces the exact span a node occupies in its originating tree.
    pub fn replace_node(&mut self, cst: &Cst, node: NodeId, replacement: impl Into<String>) {
        let range = cst.arena().get_node_range(node);
        self.replace_range(range, replacement);
    }

    /// Inserts text immediately before `range.start()`, e.g. a new `import`
    /// line ahead of the first statement.
    pub fn insert_before(&mut self, range: TextRange, text: impl Into<String>) {
        self.edits.push(QueuedEdit { range: TextRange::at(range.start(), 0.into()), replacement: text.into() });
    }

    /// Deletes a node's exact span (replacement with an empty string).
    pub fn delete_range(&mut self, range: TextRange) {
        self.replace_range(range, String::new());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Adds a top-of-file `from module import name [as alias]` unless an
    /// equivalent import already exists (spec §4.1 "import ops":
    /// `ensure_import`).
    pub fn ensure_import(&mut self, cst: &Cst, module: &str, name: &str, alias: Option<&str>) {
        if has_equivalent_import(cst, module, name, alias) {
            return;
        }
        let statement = match alias {
            Some(alias) => format!("from {module} import {name} as {alias}\n"),
            None => format!("from {module} import {name}\n"),
        };
        let point = top_of_file_insert_point(cst);
        self.insert_before(point, statement);
    }

    /// Drops, narrows, or leaves untouched every `import`/`from...import`
    /// statement in `cst` depending on whether `is_used` reports any of its
    /// bound local names as still referenced (spec §4.1 "import ops":
    /// `remove_unused_imports`; key algorithm: "re-indexes used names and
    /// drops imports whose bound symbols have no remaining references").
    /// Wildcard and unresolved-relative imports are never candidates —
    /// neither can be proven unused.
    pub fn remove_unused_imports(&mut self, cst: &Cst, is_used: impl Fn(&str) -> bool) {
        for statement in import_statements(cst) {
            let kept_names: Vec<&str> = statement.bound_names.iter().copied().filter(|name| is_used(name)).collect();
            if kept_names.len() == statement.bound_names.len() {
                continue;
            }
            if kept_names.is_empty() {
                self.delete_range(statement.range);
                continue;
            }
            let CstKind::Import { names } | CstKind::ImportFrom { names: crate::node::ImportFromNames::Aliases(names), .. } =
                cst.arena().kind(statement.node)
            else {
                continue;
            };
            let kept_aliases: Vec<&crate::node::ImportAlias> =
                names.iter().filter(|a| kept_names.contains(&a.asname.as_deref().unwrap_or(a.name.as_str()))).collect();
            let rendered = (statement.rerender)(&kept_aliases);
            self.replace_range(statement.range, rendered);
        }
    }

    /// Applies every queued edit to `cst`'s source and re-parses the result.
    /// Edits are applied in descending start order so that earlier offsets
    /// stay valid while later ones are spliced in; two edits whose ranges
    /// overlap are rejected rather than silently favoring one.
    pub fn commit(mut self, cst: &Cst, path: &Path) -> Result<Cst, CommitError> {
        self.edits.sort_by_key(|e| (e.range.start(), e.range.end()));
        for pair in self.edits.windows(2) {
            if pair[0].range.end() > pair[1].range.start() {
                return Err(CommitError::OverlappingEdits { first: pair[0].range, second: pair[1].range });
            }
        }

        let source = cst.source();
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0usize;
        for edit in &self.edits {
            let start = edit.range.start().to_usize();
            let end = edit.range.end().to_usize();
            out.push_str(&source[cursor..start]);
            out.push_str(&edit.replacement);
            cursor = end;
        }
        out.push_str(&source[cursor..]);

        Cst::parse(&out, path).map_err(CommitError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_import_is_a_no_op_when_already_present() {
        let cst = Cst::parse("from pydantic import BaseModel\nu = BaseModel()\n", Path::new("<test>")).unwrap();
        let mut batch = EditBatch::new();
        batch.ensure_import(&cst, "pydantic", "BaseModel", None);
        assert!(batch.is_empty());
    }

    #[test]
    fn ensure_import_inserts_after_existing_imports() {
        let cst = Cst::parse("import os\n\nx = 1\n", Path::new("<test>")).unwrap();
        let mut batch = EditBatch::new();
        batch.ensure_import(&cst, "pydantic", "ConfigDict", None);
        let new_cst = batch.commit(&cst, Path::new("<test>")).unwrap();
        assert_eq!(new_cst.render(), "import os\nfrom pydantic import ConfigDict\n\nx = 1\n");
    }

    #[test]
    fn remove_unused_imports_drops_a_fully_unused_statement() {
        let cst = Cst::parse("from pydantic import BaseModel\nx = 1\n", Path::new("<test>")).unwrap();
        let mut batch = EditBatch::new();
        batch.remove_unused_imports(&cst, |_name| false);
        let new_cst = batch.commit(&cst, Path::new("<test>")).unwrap();
        assert_eq!(new_cst.render(), "x = 1\n");
    }

    #[test]
    fn remove_unused_imports_narrows_a_multi_name_statement() {
        let cst = Cst::parse("from pydantic import BaseModel, ConfigDict\nu = BaseModel()\n", Path::new("<test>")).unwrap();
        let mut batch = EditBatch::new();
        batch.remove_unused_imports(&cst, |name| name == "BaseModel");
        let new_cst = batch.commit(&cst, Path::new("<test>")).unwrap();
        assert_eq!(new_cst.render(), "from pydantic import BaseModel\nu = BaseModel()\n");
    }

    #[test]
    fn remove_unused_imports_leaves_wildcard_imports_alone() {
        let cst = Cst::parse("from pydantic import *\nx = 1\n", Path::new("<test>")).unwrap();
        let mut batch = EditBatch::new();
        batch.remove_unused_imports(&cst, |_name| false);
        assert!(batch.is_empty());
    }
}
