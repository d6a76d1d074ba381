//! FastAPI's pinned Starlette version bump (spec §4.4, scenario S7).
//!
//! FastAPI re-exports most of Starlette's public surface under its own
//! package, and the migration guide asks users to import from `fastapi.*`
//! instead — except `starlette.status`, which FastAPI deliberately does not
//! re-export and which callers must keep importing from Starlette directly.

use pyshift_cst::{Cst, CstKind, ImportFromNames};

use crate::{Confidence, Edit, Rule, RuleOutput, Tier1Transformer};

pub struct FastApiTransformer;

impl Tier1Transformer for FastApiTransformer {
    fn library(&self) -> &'static str {
        "fastapi"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 1] = [Rule { id: "fastapi.move-starlette-imports", confidence: Confidence::High, apply: move_starlette_imports }];

/// Modules FastAPI re-exports; `starlette.status` is deliberately absent
/// (S7's documented exclusion — there is no `fastapi.status`).
const RELOCATED_MODULES: &[(&str, &str)] =
    &[("starlette.responses", "fastapi.responses"), ("starlette.requests", "fastapi.requests"), ("starlette.background", "fastapi.background")];

/// `from starlette.responses import JSONResponse` →
/// `from fastapi.responses import JSONResponse`. `Confidence::High`: this
/// doesn't depend on the Usage Index at all — the import statement's own
/// module path is the exact match.
fn move_starlette_imports(cst: &Cst, _index: &pyshift_usage::UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    let arena = cst.arena();

    for (node, kind, _) in arena.nodes() {
        let CstKind::ImportFrom { level: 0, module: Some(module), names: ImportFromNames::Aliases(aliases) } = kind else { continue };
        let Some((_, new_module)) = RELOCATED_MODULES.iter().find(|(old, _)| *old == module.as_str()) else { continue };

        let rendered_names: Vec<String> = aliases
            .iter()
            .map(|alias| match &alias.asname {
                Some(asname) => format!("{} as {asname}", alias.name),
                None => alias.name.clone(),
            })
            .collect();
        let new_source = format!("from {new_module} import {}\n", rendered_names.join(", "));

        output.edits.push(Edit::ReplaceImport { node, new_source });
    }
    output
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use pyshift_cst::EditBatch;
    use pyshift_usage::UsageIndex;

    fn run(source: &str) -> (RuleOutput, Cst) {
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let index = UsageIndex::build(&cst, "fastapi");
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
                Edit::ReplaceImport { node, new_source } => batch.replace_node(cst, *node, new_source.clone()),
                _ => unreachable!("fastapi rules only emit import rewrites"),
            }
        }
        batch.commit(cst, Path::new("<test>")).unwrap().render()
    }

    #[test]
    fn s7_moves_starlette_responses_import_to_fastapi() {
        let source = "from starlette.responses import JSONResponse\nr = JSONResponse({})\n";
        let (output, cst) = run(source);
        assert_eq!(output.edits.len(), 1);
        assert_eq!(commit(&cst, &output), "from fastapi.responses import JSONResponse\nr = JSONResponse({})\n");
    }

    #[test]
    fn s7_preserves_aliased_names_and_multiple_imports() {
        let source = "from starlette.responses import JSONResponse as JR, HTMLResponse\n";
        let (output, cst) = run(source);
        assert_eq!(commit(&cst, &output), "from fastapi.responses import JSONResponse as JR, HTMLResponse\n");
    }

    #[test]
    fn s7_leaves_starlette_status_import_untouched() {
        let source = "from starlette.status import HTTP_200_OK\n";
        let (output, _cst) = run(source);
        assert!(output.edits.is_empty());
    }

    #[test]
    fn is_idempotent() {
        let source = "from starlette.responses import JSONResponse\n";
        let (first, cst) = run(source);
        let once = commit(&cst, &first);
        let cst2 = Cst::parse(&once, Path::new("<test>")).unwrap();
        let index2 = UsageIndex::build(&cst2, "fastapi");
        let mut second = RuleOutput::default();
        for rule in RULES.iter() {
            second.merge((rule.apply)(&cst2, &index2));
        }
        assert!(second.edits.is_empty());
    }
}
