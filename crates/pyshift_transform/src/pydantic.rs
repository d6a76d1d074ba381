//! Pydantic v1 → v2 (spec §4.4, scenarios S1–S3).
//!
//! `pydantic` keeps the `BaseModel` instance methods (`.dict()`/`.json()`)
//! whose renames are exact-shape, a `@validator` decorator rewrite, and the
//! inner `class Config:` restructure into `model_config = ConfigDict(...)`.

use pyshift_cst::{Cst, CstKind, NodeId};
use pyshift_usage::{UsageIndex, UsageRole};

use crate::{line_indent_and_terminator, slice, Confidence, Edit, ImportRequirement, Rule, RuleOutput, Tier1Transformer};

pub struct PydanticTransformer;

impl Tier1Transformer for PydanticTransformer {
    fn library(&self) -> &'static str {
        "pydantic"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 4] = [
    Rule { id: "pydantic.dict-to-model_dump", confidence: Confidence::Medium, apply: rename_dict },
    Rule { id: "pydantic.json-to-model_dump_json", confidence: Confidence::Medium, apply: rename_json },
    Rule { id: "pydantic.validator-to-field_validator", confidence: Confidence::High, apply: rewrite_validator_decorator },
    Rule { id: "pydantic.config-class-to-model_config", confidence: Confidence::High, apply: restructure_config_class },
];

/// `u.dict()` → `u.model_dump()` (S1). Gated at `Confidence::Medium`: the
/// Usage Index can't tell `u` is a `BaseModel` instance without type
/// inference, so the matcher falls back to "any zero-arg `.dict()` call
/// while pydantic is in scope" (spec §4.4's own example of a heuristic
/// shape).
fn rename_dict(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    rename_zero_arg_method(cst, index, "dict", "model_dump")
}

/// `u.json()` → `u.model_dump_json()` (S1).
fn rename_json(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    rename_zero_arg_method(cst, index, "json", "model_dump_json")
}

fn rename_zero_arg_method(cst: &Cst, index: &UsageIndex, old_method: &str, new_method: &str) -> RuleOutput {
    let mut output = RuleOutput::default();
    if index.imports.is_empty() {
        return output;
    }
    let arena = cst.arena();
    for (_, kind, _) in arena.nodes() {
        let CstKind::Call { func, args } = kind else { continue };
        if !args.is_empty() {
            continue;
        }
        let CstKind::Attribute { value, attr } = arena.kind(*func) else { continue };
        if attr != old_method {
            continue;
        }
        let object_text = slice(cst, *value);
        output.edits.push(Edit::ReplaceNode { node: *func, replacement: format!("{object_text}.{new_method}") });
    }
    output
}

/// `@validator("age", pre=True)` → `@field_validator("age", mode="before")`
/// plus an inserted `@classmethod` (S2). Gated at `Confidence::High`: the
/// Usage Index already resolved `validator` back to `pydantic.validator`
/// through the file's actual imports, so this isn't a syntactic guess.
fn rewrite_validator_decorator(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    let arena = cst.arena();

    for usage in &index.usages {
        if usage.role != UsageRole::Decorator || usage.symbol != "pydantic.validator" {
            continue;
        }
        let Some(decorator_id) = find_ancestor_decorator(arena, usage.node) else { continue };
        let CstKind::Decorator { expr } = arena.kind(decorator_id) else { continue };
        let CstKind::Call { args, .. } = arena.kind(*expr) else { continue };

        let mut rendered_args = Vec::new();
        for arg in args {
            match arg.keyword {
                None => rendered_args.push(slice(cst, arg.value).to_string()),
                Some(keyword) => {
                    let CstKind::Name { id: keyword_name } = arena.kind(keyword) else { continue };
                    if keyword_name == "pre" {
                        let mode = if slice(cst, arg.value).trim() == "True" { "before" } else { "after" };
                        rendered_args.push(format!("mode=\"{mode}\""));
                    } else {
                        rendered_args.push(format!("{keyword_name}={}", slice(cst, arg.value)));
                    }
                }
            }
        }

        let decorator_range = arena.get_node_range(decorator_id);
        let decorator_text = decorator_range.slice(cst.source());
        let (indent, newline) = line_indent_and_terminator(decorator_text);
        let replacement = format!("{indent}@field_validator({}){newline}{indent}@classmethod{newline}", rendered_args.join(", "));

        output.edits.push(Edit::ReplaceStringAtRange { range: decorator_range, replacement });
        output.requires_imports.push(ImportRequirement::new("pydantic", "field_validator"));
        output.removes_imports.push("validator".to_string());
    }
    output
}

fn find_ancestor_decorator(arena: &pyshift_cst::Arena, start: NodeId) -> Option<NodeId> {
    let mut cursor = start;
    for _ in 0..8 {
        if matches!(arena.kind(cursor), CstKind::Decorator { .. }) {
            return Some(cursor);
        }
        cursor = arena.parent_of(cursor)?;
    }
    None
}

/// Inner `class Config: orm_mode = True; allow_mutation = False` →
/// `model_config = ConfigDict(from_attributes=True, frozen=True)` inside
/// the outer `BaseModel` subclass (S3). `orm_mode`/`allow_mutation` are
/// translated per spec §4.4's named mapping; any other key in `Config` is
/// carried over unchanged as a `ConfigDict` keyword with the same name.
fn restructure_config_class(cst: &Cst, index: &UsageIndex) -> RuleOutput {
    let mut output = RuleOutput::default();
    let arena = cst.arena();

    for (node, kind, _) in arena.nodes() {
        let CstKind::ClassDef { name, body, .. } = kind else { continue };
        if name != "Config" {
            continue;
        }
        let Some(parent) = arena.parent_of(node) else { continue };
        let CstKind::ClassDef { bases: outer_bases, .. } = arena.kind(parent) else { continue };
        if !outer_bases.iter().any(|base| base_is_pydantic_base_model(index, *base)) {
            continue;
        }

        let mut kwargs = Vec::new();
        for stmt in body {
            let CstKind::Assign { targets, value } = arena.kind(*stmt) else { continue };
            let [target] = targets.as_slice() else { continue };
            let CstKind::Name { id: key } = arena.kind(*target) else { continue };
            let value_text = slice(cst, *value).trim();
            match key.as_str() {
                "orm_mode" => kwargs.push(format!("from_attributes={value_text}")),
                "allow_mutation" => {
                    let frozen = if value_text == "False" { "True" } else { "False" };
                    kwargs.push(format!("frozen={frozen}"));
                }
                other => kwargs.push(format!("{other}={value_text}")),
            }
        }

        let config_range = arena.get_node_range(node);
        let config_text = config_range.slice(cst.source());
        let (indent, newline) = line_indent_and_terminator(config_text);
        let replacement = format!("{indent}model_config = ConfigDict({}){newline}", kwargs.join(", "));

        output.edits.push(Edit::ReplaceStringAtRange { range: config_range, replacement });
        output.requires_imports.push(ImportRequirement::new("pydantic", "ConfigDict"));
    }
    output
}

fn base_is_pydantic_base_model(index: &UsageIndex, base: NodeId) -> bool {
    index.usages.iter().any(|usage| usage.node == base && usage.symbol == "pydantic.BaseModel")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;

    use super::*;
    use pyshift_cst::EditBatch;

    fn run(source: &str) -> (RuleOutput, Cst) {
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let index = UsageIndex::build(&cst, "pydantic");
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
                _ => unreachable!("pydantic rules only emit node/range replacements"),
            }
        }
        batch.commit(cst, Path::new("<test>")).unwrap().render()
    }

    #[test]
    fn s1_dict_and_json_rename() {
        let source = "from pydantic import Model\nu = Model()\nd = u.dict()\nj = u.json()\n";
        let (output, cst) = run(source);
        assert_eq!(output.edits.len(), 2);
        assert_eq!(commit(&cst, &output), "from pydantic import Model\nu = Model()\nd = u.model_dump()\nj = u.model_dump_json()\n");
    }

    #[test]
    fn s2_validator_decorator_rewrite() {
        let source = indoc! {"
            from pydantic import validator

            @validator(\"age\", pre=True)
            def v(cls, x):
                return x
        "};
        let (output, cst) = run(source);
        assert_eq!(output.requires_imports, vec![ImportRequirement::new("pydantic", "field_validator")]);
        let rendered = commit(&cst, &output);
        assert!(rendered.contains("@field_validator(\"age\", mode=\"before\")\n@classmethod\n"));
    }

    #[test]
    fn s2_is_idempotent() {
        let source = indoc! {"
            from pydantic import validator

            @validator(\"age\", pre=True)
            def v(cls, x):
                return x
        "};
        let (output, cst) = run(source);
        let once = commit(&cst, &output);
        let cst2 = Cst::parse(&once, Path::new("<test>")).unwrap();
        let index2 = UsageIndex::build(&cst2, "pydantic");
        let mut second = RuleOutput::default();
        for rule in RULES.iter() {
            second.merge((rule.apply)(&cst2, &index2));
        }
        assert!(second.edits.is_empty(), "second run must find nothing left to rewrite");
    }

    #[test]
    fn s3_config_class_restructure() {
        let source = indoc! {"
            from pydantic import BaseModel

            class U(BaseModel):
                class Config:
                    orm_mode = True
                    allow_mutation = False
        "};
        let (output, cst) = run(source);
        assert_eq!(output.requires_imports, vec![ImportRequirement::new("pydantic", "ConfigDict")]);
        let rendered = commit(&cst, &output);
        assert!(rendered.contains("model_config = ConfigDict(from_attributes=True, frozen=True)"));
        assert!(!rendered.contains("class Config"));
    }
}
