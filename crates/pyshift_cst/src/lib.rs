//! The CST Facade (spec §4.1): a lossless concrete syntax tree for the subset
//! of Python pyshift's transformers need to match and rewrite.
//!
//! `Cst::parse` validates syntax with `libcst`'s own tokenizer (so "is this
//! valid Python" is never pyshift's own judgement call) and then lowers the
//! source into a small arena-backed tree of [`node::CstKind`] values — the
//! `libcst` parse tree itself is discarded after that check, since its nodes
//! carry no byte ranges to slice against; the lowering pass in [`lines`],
//! [`expr`] and [`lower`] is what actually builds the tree this crate hands
//! out. Every
//! construct the tree doesn't structurally model — an `if`, a comprehension,
//! a decorator we don't recognize — round-trips as a verbatim [`node::CstKind::Raw`]
//! span rather than being dropped or reformatted, which is what makes
//! `render(parse(x)) == x` (Testable Property 1) hold unconditionally.

mod arena;
mod edit;
mod expr;
mod imports;
mod lines;
mod lower;
mod node;
mod parser;

pub use arena::{Arena, NodeId, RangeIndex};
pub use edit::{CommitError, EditBatch};
pub use imports::{has_equivalent_import, top_of_file_insert_point};
pub use node::{CallArg, CstKind, ImportAlias, ImportFromNames};
pub use parser::{Cst, ParseError};

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;
    use test_case::test_case;

    use super::*;

    #[test_case("import os\n"; "plain import")]
    #[test_case("import os as o, sys\n"; "aliased import list")]
    #[test_case("from a.b import c, d as e\n"; "from-import with alias")]
    #[test_case("from . import sibling\n"; "relative import")]
    #[test_case("from a import *\n"; "star import")]
    #[test_case(indoc! {"
        class Model(BaseModel):
            class Config:
                orm_mode = True
    "}; "nested class body")]
    #[test_case(indoc! {"
        @validator(\"age\", pre=True)
        def v(cls, x):
            return x
    "}; "decorated function")]
    #[test_case("u = Model()\nd = u.dict()\n"; "assignment then call")]
    #[test_case("if x:\n    y = 1\nelse:\n    y = 2\n"; "if-else raw block")]
    fn render_reproduces_source_byte_for_byte(source: &str) {
        let cst = Cst::parse(source, Path::new("<test>")).expect("valid Python must parse");
        assert_eq!(cst.render(), source);
    }

    #[test]
    fn parse_rejects_invalid_syntax() {
        let err = Cst::parse("def f(:\n", Path::new("broken.py")).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn module_body_exposes_import_nodes() {
        let source = "import os\nfrom sys import path as p\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let CstKind::Module { body } = cst.arena().kind(cst.root()) else {
            panic!("root must lower to Module");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(cst.arena().kind(body[0]), CstKind::Import { .. }));
        assert!(matches!(cst.arena().kind(body[1]), CstKind::ImportFrom { .. }));
    }

    #[test]
    fn class_header_records_base_list() {
        let source = "class U(BaseModel, metaclass=ABCMeta):\n    x = 1\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let CstKind::Module { body } = cst.arena().kind(cst.root()) else { unreachable!() };
        let CstKind::ClassDef { name, bases, .. } = cst.arena().kind(body[0]) else {
            panic!("expected class def")
        };
        assert_eq!(name, "U");
        assert_eq!(bases.len(), 1);
        assert!(matches!(cst.arena().kind(bases[0]), CstKind::Name { id } if id == "BaseModel"));
    }

    #[test]
    fn commit_replaces_only_the_targeted_range() {
        let source = "u = Model()\nd = u.dict()\nj = u.json()\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let CstKind::Module { body } = cst.arena().kind(cst.root()) else { unreachable!() };
        let CstKind::Assign { value, .. } = cst.arena().kind(body[1]) else { panic!("expected assign") };
        let call_range = cst.arena().get_node_range(*value);

        let mut batch = EditBatch::new();
        batch.replace_range(call_range, "u.model_dump()");
        let new_cst = batch.commit(&cst, Path::new("<test>")).unwrap();

        assert_eq!(new_cst.render(), "u = Model()\nd = u.model_dump()\nj = u.json()\n");
    }

    #[test]
    fn commit_rejects_overlapping_edits() {
        let source = "u.dict()\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let range = cst.arena().get_node_range(cst.root());
        let mut batch = EditBatch::new();
        batch.replace_range(range, "a");
        batch.replace_range(range, "b");
        assert!(matches!(batch.commit(&cst, Path::new("<test>")), Err(CommitError::OverlappingEdits { .. })));
    }
}
