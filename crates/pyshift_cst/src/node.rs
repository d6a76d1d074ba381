//! The node vocabulary pyshift actually needs to match and rewrite. This is
//! deliberately not a full Python grammar: every construct the Transformer
//! Library (pyshift_transform) and Usage Index (pyshift_usage) don't need to
//! look inside of is kept as [`CstKind::Raw`], an opaque verbatim span. A
//! `Raw` node still round-trips losslessly — it's just not further
//! structured — which is what makes partial modeling safe rather than lossy.

use crate::arena::NodeId;

/// One name in an `import a, b as c` or `from x import a, b as c` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportAlias {
    /// Dotted module or symbol name, e.g. `"os.path"` or `"BaseModel"`.
    pub name: String,
    pub asname: Option<String>,
}

/// A `key=value` argument in a call, or a positional argument when `keyword`
/// is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallArg {
    pub keyword: Option<NodeId>,
    pub value: NodeId,
    pub is_starred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CstKind {
    Module {
        body: Vec<NodeId>,
    },

    /// `import a.b, c as d`
    Import {
        names: Vec<ImportAlias>,
    },

    /// `from .pkg.mod import a, b as c` / `from pkg import *`
    ImportFrom {
        /// Number of leading dots (relative import level); 0 for absolute.
        level: u32,
        module: Option<String>,
        names: ImportFromNames,
    },

    ClassDef {
        name: String,
        bases: Vec<NodeId>,
        decorators: Vec<NodeId>,
        body: Vec<NodeId>,
    },

    FunctionDef {
        name: String,
        decorators: Vec<NodeId>,
        body: Vec<NodeId>,
    },

    Decorator {
        expr: NodeId,
    },

    Assign {
        targets: Vec<NodeId>,
        value: NodeId,
    },

    /// A statement that is just an expression, e.g. `u.dict()` on its own line.
    ExprStatement {
        value: NodeId,
    },

    Call {
        func: NodeId,
        args: Vec<CallArg>,
    },

    Attribute {
        value: NodeId,
        attr: String,
    },

    Name {
        id: String,
    },

    /// String literal, keeping the original quote/prefix in `raw` so
    /// re-emission doesn't normalize quoting style.
    Str {
        value: String,
        raw: String,
    },

    /// Anything not modeled above: an `if`/`for`/`with`/`try`, a nested
    /// expression we don't match on, a module docstring, etc. Always
    /// round-trips exactly because it is rendered by slicing the original
    /// source at this node's range.
    Raw,
}

impl CstKind {
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            CstKind::Module { body } => body.clone(),
            CstKind::ClassDef { bases, decorators, body, .. } => {
                let mut children = decorators.clone();
                children.extend(bases.iter().copied());
                children.extend(body.iter().copied());
                children
            }
            CstKind::FunctionDef { decorators, body, .. } => {
                let mut children = decorators.clone();
                children.extend(body.iter().copied());
                children
            }
            CstKind::Decorator { expr } | CstKind::ExprStatement { value: expr } => vec![*expr],
            CstKind::Assign { targets, value } => {
                let mut children = targets.clone();
                children.push(*value);
                children
            }
            CstKind::Call { func, args } => {
                let mut children = vec![*func];
                for arg in args {
                    if let Some(keyword) = arg.keyword {
                        children.push(keyword);
                    }
                    children.push(arg.value);
                }
                children
            }
            CstKind::Attribute { value, .. } => vec![*value],
            CstKind::Import { .. }
            | CstKind::ImportFrom { .. }
            | CstKind::Name { .. }
            | CstKind::Str { .. }
            | CstKind::Raw => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportFromNames {
    Aliases(Vec<ImportAlias>),
    Star,
}
