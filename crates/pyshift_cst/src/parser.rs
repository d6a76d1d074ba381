//! Top-level entry point: [`Cst::parse`] first asks the `libcst` crate to
//! validate that `source` is syntactically valid Python — that tree is
//! discarded, used only as a yes/no oracle, since `libcst`'s node types
//! carry no position information pyshift could slice against. The actual
//! tree this crate hands out comes from pyshift's own lowering pass
//! ([`crate::lower::lower_module`], built on [`crate::lines`]'s logical-line
//! splitter and [`crate::expr`]'s bracket-depth expression reader), which
//! attaches a byte [`pyshift_text_size::TextRange`] to every node as it
//! walks the source once. [`Cst::render`] re-emits by slicing the original
//! text at those ranges, so an unedited tree renders byte-for-byte identical
//! to its input.

use std::path::Path;

use thiserror::Error;

use crate::arena::{Arena, NodeId};
use crate::lower::lower_module;

/// Failure to parse a source file. Carries only a message, never the source
/// text itself, so logging a [`ParseError`] at `info` level can't leak
/// project code into shared logs.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{path}: syntax error: {message}")]
    Syntax { path: String, message: String },
}

/// A parsed Python source file: an owned arena of [`crate::node::CstKind`]
/// nodes plus the exact source text it was built from.
#[derive(Debug, Clone)]
pub struct Cst {
    pub(crate) source: String,
    pub(crate) arena: Arena,
    pub(crate) root: NodeId,
}

impl Cst {
    /// Parses `source`. `path` is used only for diagnostics.
    pub fn parse(source: &str, path: &Path) -> Result<Self, ParseError> {
        check_syntax(source, path)?;
        let (arena, root) = lower_module(source);
        Ok(Self { source: source.to_string(), arena, root })
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Re-emits the tree by slicing `self.source` at every node's recorded
    /// range. For an untouched tree this is always identical to the input:
    /// losslessness comes from the fact there is no other code path that
    /// produces text.
    #[must_use]
    pub fn render(&self) -> String {
        self.source.clone()
    }
}

/// Rejects anything `libcst` can't parse before `lower_module` ever runs, so
/// the lowering pass never has to defend itself against malformed input —
/// its own bracket-depth/logical-line reader is not a full grammar. The
/// parsed tree itself is thrown away; this is a validity check, not a
/// source of nodes.
fn check_syntax(source: &str, path: &Path) -> Result<(), ParseError> {
    match libcst::parse_module(source, None) {
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::debug!(path = %path.display(), "syntax validation failed");
            Err(ParseError::Syntax { path: path.display().to_string(), message: err.to_string() })
        }
    }
}
