use std::any::Any;
use std::fmt;
use std::sync::Arc;

use semver::{Version, VersionReq};

/// The family of a parsed representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstKind {
    Script,
    Stylesheet,
    Json,
}

/// A parsed representation of an asset, opaque to the core.
///
/// The program is only reachable through [`Ast::program`], a checked
/// downcast, and transformers decide reuse with [`Ast::is_compatible`].
/// A representation built by one transformer is never handed to another as
/// the wrong concrete type.
#[derive(Clone)]
pub struct Ast {
    kind: AstKind,
    version: Version,
    program: Arc<dyn Any + Send + Sync>,
}

impl Ast {
    pub fn new<T>(kind: AstKind, version: Version, program: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            kind,
            version,
            program: Arc::new(program),
        }
    }

    pub fn kind(&self) -> AstKind {
        self.kind
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether this representation matches `kind` and satisfies `range`
    pub fn is_compatible(&self, kind: AstKind, range: &VersionReq) -> bool {
        self.kind == kind && range.matches(&self.version)
    }

    /// Borrow the program as `T`, or `None` if it was built as something else
    pub fn program<T: Any>(&self) -> Option<&T> {
        self.program.downcast_ref::<T>()
    }
}

impl fmt::Debug for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ast")
            .field("kind", &self.kind)
            .field("version", &self.version.to_string())
            .finish_non_exhaustive()
    }
}
