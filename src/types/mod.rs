//! Core data model shared by every build phase

mod asset;
mod ast;
mod code;
mod dependency;

pub use asset::{Asset, AssetDraft, AssetOutput, File, Stats};
pub use ast::{Ast, AstKind};
pub use code::Code;
pub use dependency::{Dependency, DependencyOptions, Meta, Position, SourceLocation};
