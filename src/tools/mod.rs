//! Transformation tools: the closed set of kinds and the contract they run through.

pub mod archive;
pub mod command;
pub mod kind;
pub mod transformer;

pub use command::CommandTransformer;
pub use kind::{Arity, ToolKind};
pub use transformer::{TransformOutput, TransformRequest, Transformer};
