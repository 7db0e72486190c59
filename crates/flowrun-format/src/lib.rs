//! Loader for the line-oriented flow description format.
//!
//! A flow file is a sequence of `key=value` lines. Opening keys start a new
//! block (`node`, `pipe`, `concatenate`, `stderr`, `file`); attribute keys
//! (`command`, `from`, `to`, `parts`, `part_<i>`, `name`) fill in the block
//! opened most recently. Produces a typed AST: [`FlowFile`], [`BlockDef`],
//! [`BlockBody`].
//!
//! # Example
//! ```
//! let src = "node=hello\ncommand=echo hi\n";
//! let flow = flowrun_format::parse(src).unwrap();
//! assert_eq!(flow.blocks.len(), 1);
//! assert_eq!(flow.blocks[0].name, "hello");
//! ```

pub mod ast;
mod parser;

pub use ast::*;
pub use parser::parse;
