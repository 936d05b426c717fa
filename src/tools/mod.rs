//! Tool surface exposed to running scripts
//!
//! - registry: the external tool contract and lookup table
//! - facade: the policy-enforced callable surface handed to the interpreter

pub mod facade;
pub mod registry;

pub use facade::ToolsFacade;
pub use registry::{ArgValidation, Tool, ToolRegistry};
