pub mod compiler;
pub mod path;
pub mod update;

pub use compiler::{CompiledFilter, FilterCompiler};
pub use update::{compile_update, CompiledUpdate};
