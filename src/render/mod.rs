//! Proxy configuration rendering.

pub mod codes;
mod compiler;
pub mod dialect;
mod health;

pub use codes::{CodePolicy, ExpectedCodesError, StatusBucket};
pub use compiler::{CompileError, CompilerOptions, ConfigCompiler};
pub use dialect::{BlockKind, Dialect, DialectTables};
pub use health::health_lines;
