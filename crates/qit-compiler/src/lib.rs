//! The QIT code generator: declares every reachable type/function/iterator
//! class for an expression graph, emits a C++ translation unit, and
//! coordinates compiling and running it (§4, §6, §7 of the specification).

pub mod builder;
pub mod driver;
pub mod error;
pub mod writer;

pub use builder::compile;
pub use driver::{Qit, QitConfig, VerboseLevel};
pub use error::{QitError, QitResult};
pub use writer::CppWriter;

/// The crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
