//! Native runtime header and host-side binary stream reader for QIT.
//!
//! `RUNTIME_HEADER` is the C++ text every generated translation unit
//! `#include`s (§6 "Build boundary"); [`reader::read_value`] is its
//! host-side mirror, reconstructing values from the stream the generated
//! program writes.

pub mod error;
pub mod reader;

pub use error::{ReadError, ReadResult};
pub use reader::{read_value, Value};

/// The crate version, also used as a sanity check that the embedded
/// header was bundled correctly.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The full text of `qit.h`, the runtime header supplying
/// `qit::RangeIterator`, `qit::MapIterator`, `qit::write`, and friends
/// (§6). qit-compiler writes this verbatim alongside the generated
/// source.
pub const RUNTIME_HEADER: &str = include_str!("assets/qit.h");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn runtime_header_declares_the_documented_primitives() {
        for symbol in [
            "RangeIterator",
            "RangeGenerator",
            "TakeIterator",
            "SortIterator",
            "MapIterator",
            "FilterIterator",
            "SequenceIterator",
            "SequenceGenerator",
            "GeneratorIterator",
            "write(FILE",
        ] {
            assert!(
                RUNTIME_HEADER.contains(symbol),
                "runtime header is missing {symbol}"
            );
        }
    }
}
