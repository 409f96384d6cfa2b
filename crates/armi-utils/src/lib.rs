//! Low-level helpers shared by the armi crates: checksums, the mirror lock,
//! crash-safe filesystem primitives, path expansion and small formatting
//! utilities.

pub mod bytes;
pub mod error;
pub mod fs;
pub mod hash;
pub mod lock;
pub mod path;
pub mod time;
