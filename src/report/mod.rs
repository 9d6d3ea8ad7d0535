//! Reporting: efficiency, diagnostics and formatted terminal output.

pub mod diagnostics;
pub mod efficiency;
pub mod format;

pub use diagnostics::*;
pub use efficiency::*;
pub use format::*;
