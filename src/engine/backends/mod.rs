pub mod process;
mod protocol;
pub mod stub;

pub use process::{ProcessRuntime, ProcessSession};
pub use stub::{StubRuntime, StubSession};
