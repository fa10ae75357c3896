pub mod config;
pub mod io;
pub mod loader;
pub mod runtime_error;
pub mod value;
pub mod vm;

pub use config::{ConfigError, VmConfig};
pub use io::{BufferIo, HostIo, StdIo};
pub use runtime_error::{Fault, RuntimeError, RuntimeErrorKind};
pub use value::Value;
pub use vm::{ExitStatus, Vm, VmState};
