//! Block registry, content-addressed caching, input validation, and the
//! `bash`/`docker`/`native` runtime executors described by `lacquer_core`'s
//! `block` module.

pub mod cache;
pub mod executors;
pub mod registry;
pub mod validate;

pub use executors::{container::ContainerExecutor, native::NativeExecutor, shell::ShellExecutor, BlockExecutor, WorkflowRunner};
pub use registry::BlockRegistry;
