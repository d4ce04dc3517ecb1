//! Script sandbox for meshmate.
//!
//! Scripts are screened by the core security validator, then run in an
//! embedded Rhai engine with no filesystem, network or process access. The
//! only modules a script can import are the ones the host surface offers and
//! the policy allows.

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod engine;
pub mod extract;
pub mod host;
pub mod resolver;
pub mod sandbox;

pub use extract::{CodeBlock, SCRIPT_LANGUAGES, extract_code_blocks};
pub use host::{EmptyHost, HostSurface, MemoryScene, SCENE_MODULE, SceneObject};
pub use resolver::HostModuleResolver;
pub use sandbox::{CodeSandbox, SandboxLimits};

// Re-exported so hosts can build modules without depending on rhai directly.
pub use rhai;
