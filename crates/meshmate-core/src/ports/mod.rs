//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core expects from the host and from
//! adapters. They contain no implementation details and use only domain types.

pub mod completion;
pub mod event_emitter;
pub mod preferences;

pub use completion::{CompletionProvider, CompletionReply, CompletionRequest};
pub use event_emitter::{CoreEventEmitter, NoopEmitter, RecordingEmitter};
pub use preferences::{
    MemoryPreferenceStore, PreferenceStore, SERVERS_KEY, SETTINGS_KEY, load_json, save_json,
};
