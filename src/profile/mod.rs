//! # Profiles
//!
//! Turning connection state into enforcement policy.
//!
//! ```text
//! Instance + Connections ─▶ PolicyComposer ─▶ ProfileSet ─▶ ProfileSink
//!                              │                 (backend → Result<Profile, ComposeError>)
//!                              ├─ template::substitute (@{...} placeholders)
//!                              └─ BackendSet (apparmor, seccomp, udev, kmod renderers)
//! ```
//!
//! Profiles are always recomputed from scratch; there is no incremental
//! patching of a previous profile.

pub mod backend;
pub mod composer;
pub mod regenerate;
pub mod template;

pub use backend::{AnnotatedRenderer, BackendRenderer, BackendSet, LineListRenderer, Snippet};
pub use composer::{ComposeError, PolicyComposer, Profile, ProfileSet};
pub use regenerate::{MemoryProfileStore, ProfileRegenerator, ProfileSink, ProfileUpdate};
pub use template::{substitute, TemplateContext, TemplateError};
