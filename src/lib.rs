//! Armature: an AppArmor runtime manager core.
//!
//! Every privileged operation goes through [`caller::CommandCaller`], which
//! runs the `aa-caller` helper (normally under `pkexec`) and hands back its
//! output unchanged. Audit logs are decoded into [`logs::LogRecord`]s and
//! fed to a display through the batched [`logs::IngestPipeline`]. Profiles
//! are discovered on disk by [`profile::enumerate_profiles`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod caller;
pub mod config;
pub mod executor;
pub mod logging;
pub mod logs;
pub mod profile;
pub mod status;
