//! Platform-agnostic sync core.
//!
//! Leaf modules first: `profile` and `validate` describe and check data,
//! `sanitize` and `merge` turn untrusted JSON into document changes,
//! `wire` maps documents to and from each game's server layout,
//! `queue`, `legacy`, `identity` and `leaderboard` each own one concern,
//! and `session` wires them to the collaborators in `ports`.

pub mod document;
pub mod identity;
pub mod leaderboard;
pub mod legacy;
pub mod merge;
pub mod ports;
pub mod profile;
pub mod queue;
pub mod sanitize;
pub mod session;
pub mod validate;
pub mod wire;

#[cfg(test)]
pub mod testing;

pub use document::{StateDocument, StatePatch};
pub use profile::{GameProfile, SyncConfig, find_profile};
pub use session::{Collaborators, ScheduleOptions, ScheduleOutcome, SyncSession};
