//! User profile and avatar.

pub mod store;
pub mod types;

pub use store::ProfileStore;
pub use types::{Profile, ProfileDraft, ProfilePatch, ProfileState};
