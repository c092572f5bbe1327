//! Records the resolver stores in its caches.

pub mod identifier;
pub mod status;
pub mod user_profile;
pub mod uuid_entry;

pub use identifier::{Identifier, is_dashed_uuid, normalize_uuid};
pub use status::Status;
pub use user_profile::{TEXTURES_BASE_URL, UserProfile};
pub use uuid_entry::UuidEntry;
