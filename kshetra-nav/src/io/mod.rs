//! Persistence of operator zones and mission progress.
//!
//! Both files are JSON and written through [`write_atomic`], so a power
//! cut leaves either the previous or the new version on disk.
//!
//! [`write_atomic`]: crate::core::persist::write_atomic

mod resume;
mod zone_store;

pub use resume::ResumeStore;
pub use zone_store::ZoneStore;
