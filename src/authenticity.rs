//! Tag authority for failure records.
//!
//! Every [`Failure`](crate::Failure) carries a [`Tag`] stamped by the factory.
//! The tag holds a secret drawn once per process from a randomly seeded
//! hasher. The field holding it is private to this crate and no public API
//! accepts a tag, so code outside the crate cannot assemble an authentic
//! record by hand. Decoded records (see
//! [`Failure::from_json`](crate::Failure::from_json)) are validated and then
//! issued a fresh tag.

use core::fmt;
use std::{
    hash::{BuildHasher, RandomState},
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

fn secret() -> u64 {
    static SECRET: OnceLock<u64> = OnceLock::new();
    *SECRET.get_or_init(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let seed = RandomState::new().hash_one((nanos, std::process::id()));
        // Zero is reserved for the cleared tag of pooled shells.
        seed.max(1)
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(u64);

impl Tag {
    /// A tag that never verifies. Used for pooled shells that have not been
    /// handed out as records yet.
    pub(crate) const CLEARED: Self = Self(0);

    #[inline]
    pub(crate) fn issue() -> Self {
        Self(secret())
    }

    #[inline]
    pub(crate) fn verify(self) -> bool {
        self.0 != 0 && self.0 == secret()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.verify() {
            f.write_str("Tag(issued)")
        } else {
            f.write_str("Tag(invalid)")
        }
    }
}
