//! Human-readable room id allocation.
//!
//! Ids look like `cool-panda-42`: an adjective, a noun, and a two-digit
//! number drawn uniformly — 16 × 16 × 90 = 23,040 possible candidates.
//! Allocation creates the room's empty durable record atomically, so a
//! returned id is always immediately readable from the store.

use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use crate::storage::{SnapshotStore, StoreError};

/// Adjective half of the id space.
const ADJECTIVES: [&str; 16] = [
    "cool", "super", "silent", "cosmic", "neon", "cyber", "retro", "brave",
    "swift", "wild", "atomic", "pixel", "dark", "shiny", "happy", "crimson",
];

/// Noun half of the id space.
const NOUNS: [&str; 16] = [
    "panda", "ninja", "tiger", "rocket", "wizard", "phoenix", "dragon", "wolf",
    "eagle", "coder", "glitch", "vortex", "star", "falcon", "cobra", "proton",
];

/// Random candidates tried before falling back to a UUID slice.
const MAX_ATTEMPTS: usize = 5;

/// Allocates collision-free room ids backed by the snapshot store.
pub struct RoomIdAllocator {
    store: Arc<SnapshotStore>,
}

impl RoomIdAllocator {
    /// Create an allocator over the given store.
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Allocate a fresh room id and durably create its empty record.
    ///
    /// Collisions never fail the call: after [`MAX_ATTEMPTS`] taken
    /// candidates the allocator falls back to the first 8 characters of a
    /// v4 UUID and creates that record unconditionally. Store errors do
    /// surface, unretried.
    pub fn allocate(&self) -> Result<String, StoreError> {
        for _ in 0..MAX_ATTEMPTS {
            let candidate = random_candidate();
            if self.store.create_room(&candidate)? {
                return Ok(candidate);
            }
            log::debug!("room id {candidate} already taken, retrying");
        }

        let fallback = Uuid::new_v4().to_string()[..8].to_string();
        log::info!("room id space congested, falling back to {fallback}");
        self.store.create_room(&fallback)?;
        Ok(fallback)
    }
}

/// Compose a `{adjective}-{noun}-{NN}` candidate with NN in 10..=99.
fn random_candidate() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let number: u8 = rng.random_range(10..100);
    format!("{adjective}-{noun}-{number}")
}

/// All 23,040 human-readable candidates, for exhaustion scenarios in tests.
#[doc(hidden)]
pub fn candidate_space() -> impl Iterator<Item = String> {
    ADJECTIVES.iter().flat_map(|adjective| {
        NOUNS.iter().flat_map(move |noun| {
            (10u8..100).map(move |number| format!("{adjective}-{noun}-{number}"))
        })
    })
}
