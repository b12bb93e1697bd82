//! The locally-spent key-image set.
//!
//! Between our broadcast and the light-wallet server noticing the tx,
//! the server still reports the consumed outputs as unspent. Marking
//! their key images here closes that double-spend window: coin selection
//! shadows anything in this set. Entries clear when the server reports
//! the same image on-chain, or after a two hour TTL as a backstop
//! against an abandoned broadcast.

use std::collections::HashMap;

use common::time::TimestampMs;
use tracing::debug;

pub const LOCAL_SPENT_TTL_MS: i64 = 2 * 60 * 60 * 1000;

#[derive(Default)]
pub struct LocallySpentImages {
    /// Lowercase hex key image -> time marked.
    map: HashMap<String, TimestampMs>,
}

impl LocallySpentImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, key_images: impl IntoIterator<Item = String>) {
        let now = TimestampMs::now();
        for image in key_images {
            debug!(%image, "key image marked locally spent");
            self.map.insert(image.to_lowercase(), now);
        }
    }

    pub fn contains(&self, key_image: &str) -> bool {
        let needle = key_image.to_lowercase();
        match self.map.get(&needle) {
            Some(marked) =>
                TimestampMs::now().ms_since(*marked) < LOCAL_SPENT_TTL_MS,
            None => false,
        }
    }

    /// Drop entries the server now reports on-chain (it has caught up)
    /// and anything past the TTL.
    pub fn reconcile<'a>(
        &mut self,
        server_reported: impl IntoIterator<Item = &'a str>,
    ) {
        for image in server_reported {
            self.map.remove(&image.to_lowercase());
        }
        let now = TimestampMs::now();
        self.map
            .retain(|_, marked| now.ms_since(*marked) < LOCAL_SPENT_TTL_MS);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
