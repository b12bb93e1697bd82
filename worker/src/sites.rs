//! Connected-site bookkeeping.
//!
//! One row per origin the user has approved for public-key reads and
//! message signing. Key exposure is limited to public material; actual
//! signatures still go through the approvals popup per request.

use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use smirk_wallet::store::{self, keys, KvStore};
use smirk_wallet::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedSite {
    pub origin: String,
    pub name: String,
    pub favicon: Option<String>,
    pub connected_at: TimestampMs,
    pub last_used: TimestampMs,
}

pub struct Sites<'a> {
    store: &'a dyn KvStore,
}

impl<'a> Sites<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<Vec<ConnectedSite>, Error> {
        store::get_json(self.store, keys::CONNECTED_SITES)
            .await
            .map_err(Error::remote)
            .map(Option::unwrap_or_default)
    }

    async fn save(&self, sites: &[ConnectedSite]) -> Result<(), Error> {
        store::put_json(self.store, keys::CONNECTED_SITES, &sites.to_vec())
            .await
            .map_err(Error::remote)
    }

    pub async fn list(&self) -> Result<Vec<ConnectedSite>, Error> {
        self.load().await
    }

    pub async fn is_connected(&self, origin: &str) -> Result<bool, Error> {
        Ok(self.load().await?.iter().any(|s| s.origin == origin))
    }

    /// Record an approval. Re-approving an origin refreshes its row.
    pub async fn approve(
        &self,
        origin: &str,
        name: &str,
        favicon: Option<String>,
    ) -> Result<(), Error> {
        let mut sites = self.load().await?;
        let now = TimestampMs::now();
        sites.retain(|s| s.origin != origin);
        sites.push(ConnectedSite {
            origin: origin.to_owned(),
            name: name.to_owned(),
            favicon,
            connected_at: now,
            last_used: now,
        });
        self.save(&sites).await
    }

    pub async fn remove(&self, origin: &str) -> Result<(), Error> {
        let mut sites = self.load().await?;
        sites.retain(|s| s.origin != origin);
        self.save(&sites).await
    }

    /// Bump `last_used`; errors if the origin was never approved.
    pub async fn touch(&self, origin: &str) -> Result<(), Error> {
        let mut sites = self.load().await?;
        let site = sites
            .iter_mut()
            .find(|s| s.origin == origin)
            .ok_or(Error::NotAuthenticated)?;
        site.last_used = TimestampMs::now();
        self.save(&sites).await
    }
}
