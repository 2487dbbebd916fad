//! Leader election over a TTL'd store sentinel.
//!
//! A candidate holds the leadership of `name` while it keeps refreshing
//! `/registry/elections/{name}` before the sentinel's TTL lapses; losing a
//! refresh race or letting the key expire deposes it. The notifier side
//! watches the sentinel and reports every leadership change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regatta_api::Result;

use crate::registry::keys;
use regatta_store::{Backend, RawAction, RawEvent};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);

pub struct Elector {
    backend: Arc<dyn Backend>,
    election: String,
    identity: String,
    ttl: Duration,
}

impl Elector {
    pub fn new(
        backend: Arc<dyn Backend>,
        election: &str,
        identity: &str,
        ttl: Duration,
    ) -> Elector {
        Elector {
            backend,
            election: election.to_string(),
            identity: identity.to_string(),
            ttl,
        }
    }

    fn key(&self) -> String {
        keys::election(&self.election)
    }

    /// Campaign until leadership is won, then hold it by refreshing the
    /// sentinel before its TTL lapses. Returns on cancellation (after a
    /// clean resign) or on a store error; a lost refresh race goes back to
    /// campaigning.
    pub async fn campaign(&self, cancel: CancellationToken) -> Result<()> {
        let refresh = self.ttl / 2;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self
                .backend
                .create(&self.key(), self.identity.clone().into_bytes(), Some(self.ttl))
                .await
            {
                Ok(node) => {
                    info!(msg = "acquired leadership", election = %self.election,
                          identity = %self.identity);
                    let mut index = node.modified_index;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                // Step down cleanly so a successor need not
                                // wait out the TTL.
                                if let Err(error) = self.backend.delete(&self.key(), false).await {
                                    debug!(msg = "failed to resign", %error);
                                }
                                info!(msg = "resigned leadership", election = %self.election);
                                return Ok(());
                            }
                            _ = tokio::time::sleep(refresh) => {}
                        }
                        match self
                            .backend
                            .set(
                                &self.key(),
                                self.identity.clone().into_bytes(),
                                Some(index),
                            )
                            .await
                        {
                            Ok(node) => index = node.modified_index,
                            Err(error) => {
                                warn!(msg = "lost leadership", election = %self.election, %error);
                                break;
                            }
                        }
                    }
                }
                Err(err) if err.is_already_exists() => {
                    tokio::time::sleep(refresh).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A leadership change: the election name and the new leader's identity
/// (`None` while the seat is empty).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderChange {
    pub election: String,
    pub leader: Option<String>,
}

/// Watch every election sentinel and push each leadership change to `tx`.
pub async fn notifier(
    backend: Arc<dyn Backend>,
    tx: mpsc::Sender<LeaderChange>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut from_index = 0;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let mut rx = backend
            .watch(keys::ELECTIONS, from_index, cancel.clone())
            .await?;
        while let Some(event) = rx.recv().await {
            from_index = from_index.max(event.index() + 1);
            if let Some(change) = change_from(&event) {
                info!(msg = "leadership changed", election = %change.election,
                      leader = change.leader.as_deref().unwrap_or("<none>"));
                if tx.send(change).await.is_err() {
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn change_from(event: &RawEvent) -> Option<LeaderChange> {
    let node = event.node.as_ref().or(event.prev_node.as_ref())?;
    let election = node.key.rsplit('/').next()?.to_string();
    let leader = match event.action {
        RawAction::Delete | RawAction::Expire => None,
        _ => Some(String::from_utf8_lossy(&node.value).into_owned()),
    };
    Some(LeaderChange { election, leader })
}
