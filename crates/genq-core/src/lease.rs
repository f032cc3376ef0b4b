//! Soft leader election over a timestamped lease in the state DB.
//!
//! The lease is `{tab_id, ts}` under one key. An instance is leader while it
//! keeps re-writing the lease every heartbeat; any instance may claim a lease
//! that is absent or older than the TTL. This is not strict mutual exclusion:
//! two instances can both believe they lead for up to one heartbeat after a
//! takeover. Per-job task registration in the scheduler is the real interlock.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::job::TabId;
use crate::state_db::{unix_millis, StateDb};

/// State key for the leadership lease.
pub const LEASE_KEY: &str = "jobs-master-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub tab_id: TabId,
    pub ts: i64,
}

impl Lease {
    pub fn is_stale(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.ts) > ttl.as_millis() as i64
    }
}

/// What an instance should do after looking at the current lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// Write a fresh lease naming us (absent, stale, or already ours).
    Claim,
    /// Someone else holds a fresh lease.
    Follow,
}

/// Pure election rule shared by start-up and heartbeat.
pub fn decide(lease: Option<&Lease>, me: &TabId, now: i64, ttl: Duration) -> LeaseDecision {
    match lease {
        None => LeaseDecision::Claim,
        Some(l) if &l.tab_id == me => LeaseDecision::Claim,
        Some(l) if l.is_stale(now, ttl) => LeaseDecision::Claim,
        Some(_) => LeaseDecision::Follow,
    }
}

#[derive(Clone)]
pub struct LeaderElection {
    db: StateDb,
    tab_id: TabId,
    ttl: Duration,
}

impl LeaderElection {
    pub fn new(db: StateDb, tab_id: TabId, ttl: Duration) -> Self {
        Self { db, tab_id, ttl }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Current lease record, if any. Unparseable records count as absent.
    pub async fn current(&self) -> Result<Option<Lease>> {
        let raw = self.db.get(LEASE_KEY).await.context("read lease")?;
        Ok(raw.and_then(|s| match serde_json::from_str::<Lease>(&s) {
            Ok(lease) => Some(lease),
            Err(e) => {
                tracing::warn!("ignoring unreadable lease record: {}", e);
                None
            }
        }))
    }

    async fn write_claim(&self, now: i64) -> Result<()> {
        let lease = Lease {
            tab_id: self.tab_id.clone(),
            ts: now,
        };
        let raw = serde_json::to_string(&lease).context("serialize lease")?;
        self.db.put(LEASE_KEY, &raw).await.context("write lease")
    }

    /// Start-up election: claim an absent or stale lease, otherwise report
    /// whether the existing lease already names this instance.
    pub async fn acquire_or_observe(&self) -> Result<bool> {
        self.heartbeat(false).await
    }

    /// One heartbeat. A believed leader refreshes the lease unless it finds a
    /// fresh lease written by another instance, in which case it steps down.
    /// A follower claims the lease only when it is absent or stale.
    /// Returns whether this instance leads after the heartbeat.
    pub async fn heartbeat(&self, believed_leader: bool) -> Result<bool> {
        let now = unix_millis();
        let lease = self.current().await?;
        match decide(lease.as_ref(), &self.tab_id, now, self.ttl) {
            LeaseDecision::Claim => {
                if !believed_leader {
                    tracing::info!(tab_id = %self.tab_id, "claiming leadership");
                }
                self.write_claim(now).await?;
                Ok(true)
            }
            LeaseDecision::Follow => {
                if believed_leader {
                    tracing::warn!(
                        tab_id = %self.tab_id,
                        holder = %lease.as_ref().map(|l| l.tab_id.as_str()).unwrap_or("?"),
                        "another instance holds a fresh lease; stepping down"
                    );
                }
                Ok(false)
            }
        }
    }

    /// Drop the lease if this instance still holds it, so another instance can
    /// take over at its next heartbeat instead of waiting out the TTL.
    pub async fn release(&self) -> Result<bool> {
        let Some(raw) = self.db.get(LEASE_KEY).await.context("read lease")? else {
            return Ok(false);
        };
        match serde_json::from_str::<Lease>(&raw) {
            Ok(lease) if lease.tab_id == self.tab_id => {
                self.db.remove_if(LEASE_KEY, &raw).await.context("release lease")
            }
            _ => Ok(false),
        }
    }
}
