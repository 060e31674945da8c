//! Deployment resolution: which platform record is a channel's stable address.
//!
//! Resolution walks an ordered list of tiers. Each tier either resolves the
//! channel, declines (so the next tier runs), or fails the run. The listing
//! snapshot is taken once per project and shared by all its channels so every
//! channel sees the same view of the platform.

use crate::config::{Channel, PlatformSettings};
use crate::error::KeeperError;
use crate::platform::{candidates, DeploymentEntry, Platform, PlatformError};
use crate::store::BindingStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The stored binding was updated in place.
    Bound,
    /// An untracked record with a matching description was adopted.
    Discovered,
    /// A new record was created. The channel's address changed.
    Created,
}

impl Tier {
    /// Attempt order.
    pub const ORDER: [Tier; 3] = [Tier::Bound, Tier::Discovered, Tier::Created];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Bound => "bound",
            Tier::Discovered => "discovered",
            Tier::Created => "created",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Resolution / ResolveError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub tag: String,
    pub id: String,
    pub address: String,
    pub tier: Tier,
}

impl Resolution {
    pub fn created(&self) -> bool {
        self.tier == Tier::Created
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The platform's deployment cap is reached. Fatal for the whole run.
    #[error("quota exceeded while resolving '{tag}': {source}")]
    Quota {
        tag: String,
        #[source]
        source: PlatformError,
    },

    #[error("could not create a deployment for '{tag}': {source}")]
    Creation {
        tag: String,
        #[source]
        source: PlatformError,
    },

    #[error("'{tag}' has no usable deployment and creation is disabled")]
    CreationDisabled { tag: String },

    #[error("failed to persist binding for '{tag}': {source}")]
    Store {
        tag: String,
        #[source]
        source: KeeperError,
    },
}

impl ResolveError {
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, ResolveError::Quota { .. })
    }
}

/// What a single tier produced.
enum Attempt {
    Resolved(String),
    /// Tier does not apply or its call failed recoverably.
    Declined,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves the channels of one platform project.
pub struct Resolver<'a> {
    platform: &'a dyn Platform,
    settings: &'a PlatformSettings,
    listing: Vec<DeploymentEntry>,
    /// Store location, for persisting adopted and created bindings.
    root: &'a Path,
    allow_create: bool,
    /// Ids resolved this run, and the channel that took each.
    claimed: BTreeMap<String, String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        settings: &'a PlatformSettings,
        listing: Vec<DeploymentEntry>,
        root: &'a Path,
    ) -> Self {
        Self {
            platform,
            settings,
            listing,
            root,
            allow_create: true,
            claimed: BTreeMap::new(),
        }
    }

    /// Disable the creation tier for every channel (`--no-create`).
    pub fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }

    pub fn resolve(
        &mut self,
        channel: &Channel,
        description: &str,
        store: &mut BindingStore,
    ) -> Result<Resolution, ResolveError> {
        let mut tried = BTreeSet::new();
        for tier in Tier::ORDER {
            let attempt = match tier {
                Tier::Bound => self.try_bound(channel, description, store, &mut tried)?,
                Tier::Discovered => self.try_discover(channel, description, store, &tried)?,
                Tier::Created => self.try_create(channel, description)?,
            };
            if let Attempt::Resolved(id) = attempt {
                if tier != Tier::Bound {
                    self.persist(&channel.tag, &id, store)?;
                }
                self.claimed.insert(id.clone(), channel.tag.clone());
                let address = self.settings.address_of(&id, channel.query.as_deref());
                if tier == Tier::Created {
                    tracing::warn!(
                        channel = %channel.tag,
                        %address,
                        "NEW DEPLOYMENT CREATED: the address for this channel has changed; share the new address"
                    );
                } else {
                    tracing::info!(channel = %channel.tag, id = %id, %tier, "channel resolved");
                }
                return Ok(Resolution {
                    tag: channel.tag.clone(),
                    id,
                    address,
                    tier,
                });
            }
        }
        Err(ResolveError::CreationDisabled {
            tag: channel.tag.clone(),
        })
    }

    /// Ids other channels hold, either from this run or from the store.
    fn claimed_by_other(&self, id: &str, tag: &str, store: &BindingStore) -> bool {
        let this_run = self.claimed.get(id).is_some_and(|t| t != tag);
        let stored = store.bindings.iter().any(|(t, bound)| bound == id && t != tag);
        this_run || stored
    }

    fn try_bound(
        &self,
        channel: &Channel,
        description: &str,
        store: &BindingStore,
        tried: &mut BTreeSet<String>,
    ) -> Result<Attempt, ResolveError> {
        let Some(id) = store.binding(&channel.tag) else {
            return Ok(Attempt::Declined);
        };
        if self.claimed.get(id).is_some_and(|t| t != &channel.tag) {
            tracing::warn!(channel = %channel.tag, %id, "bound id already taken by another channel this run");
            return Ok(Attempt::Declined);
        }
        tried.insert(id.to_string());
        self.update(channel, id, description)
    }

    fn try_discover(
        &self,
        channel: &Channel,
        description: &str,
        store: &BindingStore,
        tried: &BTreeSet<String>,
    ) -> Result<Attempt, ResolveError> {
        let found = candidates(&self.listing).find(|entry| {
            channel.matches_description(&entry.description)
                && !tried.contains(&entry.id)
                && !self.claimed_by_other(&entry.id, &channel.tag, store)
        });
        let Some(entry) = found else {
            tracing::debug!(channel = %channel.tag, "no unclaimed listing record matches");
            return Ok(Attempt::Declined);
        };
        tracing::info!(
            channel = %channel.tag,
            id = %entry.id,
            description = %entry.description,
            "adopting untracked deployment"
        );
        self.update(channel, &entry.id, description)
    }

    fn try_create(&self, channel: &Channel, description: &str) -> Result<Attempt, ResolveError> {
        if !self.allow_create || !channel.allow_create {
            tracing::warn!(channel = %channel.tag, "creation disabled; channel left unresolved");
            return Ok(Attempt::Declined);
        }
        match self.platform.create(description) {
            Ok(id) => Ok(Attempt::Resolved(id)),
            Err(source) if source.is_quota() => Err(ResolveError::Quota {
                tag: channel.tag.clone(),
                source,
            }),
            Err(source) => Err(ResolveError::Creation {
                tag: channel.tag.clone(),
                source,
            }),
        }
    }

    fn update(&self, channel: &Channel, id: &str, description: &str) -> Result<Attempt, ResolveError> {
        match self.platform.update(id, description) {
            Ok(()) => Ok(Attempt::Resolved(id.to_string())),
            Err(source) if source.is_quota() => Err(ResolveError::Quota {
                tag: channel.tag.clone(),
                source,
            }),
            Err(e) => {
                tracing::warn!(channel = %channel.tag, %id, error = %e, "update failed; trying next tier");
                Ok(Attempt::Declined)
            }
        }
    }

    fn persist(&self, tag: &str, id: &str, store: &mut BindingStore) -> Result<(), ResolveError> {
        if let Some(previous) = store.bind(tag, id) {
            tracing::info!(channel = %tag, %previous, %id, "binding replaced");
        }
        store.save(self.root).map_err(|source| ResolveError::Store {
            tag: tag.to_string(),
            source,
        })
    }
}
