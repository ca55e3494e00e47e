//! Registry of issuer-signed, unrevoked Merkle roots
//!
//! The trusted set lives in an immutable snapshot. Every administrative change
//! builds a new snapshot and swaps it in under the write lock, so concurrent
//! verifications see either the old set or the new one, never a mix.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, VerifierError};
use crate::root_signer::IssuerVerifier;
use crate::types::{RootManifest, SignedRoot};

/// A root the registry currently trusts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedRoot {
    pub root: String,
    pub circuit_version: u32,
}

/// Backing store consulted by the verification engine.
///
/// `Ok(None)` means the root is not trusted. `Err` is reserved for faults of
/// the store itself (unreachable or stale trust source) and is fatal.
#[async_trait]
pub trait RootStore: Send + Sync {
    async fn lookup(&self, root: &str) -> Result<Option<TrustedRoot>>;

    async fn is_valid_root(&self, root: &str) -> Result<bool> {
        Ok(self.lookup(root).await?.is_some())
    }
}

#[derive(Debug, Clone)]
struct RootSnapshot {
    roots: HashMap<String, u32>,
    revoked: HashSet<String>,
    /// Last time the trust source vouched for the set; local edits leave it alone
    refreshed_at: DateTime<Utc>,
}

impl RootSnapshot {
    fn empty() -> Self {
        Self {
            roots: HashMap::new(),
            revoked: HashSet::new(),
            refreshed_at: Utc::now(),
        }
    }
}

/// In-memory root registry
pub struct RootRegistry {
    snapshot: RwLock<Arc<RootSnapshot>>,
    issuer: Option<IssuerVerifier>,
    max_staleness: Option<Duration>,
}

impl Default for RootRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RootRegistry {
    /// An empty registry that accepts unsigned administrative additions
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RootSnapshot::empty())),
            issuer: None,
            max_staleness: None,
        }
    }

    /// An empty registry that only admits roots signed by `issuer`
    pub fn with_issuer(issuer: IssuerVerifier) -> Self {
        Self {
            issuer: Some(issuer),
            ..Self::new()
        }
    }

    /// Treat the trusted set as unusable once it has not been republished for `max`
    pub fn with_max_staleness(mut self, max: Duration) -> Self {
        self.max_staleness = Some(max);
        self
    }

    fn current(&self) -> Arc<RootSnapshot> {
        self.snapshot.read().clone()
    }

    /// Build a new snapshot from the current one and publish it atomically
    fn publish<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut RootSnapshot) -> Result<()>,
    {
        let mut guard = self.snapshot.write();
        let mut next = (**guard).clone();
        update(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Pure set membership against the current snapshot
    pub fn is_valid_root(&self, root: &str) -> bool {
        self.current().roots.contains_key(root)
    }

    pub fn len(&self) -> usize {
        self.current().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time since the trust source last refreshed the set
    pub fn snapshot_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.current().refreshed_at
    }

    /// Trust a root without a signature check (static deployments and tests)
    pub fn add_root(&self, root: &str, circuit_version: u32) -> Result<()> {
        self.publish(|snapshot| {
            if snapshot.revoked.contains(root) {
                return Err(VerifierError::RevokedRoot(root.to_string()));
            }
            snapshot.roots.insert(root.to_string(), circuit_version);
            Ok(())
        })?;
        info!("Trusted root added: {} (circuit v{})", root, circuit_version);
        Ok(())
    }

    /// Trust a root after checking the issuer's signature over it
    pub fn add_signed_root(&self, signed: &SignedRoot) -> Result<()> {
        let issuer = self.issuer.as_ref().ok_or_else(|| {
            VerifierError::Config("Registry has no issuer configured for signed roots".to_string())
        })?;
        issuer.verify(&signed.root, signed.circuit_version, &signed.signature)?;
        self.add_root(&signed.root, signed.circuit_version)
    }

    /// Remove a root and refuse it from now on
    pub fn revoke_root(&self, root: &str) -> Result<()> {
        self.publish(|snapshot| {
            snapshot.roots.remove(root);
            snapshot.revoked.insert(root.to_string());
            Ok(())
        })?;
        warn!("Root revoked: {}", root);
        Ok(())
    }

    /// Replace the trusted set with the contents of an issuer manifest.
    ///
    /// Revocations accumulate across manifests. Entries whose signature does
    /// not verify are skipped. Returns the number of trusted roots published.
    pub fn apply_manifest(&self, manifest: &RootManifest) -> Result<usize> {
        let issuer = self.issuer.as_ref().ok_or_else(|| {
            VerifierError::Config("Registry has no issuer configured for manifests".to_string())
        })?;

        let manifest_issuer = IssuerVerifier::from_hex(&manifest.issuer)
            .map_err(|e| VerifierError::TrustSource(format!("Manifest issuer unreadable: {}", e)))?;
        if manifest_issuer.issuer() != issuer.issuer() {
            return Err(VerifierError::TrustSource(format!(
                "Manifest issued by {}, expected {}",
                manifest_issuer.issuer(),
                issuer.issuer()
            )));
        }

        let mut verified = HashMap::new();
        for entry in &manifest.roots {
            match issuer.verify(&entry.root, entry.circuit_version, &entry.signature) {
                Ok(()) => {
                    verified.insert(entry.root.clone(), entry.circuit_version);
                }
                Err(e) => warn!("Skipping manifest root {}: {}", entry.root, e),
            }
        }

        let mut published = 0;
        self.publish(|snapshot| {
            snapshot.revoked.extend(manifest.revoked.iter().cloned());
            verified.retain(|root, _| !snapshot.revoked.contains(root));
            published = verified.len();
            snapshot.roots = verified;
            snapshot.refreshed_at = Utc::now();
            Ok(())
        })?;

        info!(
            "Published root manifest: {} trusted, {} revoked",
            published,
            manifest.revoked.len()
        );
        Ok(published)
    }

    fn lookup_at(&self, root: &str, now: DateTime<Utc>) -> Result<Option<TrustedRoot>> {
        let snapshot = self.current();

        if let Some(max) = self.max_staleness {
            let age = now - snapshot.refreshed_at;
            if age > max {
                return Err(VerifierError::TrustSource(format!(
                    "Trusted root set is stale ({}s old)",
                    age.num_seconds()
                )));
            }
        }

        let found = snapshot.roots.get(root).map(|&circuit_version| TrustedRoot {
            root: root.to_string(),
            circuit_version,
        });
        if found.is_none() {
            debug!("Root not in trusted set: {}", root);
        }
        Ok(found)
    }
}

#[async_trait]
impl RootStore for RootRegistry {
    async fn lookup(&self, root: &str) -> Result<Option<TrustedRoot>> {
        self.lookup_at(root, Utc::now())
    }
}
