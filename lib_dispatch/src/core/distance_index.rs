//! # Distance Index
//!
//! Precomputed, nearest-first candidate lists for every known call target.
//!
//! The index is built once per run from two snapshots: the location catalog
//! (every possible target) and the availability of one representative
//! service kind (every possible source). Distances are plain Euclidean
//! distances over raw latitude/longitude degrees, not great-circle
//! distances. The same candidate order is reused for requests of every kind.
//!
//! After construction the index is immutable and is shared between tasks
//! behind an `Arc` without any locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::gateway::{GatewayError, ResourceGateway};
use crate::models::{location_key, Availability, City, ServiceKind};

/// Errors raised while building or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The key was not part of the catalog the index was built from.
    #[error("no candidate list for target '{key}'")]
    NotFound {
        /// The missing `"{city}::{county}"` key.
        key: String,
    },

    /// The location catalog was empty.
    #[error("cannot build distance index: location catalog is empty")]
    EmptyTargets,

    /// The source availability snapshot was empty.
    #[error("cannot build distance index: no source locations available")]
    EmptySources,

    /// One of the upstream snapshots could not be fetched.
    #[error("cannot build distance index: {0}")]
    Gateway(#[from] GatewayError),
}

/// A source location annotated with its distance from one target.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSource {
    /// City of the source.
    pub city: String,
    /// County of the source.
    pub county: String,
    /// Euclidean distance in degrees from the target.
    pub distance: f64,
}

impl CandidateSource {
    /// Composite key of the source.
    pub fn key(&self) -> String {
        location_key(&self.city, &self.county)
    }
}

/// Immutable map from target key to its distance-ascending candidate sources.
#[derive(Debug, Default)]
pub struct DistanceIndex {
    entries: HashMap<String, Arc<[CandidateSource]>>,
}

impl DistanceIndex {
    /// Builds the index from a catalog of targets and a snapshot of sources.
    ///
    /// For every target, each source other than the target itself is
    /// annotated with its distance and the list is stable-sorted ascending,
    /// so equal distances keep the order of `sources`.
    pub fn build(targets: &[City], sources: &[Availability]) -> Result<Self, IndexError> {
        if targets.is_empty() {
            return Err(IndexError::EmptyTargets);
        }
        if sources.is_empty() {
            return Err(IndexError::EmptySources);
        }

        let mut entries = HashMap::with_capacity(targets.len());
        for target in targets {
            let mut candidates: Vec<CandidateSource> = sources
                .iter()
                .filter(|source| !(source.city == target.name && source.county == target.county))
                .map(|source| CandidateSource {
                    city: source.city.clone(),
                    county: source.county.clone(),
                    distance: euclidean(target.lat, target.long, source.latitude, source.longitude),
                })
                .collect();

            // `sort_by` is stable.
            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            entries.insert(target.key(), Arc::from(candidates));
        }

        log::debug!("Distance index built for {} targets from {} sources", entries.len(), sources.len());
        Ok(Self { entries })
    }

    /// Fetches the catalog and the `proxy` kind's availability from the
    /// gateway and builds the index from them.
    pub async fn from_gateway(gateway: &dyn ResourceGateway, proxy: ServiceKind) -> Result<Self, IndexError> {
        log::info!("Fetching location catalog and {} availability for the distance index", proxy);

        let targets = gateway.locations().await?;
        log::info!("Fetched {} locations", targets.len());

        let sources = gateway.service_availability(proxy).await?;
        log::info!("Fetched {} {} sources", sources.len(), proxy);

        Self::build(&targets, &sources)
    }

    /// Returns the nearest-first candidates for a `"{city}::{county}"` key.
    ///
    /// A miss means the target was never part of the catalog; callers
    /// should skip the call rather than retry.
    pub fn lookup(&self, key: &str) -> Result<Arc<[CandidateSource]>, IndexError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::NotFound { key: key.to_string() })
    }

    /// Number of targets in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no targets.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn euclidean(lat_a: f64, long_a: f64, lat_b: f64, long_b: f64) -> f64 {
    ((lat_a - lat_b).powi(2) + (long_a - long_b).powi(2)).sqrt()
}
