//! Extensible property bags
//!
//! Every record embeds a [`Properties`] map keyed by a property key that
//! encodes both the facet and its version (`"volumes.v1"`). Payloads are
//! kept as JSON values and decoded into the caller's type on access, so a
//! record written by an older build keeps loading when new facets appear.
//!
//! The bag is parameterised by a domain marker: a [`Property`] can only be
//! read from or written to the bag of the domain it declares.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Marker for the kind of record a property bag belongs to
pub trait Domain: Send + Sync + 'static {
    /// Human-readable domain name, used in error messages
    const NAME: &'static str;
}

/// Properties of a [`crate::Host`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostDomain;

/// Properties of a [`crate::Network`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkDomain;

/// Properties of a [`crate::Volume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeDomain;

impl Domain for HostDomain {
    const NAME: &'static str = "Host";
}

impl Domain for NetworkDomain {
    const NAME: &'static str = "Network";
}

impl Domain for VolumeDomain {
    const NAME: &'static str = "Volume";
}

/// A versioned facet that can be stored in a property bag
///
/// `Default` is the value returned when the facet was never set.
pub trait Property: Serialize + DeserializeOwned + Default {
    /// Domain whose bag may hold this property
    type Domain: Domain;

    /// Storage key, facet name plus version
    const KEY: &'static str;
}

/// Property bag of one record
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Properties<D> {
    entries: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    _domain: PhantomData<fn() -> D>,
}

impl<D: Domain> Properties<D> {
    /// Create an empty bag
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            _domain: PhantomData,
        }
    }

    /// Read a property, or its default value if it was never set
    pub fn get<P: Property<Domain = D>>(&self) -> Result<P> {
        match self.entries.get(P::KEY) {
            Some(value) => P::deserialize(value).map_err(|e| {
                Error::Serialization(format!(
                    "failed to decode property {}/{}: {}",
                    D::NAME,
                    P::KEY,
                    e
                ))
            }),
            None => Ok(P::default()),
        }
    }

    /// Replace a property wholesale
    pub fn set<P: Property<Domain = D>>(&mut self, value: &P) -> Result<()> {
        let encoded = serde_json::to_value(value)?;
        self.entries.insert(P::KEY.to_string(), encoded);
        Ok(())
    }

    /// Read-modify-write a property in one step
    pub fn update<P, F, T>(&mut self, f: F) -> Result<T>
    where
        P: Property<Domain = D>,
        F: FnOnce(&mut P) -> T,
    {
        let mut value = self.get::<P>()?;
        let out = f(&mut value);
        self.set(&value)?;
        Ok(out)
    }

    /// Check whether a property has ever been set
    pub fn has<P: Property<Domain = D>>(&self) -> bool {
        self.entries.contains_key(P::KEY)
    }

    /// Drop a property from the bag
    pub fn remove<P: Property<Domain = D>>(&mut self) -> bool {
        self.entries.remove(P::KEY).is_some()
    }

    /// Keys currently set, including ones unknown to this build
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<D: Domain> Default for Properties<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for Properties<D> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            _domain: PhantomData,
        }
    }
}

impl<D> PartialEq for Properties<D> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<D: Domain> fmt::Debug for Properties<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("domain", &D::NAME)
            .field("entries", &self.entries)
            .finish()
    }
}
