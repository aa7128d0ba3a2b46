//! Typed endpoints and the translation from raw registry records.
//!
//! Registries report the control-plane port an instance registered with.
//! The data-plane port that RPC traffic uses sits at a fixed offset from it
//! (`+1` by default), so every record is shifted on the way in.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Default distance between a registered control port and the data port.
pub const DEFAULT_PORT_OFFSET: i32 = 1;

/// A registry record that could not be turned into an [`Endpoint`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed endpoint record {record:?}: {reason}")]
pub struct MalformedRecordError {
    pub record: String,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

/// A single resolved network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, MalformedRecordError> {
        let host = host.into();
        if host.is_empty() {
            return Err(MalformedRecordError::new(format!(":{port}"), "empty host"));
        }
        if port == 0 {
            return Err(MalformedRecordError::new(format!("{host}:0"), "port 0"));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The endpoints produced by one resolution pass, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EndpointSet(Vec<Endpoint>);

impl EndpointSet {
    pub const fn new(endpoints: Vec<Endpoint>) -> Self {
        Self(endpoints)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Endpoint] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Endpoint> {
        self.0
    }

    /// Compares membership, ignoring order.
    pub fn same_members(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut left: Vec<&Endpoint> = self.0.iter().collect();
        let mut right: Vec<&Endpoint> = other.0.iter().collect();
        left.sort();
        right.sort();
        left == right
    }
}

impl FromIterator<Endpoint> for EndpointSet {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for EndpointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, endpoint) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{endpoint}")?;
        }
        f.write_str("]")
    }
}

/// Maps raw `host:port` registry records to data-plane endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointTranslator {
    port_offset: i32,
}

impl Default for EndpointTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_OFFSET)
    }
}

impl EndpointTranslator {
    pub const fn new(port_offset: i32) -> Self {
        Self { port_offset }
    }

    pub const fn port_offset(&self) -> i32 {
        self.port_offset
    }

    /// Translates a whole batch.
    ///
    /// A single malformed record fails the batch: a partial set would hide
    /// backends from the balancer without any signal that something is off.
    pub fn translate<S: AsRef<str>>(
        &self,
        records: &[S],
    ) -> Result<EndpointSet, MalformedRecordError> {
        records
            .iter()
            .map(|record| self.translate_record(record.as_ref()))
            .collect()
    }

    /// Translates one `host:port` record.
    pub fn translate_record(&self, record: &str) -> Result<Endpoint, MalformedRecordError> {
        let (host, port) = record
            .split_once(':')
            .ok_or_else(|| MalformedRecordError::new(record, "missing port separator"))?;

        if port.contains(':') {
            return Err(MalformedRecordError::new(record, "more than one port separator"));
        }
        if host.is_empty() {
            return Err(MalformedRecordError::new(record, "empty host"));
        }

        let non_numeric =
            || MalformedRecordError::new(record, format!("non-numeric port {port:?}"));
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(non_numeric());
        }
        let registered: u16 = port.parse().map_err(|_| non_numeric())?;

        let shifted = i64::from(registered) + i64::from(self.port_offset);
        let data_port = u16::try_from(shifted)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                let reason = format!("port {shifted} out of range after offset");
                MalformedRecordError::new(record, reason)
            })?;

        Endpoint::new(host, data_port).map_err(|e| MalformedRecordError::new(record, e.reason))
    }
}
