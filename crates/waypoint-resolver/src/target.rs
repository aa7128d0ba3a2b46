//! Connection targets naming a registry-backed service.

use std::fmt;

use crate::error::{ResolverError, Result};

/// Maximum length for a service name.
pub const MAX_SERVICE_NAME_LENGTH: usize = 255;

/// A parsed `scheme://service` target.
///
/// Accepted forms are `consul://orders`, `consul:///orders`,
/// `consul:orders`, `consul://orders:50051` (the port is ignored, it is not
/// part of the name) and a bare `orders`. A trailing `:suffix` that is not
/// a numeric port is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverTarget {
    scheme: String,
    service_name: String,
}

impl ResolverTarget {
    /// Parses `address`, which must use `scheme` if it carries one.
    pub fn parse(address: &str, scheme: &str) -> Result<Self> {
        let address = address.trim();

        let rest = match address.split_once("://") {
            Some((found, rest)) => {
                if !found.eq_ignore_ascii_case(scheme) {
                    return Err(ResolverError::InvalidTarget(format!(
                        "unsupported scheme {found:?}, expected {scheme:?}"
                    )));
                }
                rest
            }
            None => strip_scheme_prefix(address, scheme),
        };

        let authority = rest.trim_start_matches('/');
        let authority = authority.split('/').next().unwrap_or_default();
        let service_name = match authority.rsplit_once(':') {
            Some((name, port)) if is_port(port) => name,
            _ => authority,
        };

        validate_service_name(service_name)?;

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            service_name: service_name.to_owned(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl fmt::Display for ResolverTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.service_name)
    }
}

/// Strips an opaque `scheme:` prefix, as in `consul:orders`.
///
/// `orders:50051` keeps its prefix: a numeric remainder is a port.
fn strip_scheme_prefix<'a>(address: &'a str, scheme: &str) -> &'a str {
    match address.split_once(':') {
        Some((found, rest)) if found.eq_ignore_ascii_case(scheme) && !is_port(rest) => rest,
        _ => address,
    }
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Validate a service name.
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ResolverError::InvalidTarget(
            "service name cannot be empty".into(),
        ));
    }

    if name.len() > MAX_SERVICE_NAME_LENGTH {
        return Err(ResolverError::InvalidTarget(format!(
            "service name exceeds maximum length of {MAX_SERVICE_NAME_LENGTH} characters"
        )));
    }

    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '?' | '#' | ':'))
    {
        return Err(ResolverError::InvalidTarget(format!(
            "service name {name:?} contains invalid characters"
        )));
    }

    Ok(())
}
