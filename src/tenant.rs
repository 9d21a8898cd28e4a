// A tenant of the identity provider, checked so it can be used as a URL path segment.

use std::{fmt, str::FromStr};

/// An identity-provider tenant.
///
/// This is either a directory (tenant) ID, a verified domain, or one of the multi-tenant aliases
/// such as `organizations`. It is used to address the sign-in authority.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Tenant(String);

impl Tenant {
    /// The `organizations` alias, which accepts any work or school account.
    #[must_use]
    pub fn organizations() -> Self {
        Self("organizations".to_string())
    }
}

impl FromStr for Tenant {
    type Err = InvalidTenant;

    fn from_str(tenant: &str) -> Result<Self, Self::Err> {
        let tenant = tenant.trim();
        if tenant.is_empty() {
            return Err(InvalidTenant(tenant.to_string()));
        }
        if !tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        {
            return Err(InvalidTenant(tenant.to_string()));
        }
        Ok(Self(tenant.to_string()))
    }
}

impl AsRef<str> for Tenant {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A tenant string that can't be used to address a sign-in authority.
#[derive(Debug, thiserror::Error)]
#[error("invalid tenant {0:?}: expected a tenant ID, domain name, or alias")]
pub struct InvalidTenant(String);
