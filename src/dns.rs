use std::net::IpAddr;

use anyhow::{Context, Result};
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver as AsyncResolver;

use crate::validation::DomainName;

/// Resolvability pre-check run before a scanner process is spawned.
pub struct DnsResolver {
    resolver: AsyncResolver,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration (`/etc/resolv.conf`
    /// and the hosts file).
    pub fn new() -> Result<Self> {
        let resolver = AsyncResolver::tokio_from_system_conf()
            .context("Failed to create DNS resolver from system configuration")?;

        Ok(Self { resolver })
    }

    /// Resolves `domain` to its addresses
    ///
    /// The name is looked up as fully qualified so resolver search domains
    /// cannot turn an unknown name into a local one.
    ///
    /// # Returns
    /// * `Result<Vec<IpAddr>>` - At least one address, or an error
    pub async fn resolve(&self, domain: &DomainName) -> Result<Vec<IpAddr>> {
        debug!("Resolving DNS for domain: {}", domain);

        let fqdn = format!("{domain}.");
        let lookup = self
            .resolver
            .lookup_ip(fqdn.as_str())
            .await
            .with_context(|| format!("DNS resolution failed for {domain}"))?;

        let ips: Vec<IpAddr> = lookup.iter().collect();
        if ips.is_empty() {
            anyhow::bail!("No IP addresses found for domain: {domain}");
        }

        debug!("Resolved {} IP addresses for {}", ips.len(), domain);
        Ok(ips)
    }
}
