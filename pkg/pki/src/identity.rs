use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

/// User and groups asserted by a client certificate subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIdentity {
    pub name: String,
    pub groups: Vec<String>,
}

/// Read the identity from a verified client certificate: the common name is
/// the user and every organization is a group.
pub fn peer_identity(cert: &CertificateDer<'_>) -> anyhow::Result<CertIdentity> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| anyhow::anyhow!("Failed to parse peer certificate: {}", e))?;
    let subject = parsed.subject();
    let name = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        anyhow::bail!("peer certificate has no common name");
    }
    let groups = subject
        .iter_organization()
        .filter_map(|o| o.as_str().ok())
        .map(str::to_string)
        .collect();
    Ok(CertIdentity { name, groups })
}
