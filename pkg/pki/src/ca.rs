use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::path::Path;
use tracing::info;

/// Hub Certificate Authority.
/// Its certificate is published to every cluster as `ClusterInfo.spec.loggingCA`,
/// and it issues the client certificates the hub presents to agents.
pub struct ClusterCA {
    ca_cert_pem: String,
    ca_key_pair: KeyPair,
    ca_cert: rcgen::Certificate,
}

/// A PEM-encoded certificate and its private key.
#[derive(Debug, Clone)]
pub struct CertPair {
    pub cert_pem: String,
    pub key_pem: String,
}

impl ClusterCA {
    /// Create a new CA with a freshly-generated self-signed root certificate.
    pub fn new(common_name: &str) -> anyhow::Result<Self> {
        info!("Generating hub CA '{}'", common_name);

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "mcf");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let key_pair = KeyPair::generate()?;
        let ca_cert = params.self_signed(&key_pair)?;
        let ca_cert_pem = ca_cert.pem();

        Ok(Self {
            ca_cert_pem,
            ca_key_pair: key_pair,
            ca_cert,
        })
    }

    /// Rebuild a CA from its persisted PEM pair. The published certificate
    /// stays byte-identical; only the in-memory issuer is re-derived.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> anyhow::Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)?;
        let ca_cert = params.self_signed(&key_pair)?;
        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pair: key_pair,
            ca_cert,
        })
    }

    /// Load `ca.crt`/`ca.key` from `dir`, generating and writing them when absent.
    pub fn load_or_create(dir: &Path, common_name: &str) -> anyhow::Result<Self> {
        let cert_path = dir.join("ca.crt");
        let key_path = dir.join("ca.key");
        if cert_path.exists() && key_path.exists() {
            info!("Loading hub CA from {}", dir.display());
            let cert = std::fs::read_to_string(&cert_path)?;
            let key = std::fs::read_to_string(&key_path)?;
            return Self::from_pem(&cert, &key);
        }

        let ca = Self::new(common_name)?;
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;
        std::fs::write(&cert_path, ca.ca_cert_pem())?;
        std::fs::write(&key_path, ca.ca_key_pair.serialize_pem())?;
        info!("Hub CA written to {}", dir.display());
        Ok(ca)
    }

    /// Issue a client certificate whose subject carries the identity an agent
    /// authenticates: CN is the user, O the group.
    pub fn issue_client_cert(&self, user: &str, group: Option<&str>) -> anyhow::Result<CertPair> {
        info!("Issuing client certificate for {}", user);

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, user);
        if let Some(group) = group {
            params
                .distinguished_name
                .push(DnType::OrganizationName, group);
        }
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key_pair)?;

        Ok(CertPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Return the CA certificate PEM, the bundle agents trust.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::parse_certificates;
    use crate::identity::peer_identity;

    #[test]
    fn client_cert_carries_identity() {
        let ca = ClusterCA::new("test-ca").unwrap();
        let pair = ca.issue_client_cert("alice", Some("devs")).unwrap();
        let certs = parse_certificates(pair.cert_pem.as_bytes()).unwrap();
        let who = peer_identity(&certs[0]).unwrap();
        assert_eq!(who.name, "alice");
        assert_eq!(who.groups, vec!["devs"]);
    }

    #[test]
    fn persisted_ca_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let first = ClusterCA::load_or_create(dir.path(), "hub").unwrap();
        let second = ClusterCA::load_or_create(dir.path(), "hub").unwrap();
        assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());
        // The reloaded CA still signs.
        assert!(second.issue_client_cert("hub", None).is_ok());
    }
}
