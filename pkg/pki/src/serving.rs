use pkg_constants::paths::{AGENT_CERT_FILE, AGENT_KEY_FILE};
use rcgen::{CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, SanType};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use crate::ca::CertPair;

/// Generate a self-signed serving certificate valid for `hosts`
/// (DNS names or IP addresses).
pub fn self_signed_serving_cert(hosts: &[String]) -> anyhow::Result<CertPair> {
    let mut params = CertificateParams::default();
    let cn = hosts.first().map(String::as_str).unwrap_or("localhost");
    params.distinguished_name.push(DnType::CommonName, cn);
    for host in hosts {
        let san = match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(host.as_str().try_into()?),
        };
        params.subject_alt_names.push(san);
    }
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok(CertPair {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Resolve the serving pair: use the given files when both are set,
/// otherwise reuse or create a self-signed pair in `cert_dir`.
pub fn load_or_generate(
    cert_file: Option<&str>,
    key_file: Option<&str>,
    cert_dir: &Path,
    hosts: &[String],
) -> anyhow::Result<CertPair> {
    if let (Some(cert), Some(key)) = (cert_file, key_file) {
        info!("Using serving certificate {}", cert);
        return Ok(CertPair {
            cert_pem: std::fs::read_to_string(cert)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", cert, e))?,
            key_pem: std::fs::read_to_string(key)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", key, e))?,
        });
    }

    let cert_path = cert_dir.join(AGENT_CERT_FILE);
    let key_path = cert_dir.join(AGENT_KEY_FILE);
    if cert_path.exists() && key_path.exists() {
        info!("Reusing self-signed serving certificate in {}", cert_dir.display());
        return Ok(CertPair {
            cert_pem: std::fs::read_to_string(&cert_path)?,
            key_pem: std::fs::read_to_string(&key_path)?,
        });
    }

    info!("Generating self-signed serving certificate for {:?}", hosts);
    let pair = self_signed_serving_cert(hosts)?;
    std::fs::create_dir_all(cert_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", cert_dir.display(), e))?;
    std::fs::write(&cert_path, &pair.cert_pem)?;
    std::fs::write(&key_path, &pair.key_pem)?;
    Ok(pair)
}
