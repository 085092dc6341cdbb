use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// node -> certificate type -> fingerprint
pub type CertificateFingerprints = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrotatedCertificate {
    pub node: String,
    pub cert_type: String,
    pub fingerprint: String,
}

fn describe(unchanged: &[UnrotatedCertificate]) -> String {
    unchanged
        .iter()
        .map(|c| format!("{} {}", c.node, c.cert_type))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
#[error("{} certificate(s) were not rotated: {}", .unchanged.len(), describe(.unchanged))]
pub struct RotationError {
    pub unchanged: Vec<UnrotatedCertificate>,
}

/// Every certificate seen before rotation must carry a different fingerprint
/// afterwards. Certificates absent from `new` count as changed.
pub fn verify_certificate_rotation(
    old: &CertificateFingerprints,
    new: &CertificateFingerprints,
) -> Result<(), RotationError> {
    let mut unchanged = Vec::new();
    for (node, certs) in old {
        for (cert_type, fingerprint) in certs {
            let rotated = new
                .get(node)
                .and_then(|n| n.get(cert_type))
                .is_none_or(|f| f != fingerprint);
            if !rotated {
                warn!(node = %node, cert_type = %cert_type, fingerprint = %fingerprint, "Certificate was not updated");
                unchanged.push(UnrotatedCertificate {
                    node: node.clone(),
                    cert_type: cert_type.clone(),
                    fingerprint: fingerprint.clone(),
                });
            }
        }
    }
    if unchanged.is_empty() {
        Ok(())
    } else {
        Err(RotationError { unchanged })
    }
}
