//! Decides when an existing certificate has to be replaced
//!
//! The renewal threshold is configured once for the whole operator, individual
//! [`CertificateRequest`](crate::crd::CertificateRequest)s cannot override it.

use std::time::Duration;

use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    certificate::{self, CertificateInfo},
    credential::Credential,
    crd::CertificateRequestSpec,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("existing certificate is malformed"))]
    MalformedCertificate { source: certificate::InspectError },

    #[snafu(display("existing credential does not hold the certificate's private key"))]
    KeyMismatch { source: certificate::InspectError },
}

/// Whether `existing` must be replaced to satisfy `spec`.
///
/// Fails if `existing` is unusable, which also calls for a replacement.
pub fn needs_renewal(
    existing: &Credential,
    spec: &CertificateRequestSpec,
    renewal_threshold: Duration,
) -> Result<bool, Error> {
    needs_renewal_at(existing, spec, renewal_threshold, OffsetDateTime::now_utc())
}

pub fn needs_renewal_at(
    existing: &Credential,
    spec: &CertificateRequestSpec,
    renewal_threshold: Duration,
    now: OffsetDateTime,
) -> Result<bool, Error> {
    let info =
        CertificateInfo::from_pem(&existing.certificate_pem).context(MalformedCertificateSnafu)?;
    certificate::check_key_pair(existing).context(KeyMismatchSnafu)?;
    Ok(is_due(&info, spec, renewal_threshold, now))
}

/// A certificate with exactly `renewal_threshold` left is still considered fresh.
fn is_due(
    info: &CertificateInfo,
    spec: &CertificateRequestSpec,
    renewal_threshold: Duration,
    now: OffsetDateTime,
) -> bool {
    if info.common_name != spec.dns_name {
        info!(
            certificate.common_name = %info.common_name,
            requested.dns_name = %spec.dns_name,
            "Certificate was issued for another DNS name, renewing"
        );
        return true;
    }
    let remaining = info.not_after - now;
    if remaining < renewal_threshold {
        info!(
            certificate.not_after = %info.not_after,
            %remaining,
            "Certificate is close to expiring, renewing"
        );
        true
    } else {
        debug!(
            certificate.not_after = %info.not_after,
            %remaining,
            "Certificate is not close to expiring, will not renew"
        );
        false
    }
}
