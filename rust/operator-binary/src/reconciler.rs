//! Drives a single [`CertificateRequest`] towards having a valid certificate in its credential

use snafu::{ResultExt, Snafu};
use stackable_cert_operator_crd_utils::CredentialRef;
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
    kube::{runtime::reflector::ObjectRef, Resource},
};
use strum::{EnumDiscriminants, IntoStaticStr};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    certificate,
    config::ControllerConfig,
    credential::{self, Credential, CredentialStore},
    crd::CertificateRequest,
    finalizer, renewal, status,
    store::{self, CertificateRequestStore},
    utils::error_full_message,
};

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get {request}"))]
    GetRequest {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to manage finalizer"))]
    Finalizer { source: finalizer::Error },

    #[snafu(display("failed to read credential"))]
    GetCredential { source: credential::Error },

    #[snafu(display("failed to issue certificate for {dns_name:?}"))]
    Issue {
        source: certificate::Error,
        dns_name: String,
    },

    #[snafu(display("failed to create credential"))]
    CreateCredential { source: credential::Error },

    #[snafu(display("failed to update credential"))]
    UpdateCredential { source: credential::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// A short, stable name for the kind of failure, suitable for log aggregation.
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// What happened to the credential during a successful pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr)]
pub enum CredentialAction {
    /// No credential existed, a new one was written.
    Created,
    /// The existing certificate was replaced.
    Renewed,
    /// The existing certificate is still good.
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The request does not exist anymore.
    Gone,
    /// The request is being deleted, and has been released by the operator.
    Finalized,
    Converged {
        action: CredentialAction,
        /// When the current certificate should be renewed.
        ///
        /// [`None`] if the certificate could not be inspected after writing it.
        renew_at: Option<OffsetDateTime>,
    },
}

pub struct Reconciler<R, C> {
    requests: R,
    credentials: C,
    config: ControllerConfig,
}

impl<R: CertificateRequestStore, C: CredentialStore> Reconciler<R, C> {
    pub fn new(requests: R, credentials: C, config: ControllerConfig) -> Self {
        Self {
            requests,
            credentials,
            config,
        }
    }

    /// Runs a single reconciliation pass for the named request.
    ///
    /// Passes are idempotent: a pass over an already converged request writes nothing.
    /// Concurrent passes for the same request must be prevented by the caller.
    pub async fn reconcile(&self, name: &str, namespace: &str) -> Result<ReconcileOutcome> {
        let request_ref = ObjectRef::<CertificateRequest>::new(name).within(namespace);
        let Some(mut request) =
            self.requests
                .get(name, namespace)
                .await
                .with_context(|_| GetRequestSnafu {
                    request: request_ref.clone(),
                })?
        else {
            debug!(request = %request_ref, "CertificateRequest no longer exists, nothing to do");
            return Ok(ReconcileOutcome::Gone);
        };

        if finalizer::handle(&self.requests, &self.credentials, &mut request)
            .await
            .context(FinalizerSnafu)?
        {
            return Ok(ReconcileOutcome::Finalized);
        }

        let (action, credential) = match self.converge_credential(&request).await {
            Ok(converged) => converged,
            Err(err) => {
                let message = error_full_message(&err);
                if let Err(status_err) =
                    status::record_failure(&self.requests, &request, &message).await
                {
                    warn!(
                        request = %request_ref,
                        error = &status_err as &dyn std::error::Error,
                        "Failed to record reconciliation failure"
                    );
                }
                return Err(err);
            }
        };

        let renew_at = match status::report(&self.requests, &request, &credential).await {
            Ok(info) => {
                info!(
                    request = %request_ref,
                    action = <&'static str>::from(action),
                    certificate.serial_number = %info.serial_number,
                    certificate.not_after = %info.not_after,
                    "CertificateRequest is up to date"
                );
                time::Duration::try_from(self.config.renewal_threshold)
                    .ok()
                    .and_then(|threshold| info.not_after.checked_sub(threshold))
            }
            Err(err) => {
                warn!(
                    request = %request_ref,
                    error = &err as &dyn std::error::Error,
                    "Failed to update status, the credential itself is up to date"
                );
                None
            }
        };
        Ok(ReconcileOutcome::Converged { action, renew_at })
    }

    async fn converge_credential(
        &self,
        request: &CertificateRequest,
    ) -> Result<(CredentialAction, Credential)> {
        let credential_ref = &request.spec.credential_ref;
        let Some(existing) = self
            .credentials
            .get(credential_ref)
            .await
            .context(GetCredentialSnafu)?
        else {
            info!(credential = %credential_ref, "Credential does not exist, issuing certificate");
            let credential = self.issue(request)?;
            let owner = owner_reference(request, credential_ref);
            return match self
                .credentials
                .create(credential_ref, &credential, owner.as_ref())
                .await
            {
                Ok(()) => Ok((CredentialAction::Created, credential)),
                Err(credential::Error::AlreadyExists { .. }) => {
                    info!(
                        credential = %credential_ref,
                        "Credential was created concurrently, overwriting it"
                    );
                    // The other writer did not necessarily make us its owner
                    self.credentials
                        .update(credential_ref, &credential, owner.as_ref())
                        .await
                        .context(UpdateCredentialSnafu)?;
                    Ok((CredentialAction::Created, credential))
                }
                Err(err) => Err(err).context(CreateCredentialSnafu),
            };
        };

        let renew = renewal::needs_renewal(
            &existing,
            &request.spec,
            self.config.renewal_threshold,
        )
        .unwrap_or_else(|err| {
            warn!(
                credential = %credential_ref,
                error = &err as &dyn std::error::Error,
                "Existing credential is unusable, replacing it"
            );
            true
        });
        if !renew {
            return Ok((CredentialAction::Unchanged, existing));
        }

        let credential = self.issue(request)?;
        self.credentials
            .update(credential_ref, &credential, None)
            .await
            .context(UpdateCredentialSnafu)?;
        Ok((CredentialAction::Renewed, credential))
    }

    fn issue(&self, request: &CertificateRequest) -> Result<Credential> {
        certificate::issue(&request.spec, &self.config).with_context(|_| IssueSnafu {
            dns_name: &request.spec.dns_name,
        })
    }
}

/// Owner references cannot cross namespaces, so a credential elsewhere is left unowned
/// and cleaned up by the [`finalizer`] instead.
fn owner_reference(
    request: &CertificateRequest,
    credential_ref: &CredentialRef,
) -> Option<OwnerReference> {
    if !credential_ref.is_ownable_by(&request.metadata) {
        warn!(
            request = %ObjectRef::from_obj(request),
            credential = %credential_ref,
            "Credential is in another namespace, it will be deleted by the finalizer instead of garbage collection"
        );
        return None;
    }
    request.controller_owner_ref(&())
}
