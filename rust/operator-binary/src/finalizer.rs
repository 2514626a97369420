//! Keeps [`CertificateRequest`]s around until the operator has seen their deletion
//!
//! An object without a deletion timestamp is *active*, an object with one is *terminating*.
//! The finalizer is added to every active object, and removed from terminating ones once
//! their cleanup is done.

use snafu::{ResultExt, Snafu};
use stackable_operator::kube::{runtime::reflector::ObjectRef, ResourceExt};
use tracing::{debug, info};

use crate::{
    credential::{self, CredentialStore},
    crd::{CertificateRequest, FINALIZER},
    store::{self, CertificateRequestStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to add finalizer to {request}"))]
    AddFinalizer {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to clean up after {request}"))]
    Cleanup {
        source: credential::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to remove finalizer from {request}"))]
    RemoveFinalizer {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },
}

/// Returns `true` once `request` is going away and should not be reconciled any further.
///
/// `request` is replaced by the stored version whenever the finalizers are changed.
/// The finalizer is only removed once cleanup has succeeded, so a failed cleanup is retried.
pub async fn handle(
    requests: &impl CertificateRequestStore,
    credentials: &impl CredentialStore,
    request: &mut CertificateRequest,
) -> Result<bool, Error> {
    let has_finalizer = request.finalizers().iter().any(|f| f == FINALIZER);
    if request.metadata.deletion_timestamp.is_none() {
        if !has_finalizer {
            info!(request = %ObjectRef::from_obj(&*request), "Adding finalizer");
            request.finalizers_mut().push(FINALIZER.to_string());
            *request = requests
                .update(request)
                .await
                .with_context(|_| AddFinalizerSnafu {
                    request: ObjectRef::from_obj(&*request),
                })?;
        }
        return Ok(false);
    }

    if has_finalizer {
        info!(
            request = %ObjectRef::from_obj(&*request),
            "CertificateRequest is being deleted, cleaning up"
        );
        cleanup(credentials, request)
            .await
            .with_context(|_| CleanupSnafu {
                request: ObjectRef::from_obj(&*request),
            })?;
        request.finalizers_mut().retain(|f| f != FINALIZER);
        *request = requests
            .update(request)
            .await
            .with_context(|_| RemoveFinalizerSnafu {
                request: ObjectRef::from_obj(&*request),
            })?;
    } else {
        debug!(
            request = %ObjectRef::from_obj(&*request),
            "CertificateRequest is being deleted, nothing left to clean up"
        );
    }
    Ok(true)
}

/// Credentials in the request's namespace are owned by it, so Kubernetes garbage collects them.
/// Owner references cannot cross namespaces, so credentials elsewhere are deleted here.
async fn cleanup(
    credentials: &impl CredentialStore,
    request: &CertificateRequest,
) -> Result<(), credential::Error> {
    let credential_ref = &request.spec.credential_ref;
    if credential_ref.is_ownable_by(&request.metadata) {
        debug!(
            request = %ObjectRef::from_obj(request),
            credential = %credential_ref,
            "Leaving credential to garbage collection"
        );
        return Ok(());
    }
    info!(
        request = %ObjectRef::from_obj(request),
        credential = %credential_ref,
        "Deleting credential in foreign namespace"
    );
    credentials.delete(credential_ref).await
}
