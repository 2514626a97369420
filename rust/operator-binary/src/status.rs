//! Publishes what the operator knows about a [`CertificateRequest`] in its status

use snafu::{ResultExt, Snafu};
use stackable_cert_operator_crd_utils::CredentialRef;
use stackable_operator::{
    k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::{Condition, Time},
        chrono::Utc,
    },
    kube::runtime::reflector::ObjectRef,
};
use tracing::debug;

use crate::{
    certificate::{CertificateInfo, InspectError},
    credential::Credential,
    crd::{CertificateRequest, CertificateRequestStatus, ConditionType},
    store::{self, CertificateRequestStore},
    utils::{offsetdatetime_to_k8s_time, TimeOutOfBoundsError},
};

const REASON_ISSUED: &str = "Success";
const REASON_RECONCILE_COMPLETED: &str = "ReconcileCompleted";
const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("certificate in {credential} is unreadable"))]
    CredentialUnreadable {
        source: InspectError,
        credential: CredentialRef,
    },

    #[snafu(display("certificate validity period is out of range"))]
    ConvertValidity { source: TimeOutOfBoundsError },

    #[snafu(display("failed to write status of {request}"))]
    WriteStatus {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Records `credential` as the request's current certificate, and marks the reconciliation as successful.
pub async fn report(
    requests: &impl CertificateRequestStore,
    request: &CertificateRequest,
    credential: &Credential,
) -> Result<CertificateInfo> {
    let info = CertificateInfo::from_pem(&credential.certificate_pem).with_context(|_| {
        CredentialUnreadableSnafu {
            credential: request.spec.credential_ref.clone(),
        }
    })?;

    let mut status = request.status.clone().unwrap_or_default();
    status.serial_number = Some(info.serial_number.clone());
    status.issuer = Some(info.issuer.clone());
    status.not_before =
        Some(offsetdatetime_to_k8s_time(info.not_before).context(ConvertValiditySnafu)?);
    status.not_after =
        Some(offsetdatetime_to_k8s_time(info.not_after).context(ConvertValiditySnafu)?);
    let generation = request.metadata.generation;
    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        generation,
        ConditionType::Issued,
        true,
        REASON_ISSUED,
        "Successfully issued certificate",
    );
    set_condition(
        conditions,
        generation,
        ConditionType::ReconcileSuccess,
        true,
        REASON_RECONCILE_COMPLETED,
        "Reconcile completed successfully",
    );
    set_condition(
        conditions,
        generation,
        ConditionType::ReconcileError,
        false,
        REASON_RECONCILE_COMPLETED,
        "",
    );

    write_status(requests, request, status).await?;
    Ok(info)
}

/// Marks the last reconciliation of `request` as failed with `message`.
pub async fn record_failure(
    requests: &impl CertificateRequestStore,
    request: &CertificateRequest,
    message: &str,
) -> Result<()> {
    let mut status = request.status.clone().unwrap_or_default();
    let generation = request.metadata.generation;
    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        generation,
        ConditionType::ReconcileError,
        true,
        REASON_RECONCILE_FAILED,
        message,
    );
    set_condition(
        conditions,
        generation,
        ConditionType::ReconcileSuccess,
        false,
        REASON_RECONCILE_FAILED,
        message,
    );
    write_status(requests, request, status).await
}

async fn write_status(
    requests: &impl CertificateRequestStore,
    request: &CertificateRequest,
    status: CertificateRequestStatus,
) -> Result<()> {
    if request.status.as_ref() == Some(&status) {
        debug!(request = %ObjectRef::from_obj(request), "Status is unchanged, not writing");
        return Ok(());
    }
    let mut updated = request.clone();
    updated.status = Some(status);
    requests
        .update_status(&updated)
        .await
        .with_context(|_| WriteStatusSnafu {
            request: ObjectRef::from_obj(request),
        })?;
    Ok(())
}

/// Sets the condition of type `type_`, replacing any previous one.
///
/// The transition time is only bumped if the condition's status changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    observed_generation: Option<i64>,
    type_: ConditionType,
    status: bool,
    reason: &str,
    message: &str,
) {
    let status = if status { "True" } else { "False" };
    let existing = conditions.iter_mut().find(|cond| cond.type_ == type_.as_ref());
    let last_transition_time = match &existing {
        Some(cond) if cond.status == status => cond.last_transition_time.clone(),
        _ => Time(Utc::now()),
    };
    let condition = Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time,
        observed_generation,
    };
    match existing {
        Some(cond) => *cond = condition,
        None => conditions.push(condition),
    }
}
