//! Runs the [`Reconciler`] whenever a [`CertificateRequest`] or one of its credentials changes
//!
//! kube-runtime's [`Controller`] never runs two passes for the same object at once, which is
//! the only concurrency guarantee that the reconciler relies on.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{
        api::{ObjectMeta, PartialObjectMeta},
        runtime::{
            controller::{self, Action},
            reflector::{self, ObjectRef},
            watcher, Controller,
        },
        ResourceExt,
    },
    namespace::WatchNamespace,
};
use strum::{EnumDiscriminants, IntoStaticStr};
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::{
    config::ControllerConfig,
    credential::KubeCredentialStore,
    crd::CertificateRequest,
    reconciler::{self, ReconcileOutcome, Reconciler},
    store::KubeCertificateRequestStore,
};

const MIN_REQUEUE: Duration = Duration::from_secs(60);
const MAX_REQUEUE: Duration = Duration::from_secs(24 * 60 * 60);
/// Used when the renewal time of the current certificate is unknown.
const DEFAULT_REQUEUE: Duration = Duration::from_secs(60 * 60);
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

pub async fn start(
    client: &stackable_operator::client::Client,
    config: ControllerConfig,
    watch_namespace: &WatchNamespace,
) {
    let kube_client = client.as_kube_client();
    let ctx = Arc::new(Ctx {
        reconciler: Reconciler::new(
            KubeCertificateRequestStore::new(kube_client.clone()),
            KubeCredentialStore::new(kube_client),
            config,
        ),
    });
    let controller = Controller::new(
        watch_namespace.get_api::<CertificateRequest>(client),
        watcher::Config::default(),
    );
    let requests = controller.store();
    controller
        // Credentials outside of the request's namespace are not owned, so look them up by reference
        .watches(
            watch_namespace.get_api::<PartialObjectMeta<Secret>>(client),
            watcher::Config::default(),
            credential_watch_mapper(requests),
        )
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(16, |res| async move {
            match res {
                Ok((request, action)) => {
                    debug!(request = %request, ?action, "Reconciled CertificateRequest");
                }
                Err(controller::Error::ReconcilerFailed(err, request)) => {
                    error!(
                        request = %request,
                        error.category = err.category(),
                        error = &err as &dyn std::error::Error,
                        "Failed to reconcile CertificateRequest"
                    );
                }
                Err(err) => {
                    error!(
                        error = &err as &dyn std::error::Error,
                        "CertificateRequest controller failed"
                    );
                }
            }
        })
        .await;
}

/// Resolves a modified `Secret` into the [`CertificateRequest`]s that use it as their credential.
fn credential_watch_mapper(
    requests: reflector::Store<CertificateRequest>,
) -> impl Fn(PartialObjectMeta<Secret>) -> Vec<ObjectRef<CertificateRequest>> {
    move |secret| {
        requests
            .state()
            .into_iter()
            .filter(|request| is_credential_of(&secret.metadata, request))
            .map(|request| ObjectRef::from_obj(&*request))
            .collect()
    }
}

fn is_credential_of(secret_meta: &ObjectMeta, request: &CertificateRequest) -> bool {
    let credential_ref = &request.spec.credential_ref;
    secret_meta.name.as_deref() == Some(credential_ref.name.as_str())
        && secret_meta.namespace.as_deref() == Some(credential_ref.namespace.as_str())
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("CertificateRequest has no namespace"))]
    NoNamespace,

    #[snafu(display("failed to reconcile CertificateRequest"))]
    Reconcile { source: reconciler::Error },
}

impl Error {
    pub fn category(&self) -> &'static str {
        match self {
            Error::Reconcile { source } => source.category(),
            _ => ErrorDiscriminants::from(self).into(),
        }
    }
}

struct Ctx {
    reconciler: Reconciler<KubeCertificateRequestStore, KubeCredentialStore>,
}

async fn reconcile(request: Arc<CertificateRequest>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    // The cached object is only used to find the request, the reconciler reads its own copy
    let namespace = request.namespace().context(NoNamespaceSnafu)?;
    let outcome = ctx
        .reconciler
        .reconcile(&request.name_any(), &namespace)
        .await
        .context(ReconcileSnafu)?;
    Ok(requeue_action(&outcome, OffsetDateTime::now_utc()))
}

fn error_policy(_request: Arc<CertificateRequest>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(ERROR_REQUEUE)
}

/// Schedules the next pass for when the current certificate is due for renewal.
fn requeue_action(outcome: &ReconcileOutcome, now: OffsetDateTime) -> Action {
    match outcome {
        ReconcileOutcome::Gone | ReconcileOutcome::Finalized => Action::await_change(),
        ReconcileOutcome::Converged {
            renew_at: Some(renew_at),
            ..
        } => Action::requeue(
            Duration::try_from(*renew_at - now)
                .unwrap_or(MIN_REQUEUE)
                .clamp(MIN_REQUEUE, MAX_REQUEUE),
        ),
        ReconcileOutcome::Converged { renew_at: None, .. } => Action::requeue(DEFAULT_REQUEUE),
    }
}
