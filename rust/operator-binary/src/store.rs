//! Access to [`CertificateRequest`] objects in the Kubernetes API

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::kube::{
    self,
    api::{Patch, PatchParams, PostParams},
    runtime::reflector::ObjectRef,
    Api, ResourceExt,
};

use crate::crd::CertificateRequest;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no name"))]
    NoName,

    #[snafu(display("object has no namespace"))]
    NoNamespace,

    #[snafu(display("failed to get {request}"))]
    Get {
        source: kube::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to update {request}"))]
    Update {
        source: kube::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to update status of {request}"))]
    UpdateStatus {
        source: kube::Error,
        request: ObjectRef<CertificateRequest>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Desired and observed state of [`CertificateRequest`]s.
#[async_trait]
pub trait CertificateRequestStore: Send + Sync {
    /// Returns [`None`] if the request does not exist (anymore).
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<CertificateRequest>>;

    /// Writes the request's metadata and spec, returning the stored version.
    async fn update(&self, request: &CertificateRequest) -> Result<CertificateRequest>;

    /// Writes the request's status, returning the stored version.
    async fn update_status(&self, request: &CertificateRequest) -> Result<CertificateRequest>;
}

pub struct KubeCertificateRequestStore {
    client: kube::Client,
}

impl KubeCertificateRequestStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api_for(&self, request: &CertificateRequest) -> Result<(Api<CertificateRequest>, String)> {
        let namespace = request.namespace().context(NoNamespaceSnafu)?;
        let name = request.metadata.name.clone().context(NoNameSnafu)?;
        Ok((Api::namespaced(self.client.clone(), &namespace), name))
    }
}

#[async_trait]
impl CertificateRequestStore for KubeCertificateRequestStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<CertificateRequest>> {
        Api::<CertificateRequest>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetSnafu {
                request: ObjectRef::new(name).within(namespace),
            })
    }

    async fn update(&self, request: &CertificateRequest) -> Result<CertificateRequest> {
        let (api, name) = self.api_for(request)?;
        // Replace (rather than patch) so that a concurrent modification fails on resourceVersion
        api.replace(&name, &PostParams::default(), request)
            .await
            .with_context(|_| UpdateSnafu {
                request: ObjectRef::from_obj(request),
            })
    }

    async fn update_status(&self, request: &CertificateRequest) -> Result<CertificateRequest> {
        let (api, name) = self.api_for(request)?;
        let patch = serde_json::json!({ "status": request.status });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|_| UpdateStatusSnafu {
                request: ObjectRef::from_obj(request),
            })
    }
}
