//! CRD types that are shared between cert-operator components, but aren't clearly owned by one of them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{api::ObjectMeta, runtime::reflector::ObjectRef},
    schemars::{self, JsonSchema},
};

/// Points at the `Secret` that a certificate and its private key are written to.
///
/// Unlike k8s-openapi's `SecretReference`, both name and namespace are mandatory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    /// Namespace of the Secret being referred to.
    pub namespace: String,
    /// Name of the Secret being referred to.
    pub name: String,
}

impl CredentialRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Whether the referenced Secret may carry an owner reference to an object with `owner_meta`.
    ///
    /// Kubernetes only honours owner references within a single namespace.
    pub fn is_ownable_by(&self, owner_meta: &ObjectMeta) -> bool {
        owner_meta.namespace.as_deref() == Some(&self.namespace)
    }
}

// Use ObjectRef for logging/errors
impl Display for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ObjectRef::<Secret>::from(self).fmt(f)
    }
}
impl From<&CredentialRef> for ObjectRef<Secret> {
    fn from(val: &CredentialRef) -> Self {
        ObjectRef::<Secret>::new(&val.name).within(&val.namespace)
    }
}
