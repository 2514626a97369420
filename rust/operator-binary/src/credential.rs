//! Reads and writes the `Secret`s that hold issued certificates and their keys

use std::collections::BTreeMap;

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use stackable_cert_operator_crd_utils::CredentialRef;
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::Secret,
        apimachinery::pkg::apis::meta::v1::OwnerReference,
        ByteString,
    },
    kube::{
        self,
        api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams},
        core::ErrorResponse,
        Api,
    },
};

use crate::utils::Unloggable;

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const SECRET_KEY_CERT: &str = "tls.crt";
pub const SECRET_KEY_KEY: &str = "tls.key";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{credential} does not exist"))]
    NotFound { credential: CredentialRef },

    #[snafu(display("{credential} already exists"))]
    AlreadyExists { credential: CredentialRef },

    #[snafu(display("failed to get {credential}"))]
    Get {
        source: kube::Error,
        credential: CredentialRef,
    },

    #[snafu(display("failed to create {credential}"))]
    Create {
        source: kube::Error,
        credential: CredentialRef,
    },

    #[snafu(display("failed to update {credential}"))]
    Update {
        source: kube::Error,
        credential: CredentialRef,
    },

    #[snafu(display("failed to delete {credential}"))]
    Delete {
        source: kube::Error,
        credential: CredentialRef,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// A certificate and the private key that it was issued for.
///
/// Both are always written together, so that a stored pair never mismatches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Unloggable<Vec<u8>>,
}

impl Credential {
    /// Missing entries are read as empty, which no certificate parser will accept.
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Self {
        let entry = |key: &str| data.get(key).map(|value| value.0.clone()).unwrap_or_default();
        Self {
            certificate_pem: entry(SECRET_KEY_CERT),
            private_key_pem: Unloggable(entry(SECRET_KEY_KEY)),
        }
    }

    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        [
            (SECRET_KEY_CERT, &self.certificate_pem),
            (SECRET_KEY_KEY, &*self.private_key_pem),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), ByteString(value.clone())))
        .collect()
    }
}

/// Storage for [`Credential`]s, addressed by [`CredentialRef`].
///
/// Implementations pass straight through to the backing store, without caching.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns [`None`] if the credential does not exist.
    async fn get(&self, credential_ref: &CredentialRef) -> Result<Option<Credential>>;

    /// Fails with [`Error::AlreadyExists`] if the credential already exists.
    async fn create(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<()>;

    /// Fails with [`Error::NotFound`] if the credential does not exist.
    ///
    /// `owner` replaces any existing owners, other owners are kept if it is [`None`].
    async fn update(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<()>;

    /// Deleting a credential that does not exist succeeds.
    async fn delete(&self, credential_ref: &CredentialRef) -> Result<()>;
}

/// Stores [`Credential`]s as TLS `Secret`s.
pub struct KubeCredentialStore {
    client: kube::Client,
}

impl KubeCredentialStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, credential_ref: &CredentialRef) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &credential_ref.namespace)
    }
}

/// Merges only the managed keys, anything else in the Secret is left alone.
fn update_patch(credential: &Credential, owner: Option<&OwnerReference>) -> serde_json::Value {
    let mut patch = serde_json::json!({ "data": credential.to_secret_data() });
    if let Some(owner) = owner {
        patch["metadata"] = serde_json::json!({ "ownerReferences": [owner] });
    }
    patch
}

fn is_api_error(err: &kube::Error, status_code: u16) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code, .. }) if *code == status_code)
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn get(&self, credential_ref: &CredentialRef) -> Result<Option<Credential>> {
        let secret = self
            .api(credential_ref)
            .get_opt(&credential_ref.name)
            .await
            .context(GetSnafu {
                credential: credential_ref.clone(),
            })?;
        Ok(secret.map(|secret| Credential::from_secret_data(&secret.data.unwrap_or_default())))
    }

    async fn create(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(credential_ref.name.clone()),
                namespace: Some(credential_ref.namespace.clone()),
                owner_references: owner.map(|owner| vec![owner.clone()]),
                ..ObjectMeta::default()
            },
            type_: Some(SECRET_TYPE_TLS.to_string()),
            data: Some(credential.to_secret_data()),
            ..Secret::default()
        };
        match self
            .api(credential_ref)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_api_error(&err, 409) => AlreadyExistsSnafu {
                credential: credential_ref.clone(),
            }
            .fail(),
            Err(err) => Err(err).context(CreateSnafu {
                credential: credential_ref.clone(),
            }),
        }
    }

    async fn update(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<()> {
        let patch = update_patch(credential, owner);
        match self
            .api(credential_ref)
            .patch(
                &credential_ref.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_api_error(&err, 404) => NotFoundSnafu {
                credential: credential_ref.clone(),
            }
            .fail(),
            Err(err) => Err(err).context(UpdateSnafu {
                credential: credential_ref.clone(),
            }),
        }
    }

    async fn delete(&self, credential_ref: &CredentialRef) -> Result<()> {
        match self
            .api(credential_ref)
            .delete(&credential_ref.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_api_error(&err, 404) => Ok(()),
            Err(err) => Err(err).context(DeleteSnafu {
                credential: credential_ref.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stackable_operator::{
        k8s_openapi::ByteString,
        kube::{self, core::ErrorResponse},
    };

    use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    use super::{is_api_error, update_patch, Credential, SECRET_KEY_CERT, SECRET_KEY_KEY};
    use crate::utils::Unloggable;

    #[test]
    fn secret_data_layout() {
        let credential = Credential {
            certificate_pem: b"cert".to_vec(),
            private_key_pem: Unloggable(b"key".to_vec()),
        };
        let data = credential.to_secret_data();
        assert_eq!(
            data.keys().map(String::as_str).collect::<Vec<_>>(),
            [SECRET_KEY_CERT, SECRET_KEY_KEY]
        );
        assert_eq!(Credential::from_secret_data(&data), credential);
    }

    #[test]
    fn missing_entries_are_empty() {
        let data = BTreeMap::from([(
            SECRET_KEY_CERT.to_string(),
            ByteString(b"cert".to_vec()),
        )]);
        let credential = Credential::from_secret_data(&data);
        assert_eq!(credential.certificate_pem, b"cert");
        assert!(credential.private_key_pem.is_empty());
    }

    #[test]
    fn api_errors_are_matched_by_status_code() {
        let conflict = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"web-tls\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert!(is_api_error(&conflict, 409));
        assert!(!is_api_error(&conflict, 404));
    }

    #[test]
    fn update_only_claims_ownership_when_asked_to() {
        let credential = Credential {
            certificate_pem: b"cert".to_vec(),
            private_key_pem: Unloggable(b"key".to_vec()),
        };
        let plain = update_patch(&credential, None);
        assert!(plain.get("metadata").is_none());
        assert!(plain["data"].get(SECRET_KEY_CERT).is_some());

        let owner = OwnerReference {
            api_version: "certs.stackable.tech/v1alpha1".to_string(),
            kind: "CertificateRequest".to_string(),
            name: "web".to_string(),
            uid: "web-uid".to_string(),
            controller: Some(true),
            ..OwnerReference::default()
        };
        let owned = update_patch(&credential, Some(&owner));
        assert_eq!(owned["metadata"]["ownerReferences"][0]["uid"], "web-uid");
        assert_eq!(owned["metadata"]["ownerReferences"][0]["controller"], true);
    }
}
