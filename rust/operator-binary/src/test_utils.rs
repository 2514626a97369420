//! In-memory stand-ins for the Kubernetes API

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use stackable_cert_operator_crd_utils::CredentialRef;
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
    kube::{self, api::ObjectMeta, core::ErrorResponse, runtime::reflector::ObjectRef},
};

use crate::{
    credential::{self, Credential, CredentialStore},
    crd::{CertificateRequest, CertificateRequestSpec},
    store::{self, CertificateRequestStore},
};

pub const NAMESPACE: &str = "default";

pub fn spec(dns_name: &str, validity: &str) -> CertificateRequestSpec {
    CertificateRequestSpec {
        dns_name: dns_name.to_string(),
        validity: validity.to_string(),
        credential_ref: CredentialRef::new("web-tls", NAMESPACE),
    }
}

pub fn request(name: &str, dns_name: &str, validity: &str) -> CertificateRequest {
    let mut request = CertificateRequest::new(name, spec(dns_name, validity));
    request.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("{name}-uid")),
        generation: Some(1),
        ..ObjectMeta::default()
    };
    request
}

pub fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("simulated error {code}"),
        reason: "Simulated".to_string(),
        code,
    })
}

#[derive(Default)]
pub struct FakeRequestStore {
    objects: Mutex<BTreeMap<String, CertificateRequest>>,
    fail_status_updates: AtomicBool,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
}

impl FakeRequestStore {
    pub fn with(request: CertificateRequest) -> Self {
        let store = Self::default();
        store.put(request);
        store
    }

    pub fn put(&self, request: CertificateRequest) {
        let name = request.metadata.name.clone().unwrap_or_default();
        self.objects.lock().unwrap().insert(name, request);
    }

    pub fn stored(&self, name: &str) -> Option<CertificateRequest> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_status_updates(&self) {
        self.fail_status_updates.store(true, Ordering::SeqCst);
    }

    pub fn status_updates(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateRequestStore for FakeRequestStore {
    async fn get(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Option<CertificateRequest>, store::Error> {
        Ok(self.stored(name))
    }

    async fn update(&self, request: &CertificateRequest) -> Result<CertificateRequest, store::Error> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let name = request.metadata.name.clone().unwrap_or_default();
        let Some(stored) = objects.get_mut(&name) else {
            return Err(store::Error::Update {
                source: api_error(404),
                request: ObjectRef::from_obj(request),
            });
        };
        // Like the API server, ignore status changes through the main resource
        stored.metadata = request.metadata.clone();
        stored.spec = request.spec.clone();
        Ok(stored.clone())
    }

    async fn update_status(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateRequest, store::Error> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(store::Error::UpdateStatus {
                source: api_error(500),
                request: ObjectRef::from_obj(request),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        let name = request.metadata.name.clone().unwrap_or_default();
        let Some(stored) = objects.get_mut(&name) else {
            return Err(store::Error::UpdateStatus {
                source: api_error(404),
                request: ObjectRef::from_obj(request),
            });
        };
        stored.status = request.status.clone();
        Ok(stored.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailOn {
    Get,
    Create,
    Update,
    Delete,
}

/// A stored credential, with its current owner.
#[derive(Clone, Debug)]
pub struct StoredCredential {
    pub credential: Credential,
    pub owner: Option<OwnerReference>,
}

#[derive(Default)]
pub struct FakeCredentialStore {
    credentials: Mutex<BTreeMap<(String, String), StoredCredential>>,
    fail_on: Mutex<Option<FailOn>>,
    /// Pretend that another writer creates the credential just before our create call.
    race_on_create: Mutex<Option<Credential>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

fn key(credential_ref: &CredentialRef) -> (String, String) {
    (
        credential_ref.namespace.clone(),
        credential_ref.name.clone(),
    )
}

impl FakeCredentialStore {
    pub fn put(&self, credential_ref: &CredentialRef, credential: Credential) {
        self.credentials.lock().unwrap().insert(
            key(credential_ref),
            StoredCredential {
                credential,
                owner: None,
            },
        );
    }

    pub fn stored(&self, credential_ref: &CredentialRef) -> Option<StoredCredential> {
        self.credentials
            .lock()
            .unwrap()
            .get(&key(credential_ref))
            .cloned()
    }

    pub fn fail_on(&self, operation: FailOn) {
        *self.fail_on.lock().unwrap() = Some(operation);
    }

    pub fn race_on_create(&self, competing: Credential) {
        *self.race_on_create.lock().unwrap() = Some(competing);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn should_fail(&self, operation: FailOn) -> bool {
        *self.fail_on.lock().unwrap() == Some(operation)
    }
}

#[async_trait]
impl CredentialStore for FakeCredentialStore {
    async fn get(&self, credential_ref: &CredentialRef) -> Result<Option<Credential>, credential::Error> {
        if self.should_fail(FailOn::Get) {
            return Err(credential::Error::Get {
                source: api_error(500),
                credential: credential_ref.clone(),
            });
        }
        Ok(self.stored(credential_ref).map(|stored| stored.credential))
    }

    async fn create(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<(), credential::Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(FailOn::Create) {
            return Err(credential::Error::Create {
                source: api_error(500),
                credential: credential_ref.clone(),
            });
        }
        if let Some(competing) = self.race_on_create.lock().unwrap().take() {
            self.put(credential_ref, competing);
        }
        let mut credentials = self.credentials.lock().unwrap();
        if credentials.contains_key(&key(credential_ref)) {
            return Err(credential::Error::AlreadyExists {
                credential: credential_ref.clone(),
            });
        }
        credentials.insert(
            key(credential_ref),
            StoredCredential {
                credential: credential.clone(),
                owner: owner.cloned(),
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        credential_ref: &CredentialRef,
        credential: &Credential,
        owner: Option<&OwnerReference>,
    ) -> Result<(), credential::Error> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(FailOn::Update) {
            return Err(credential::Error::Update {
                source: api_error(500),
                credential: credential_ref.clone(),
            });
        }
        match self.credentials.lock().unwrap().get_mut(&key(credential_ref)) {
            Some(stored) => {
                stored.credential = credential.clone();
                if let Some(owner) = owner {
                    stored.owner = Some(owner.clone());
                }
                Ok(())
            }
            None => Err(credential::Error::NotFound {
                credential: credential_ref.clone(),
            }),
        }
    }

    async fn delete(&self, credential_ref: &CredentialRef) -> Result<(), credential::Error> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(FailOn::Delete) {
            return Err(credential::Error::Delete {
                source: api_error(500),
                credential: credential_ref.clone(),
            });
        }
        self.credentials.lock().unwrap().remove(&key(credential_ref));
        Ok(())
    }
}
