use serde::{Deserialize, Serialize};
use stackable_cert_operator_crd_utils::CredentialRef;
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time},
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use strum::{AsRefStr, Display};

/// Finalizer attached to every [`CertificateRequest`] that the operator has seen.
pub const FINALIZER: &str = "certs.stackable.tech/finalizer";

/// Requests a self-signed TLS certificate, which is kept valid by the operator.
///
/// The certificate and its private key are written to the Secret referenced by `credentialRef`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "certs.stackable.tech",
    version = "v1alpha1",
    kind = "CertificateRequest",
    shortname = "certreq",
    namespaced,
    status = "CertificateRequestStatus",
    printcolumn = r#"{"name":"DNS Name","type":"string","jsonPath":".spec.dnsName"}"#,
    printcolumn = r#"{"name":"Not After","type":"date","jsonPath":".status.notAfter"}"#,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// The DNS name that the certificate is issued for, used as both common name and subject alternative name.
    pub dns_name: String,

    /// How long each issued certificate is valid for.
    ///
    /// Either a day count (such as `90d`) or a duration in `h`, `m` and `s` (such as `72h` or `1h30m`).
    pub validity: String,

    /// The Secret that the certificate (`tls.crt`) and private key (`tls.key`) are written to.
    pub credential_ref: CredentialRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Serial number of the current certificate, in decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<Time>,

    /// Common name of the certificate's issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr, Display)]
pub enum ConditionType {
    /// A certificate matching the request has been written to the credential Secret.
    Issued,
    /// The last reconciliation failed.
    ReconcileError,
    /// The last reconciliation completed.
    ReconcileSuccess,
}

impl CertificateRequestStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|cond| cond.type_ == type_.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use stackable_cert_operator_crd_utils::CredentialRef;

    use super::{CertificateRequest, CertificateRequestSpec};

    #[test]
    fn test_deserialization() {
        let input: &str = r#"
        apiVersion: certs.stackable.tech/v1alpha1
        kind: CertificateRequest
        metadata:
          name: web
          namespace: default
        spec:
          dnsName: web.example.com
          validity: 90d
          credentialRef:
            name: web-tls
            namespace: default
        "#;
        let request: CertificateRequest = serde_yaml::from_str(input).unwrap();
        assert_eq!(
            request.spec,
            CertificateRequestSpec {
                dns_name: "web.example.com".to_string(),
                validity: "90d".to_string(),
                credential_ref: CredentialRef::new("web-tls", "default"),
            }
        );
        assert_eq!(request.status, None);
    }

    #[test]
    fn test_status_deserialization() {
        let input: &str = r#"
        apiVersion: certs.stackable.tech/v1alpha1
        kind: CertificateRequest
        metadata:
          name: web
          namespace: default
        spec:
          dnsName: web.example.com
          validity: 72h
          credentialRef:
            name: web-tls
            namespace: default
        status:
          serialNumber: "1234"
          issuer: web.example.com
          notAfter: "2030-01-01T00:00:00Z"
          conditions:
          - type: Issued
            status: "True"
            reason: Success
            message: Successfully issued certificate
            lastTransitionTime: "2029-10-03T00:00:00Z"
            observedGeneration: 1
        "#;
        let request: CertificateRequest = serde_yaml::from_str(input).unwrap();
        let status = request.status.unwrap();
        assert_eq!(status.serial_number.as_deref(), Some("1234"));
        assert_eq!(status.not_before, None);
        let issued = status.condition(super::ConditionType::Issued).unwrap();
        assert_eq!(issued.status, "True");
        assert!(status
            .condition(super::ConditionType::ReconcileError)
            .is_none());
    }
}
