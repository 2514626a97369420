//! Issues self-signed TLS certificates, and reads back the ones that have been issued before

use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    conf::{Conf, ConfMethod},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        extension::{
            BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
            SubjectKeyIdentifier,
        },
        X509Builder, X509NameBuilder, X509NameRef, X509,
    },
};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use time::OffsetDateTime;

use crate::{
    config::{ControllerConfig, MIN_KEY_STRENGTH},
    credential::Credential,
    crd::CertificateRequestSpec,
    duration,
    utils::{asn1time_to_offsetdatetime, Asn1TimeParseError, Unloggable},
};

/// Organization recorded in the subject of every issued certificate.
pub const ORGANIZATION: &str = "Stackable cert-operator self-signed";

const SERIAL_NUMBER_BITS: i32 = 128;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid validity period"))]
    InvalidValidity { source: duration::Error },

    #[snafu(display("validity period of {validity:?} ends too far in the future"))]
    ValidityOutOfRange { validity: String },

    #[snafu(display("refusing to generate a {bits} bit key, at least {MIN_KEY_STRENGTH} bits are required"))]
    KeyTooWeak { bits: u32 },

    #[snafu(display("failed to generate certificate key"))]
    GenerateKey { source: openssl::error::ErrorStack },

    #[snafu(display("failed to build certificate template"))]
    BuildTemplate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to sign certificate"))]
    Sign { source: openssl::error::ErrorStack },

    #[snafu(display("failed to serialize {tpe:?}"))]
    Serialize {
        source: openssl::error::ErrorStack,
        tpe: PemType,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum PemType {
    Certificate,
    PrivateKey,
}

/// Generates a key pair and a certificate for it, signed by the key itself.
pub fn issue(spec: &CertificateRequestSpec, config: &ControllerConfig) -> Result<Credential> {
    issue_at(spec, config, OffsetDateTime::now_utc())
}

/// Like [`issue`], but with the validity period starting at `now`.
pub fn issue_at(
    spec: &CertificateRequestSpec,
    config: &ControllerConfig,
    now: OffsetDateTime,
) -> Result<Credential> {
    let validity = duration::parse(&spec.validity).context(InvalidValiditySnafu)?;
    let not_after = time::Duration::try_from(validity)
        .ok()
        .and_then(|validity| now.checked_add(validity))
        .context(ValidityOutOfRangeSnafu {
            validity: &spec.validity,
        })?;

    ensure!(
        config.key_strength >= MIN_KEY_STRENGTH,
        KeyTooWeakSnafu {
            bits: config.key_strength
        }
    );
    let key = Rsa::generate(config.key_strength)
        .and_then(PKey::try_from)
        .context(GenerateKeySnafu)?;

    let mut x509 = X509Builder::new().context(BuildTemplateSnafu)?;
    build_template(&mut x509, &key, &spec.dns_name, now, not_after).context(BuildTemplateSnafu)?;
    x509.sign(&key, MessageDigest::sha256()).context(SignSnafu)?;
    let cert = x509.build();

    Ok(Credential {
        certificate_pem: cert.to_pem().context(SerializeSnafu {
            tpe: PemType::Certificate,
        })?,
        private_key_pem: Unloggable(key.private_key_to_pem_pkcs8().context(SerializeSnafu {
            tpe: PemType::PrivateKey,
        })?),
    })
}

fn build_template(
    x509: &mut X509Builder,
    key: &PKey<Private>,
    dns_name: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<(), openssl::error::ErrorStack> {
    let subject_name = X509NameBuilder::new()
        .and_then(|mut name| {
            name.append_entry_by_nid(Nid::ORGANIZATIONNAME, ORGANIZATION)?;
            name.append_entry_by_nid(Nid::COMMONNAME, dns_name)?;
            Ok(name)
        })?
        .build();
    let conf = Conf::new(ConfMethod::default())?;
    x509.set_subject_name(&subject_name)?;
    x509.set_issuer_name(&subject_name)?;
    x509.set_not_before(Asn1Time::from_unix(not_before.unix_timestamp())?.as_ref())?;
    x509.set_not_after(Asn1Time::from_unix(not_after.unix_timestamp())?.as_ref())?;
    x509.set_pubkey(key)?;
    x509.set_version(
        3 - 1, // zero-indexed
    )?;
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    x509.set_serial_number(Asn1Integer::from_bn(&serial)?.as_ref())?;
    let ctx = x509.x509v3_context(None, Some(&conf));
    let exts = [
        BasicConstraints::new().critical().build()?,
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
        ExtendedKeyUsage::new().server_auth().build()?,
        SubjectAlternativeName::new().dns(dns_name).build(&ctx)?,
        SubjectKeyIdentifier::new().build(&ctx)?,
    ];
    for ext in exts {
        x509.append_extension(ext)?;
    }
    Ok(())
}

#[derive(Debug, Snafu)]
pub enum InspectError {
    #[snafu(display("failed to decode certificate"))]
    Decode { source: openssl::error::ErrorStack },

    #[snafu(display("failed to read {field}"))]
    ReadField {
        source: openssl::error::ErrorStack,
        field: &'static str,
    },

    #[snafu(display("certificate has no common name"))]
    NoCommonName,

    #[snafu(display("failed to parse validity period"))]
    ParseValidity { source: Asn1TimeParseError },

    #[snafu(display("failed to decode private key"))]
    DecodeKey { source: openssl::error::ErrorStack },

    #[snafu(display("private key does not belong to the certificate"))]
    KeyMismatch,
}

/// The parts of an issued certificate that the operator cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: String,
    /// Decimal representation of the serial number.
    pub serial_number: String,
    /// Common name of the issuer.
    pub issuer: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl CertificateInfo {
    /// Reads the first certificate in `pem`.
    pub fn from_pem(pem: &[u8]) -> Result<Self, InspectError> {
        let cert = X509::from_pem(pem).context(DecodeSnafu)?;
        Ok(Self {
            common_name: common_name(cert.subject_name())
                .context(ReadFieldSnafu { field: "subject" })?
                .context(NoCommonNameSnafu)?,
            serial_number: cert
                .serial_number()
                .to_bn()
                .and_then(|serial| serial.to_dec_str())
                .context(ReadFieldSnafu {
                    field: "serial number",
                })?
                .to_string(),
            issuer: common_name(cert.issuer_name())
                .context(ReadFieldSnafu { field: "issuer" })?
                .unwrap_or_default(),
            not_before: asn1time_to_offsetdatetime(cert.not_before())
                .context(ParseValiditySnafu)?,
            not_after: asn1time_to_offsetdatetime(cert.not_after()).context(ParseValiditySnafu)?,
        })
    }
}

/// Checks that `credential` holds a certificate together with the private key it was issued for.
pub fn check_key_pair(credential: &Credential) -> Result<(), InspectError> {
    let cert = X509::from_pem(&credential.certificate_pem).context(DecodeSnafu)?;
    let key = PKey::private_key_from_pem(&credential.private_key_pem).context(DecodeKeySnafu)?;
    let public_key = cert.public_key().context(ReadFieldSnafu {
        field: "public key",
    })?;
    ensure!(public_key.public_eq(&key), KeyMismatchSnafu);
    Ok(())
}

fn common_name(name: &X509NameRef) -> Result<Option<String>, openssl::error::ErrorStack> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|entry| entry.data().as_utf8().map(|cn| cn.to_string()))
        .transpose()
}
