use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use wim_common::facts::CertificateFacts;
use x509_parser::oid_registry::{self, Oid};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Completes handshakes with any server certificate. The inventory records
/// expired and self-signed leaves too, so chain trust is not checked here;
/// handshake signatures still are.
#[derive(Debug)]
struct RecordAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for RecordAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub fn connector() -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(RecordAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[derive(Debug)]
pub struct TlsObservation {
    pub certificate: CertificateFacts,
    pub tls_version: Option<String>,
}

/// Handshakes with `ip:port` using `name` for SNI and parses the leaf.
pub async fn observe(
    connector: &TlsConnector,
    name: &str,
    ip: IpAddr,
    port: u16,
    limit: Duration,
) -> Result<TlsObservation> {
    let stream = timeout(limit, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .context("Connection timeout")?
        .context("Failed to connect")?;

    let server_name = ServerName::try_from(name.to_string()).context("Invalid server name")?;
    let tls_stream = timeout(limit, connector.connect(server_name, stream))
        .await
        .context("TLS handshake timeout")?
        .context("TLS handshake failed")?;

    let (_, connection) = tls_stream.get_ref();
    let tls_version = connection.protocol_version().map(version_name);
    let leaf = connection
        .peer_certificates()
        .and_then(|chain| chain.first())
        .context("Server sent no certificate")?;

    Ok(TlsObservation {
        certificate: parse_leaf(leaf.as_ref())?,
        tls_version,
    })
}

fn version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        other => format!("{other:?}"),
    }
}

pub fn parse_leaf(der: &[u8]) -> Result<CertificateFacts> {
    let (_, cert) = X509Certificate::from_der(der).context("Failed to parse certificate")?;

    let validity = cert.validity();
    let date_issued = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0);
    let date_expiration = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
        .context("Certificate expiry is out of range")?;

    let san = subject_alt_names(&cert);
    let subject_cn = first_common_name(cert.subject());
    let is_wildcard = subject_cn.as_deref().is_some_and(|cn| cn.starts_with("*."))
        || san.iter().any(|name| name.starts_with("*."));
    let pk = cert.public_key();

    Ok(CertificateFacts {
        hash_sha1: hex::encode(Sha1::digest(der)),
        hash_sha256: Some(hex::encode(Sha256::digest(der))),
        subject_dn: cert.subject().to_string(),
        subject_cn,
        subject_org: first_organization(cert.subject()),
        san,
        issuer_dn: cert.issuer().to_string(),
        issuer_cn: first_common_name(cert.issuer()),
        issuer_org: first_organization(cert.issuer()),
        date_issued,
        date_expiration,
        signing_algorithm: Some(oid_to_sig_name(&cert.signature_algorithm.algorithm)),
        key_type: Some(oid_to_key_name(&pk.algorithm.algorithm)),
        key_bitlength: key_bits(pk),
        is_wildcard,
        is_self_signed: cert.subject().as_raw() == cert.issuer().as_raw(),
    })
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn first_organization(name: &X509Name<'_>) -> Option<String> {
    name.iter_organization()
        .next()
        .and_then(|o| o.as_str().ok())
        .map(str::to_string)
}

fn subject_alt_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(ext)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    ext.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
            GeneralName::IPAddress(bytes) => ip_from_bytes(bytes).map(|ip| ip.to_string()),
            _ => None,
        })
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

fn oid_to_sig_name(oid: &Oid<'_>) -> String {
    let known = [
        (oid_registry::OID_PKCS1_SHA256WITHRSA, "SHA256withRSA"),
        (oid_registry::OID_PKCS1_SHA384WITHRSA, "SHA384withRSA"),
        (oid_registry::OID_PKCS1_SHA512WITHRSA, "SHA512withRSA"),
        (oid_registry::OID_PKCS1_SHA1WITHRSA, "SHA1withRSA"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA256, "ECDSAwithSHA256"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA384, "ECDSAwithSHA384"),
        (oid_registry::OID_SIG_ECDSA_WITH_SHA512, "ECDSAwithSHA512"),
        (oid_registry::OID_SIG_ED25519, "Ed25519"),
    ];
    known
        .iter()
        .find(|(known_oid, _)| known_oid == oid)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| oid.to_id_string())
}

fn oid_to_key_name(oid: &Oid<'_>) -> String {
    let known = [
        (oid_registry::OID_PKCS1_RSAENCRYPTION, "RSA"),
        (oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY, "EC"),
        (oid_registry::OID_SIG_ED25519, "Ed25519"),
    ];
    known
        .iter()
        .find(|(known_oid, _)| known_oid == oid)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| oid.to_id_string())
}

fn key_bits(pk: &SubjectPublicKeyInfo<'_>) -> Option<u32> {
    if pk.algorithm.algorithm == oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY {
        let curve = pk.algorithm.parameters.as_ref()?.as_oid().ok()?;
        return if curve == oid_registry::OID_EC_P256 {
            Some(256)
        } else if curve == oid_registry::OID_NIST_EC_P384 {
            Some(384)
        } else if curve == oid_registry::OID_NIST_EC_P521 {
            Some(521)
        } else {
            None
        };
    }
    match pk.parsed().ok()? {
        PublicKey::RSA(rsa) => u32::try_from(rsa.key_size()).ok(),
        _ if pk.algorithm.algorithm == oid_registry::OID_SIG_ED25519 => Some(256),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signature_oids_have_names() {
        assert_eq!(
            oid_to_sig_name(&oid_registry::OID_PKCS1_SHA256WITHRSA),
            "SHA256withRSA"
        );
        assert_eq!(
            oid_to_key_name(&oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY),
            "EC"
        );
    }

    #[test]
    fn unknown_oid_falls_back_to_dotted_form() {
        assert_eq!(
            oid_to_key_name(&oid_registry::OID_X509_COMMON_NAME),
            "2.5.4.3"
        );
    }

    #[test]
    fn san_ip_bytes() {
        assert_eq!(
            ip_from_bytes(&[192, 0, 2, 1]),
            Some("192.0.2.1".parse().unwrap())
        );
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn garbage_der_is_rejected() {
        assert!(parse_leaf(b"not a certificate").is_err());
    }

    #[test]
    fn tls_versions_are_readable() {
        assert_eq!(version_name(ProtocolVersion::TLSv1_3), "TLSv1.3");
    }

    #[test]
    fn connector_builds_with_ring_provider() {
        assert!(connector().is_ok());
    }
}
