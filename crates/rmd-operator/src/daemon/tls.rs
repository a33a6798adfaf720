//! Mutual TLS configuration for the daemon client.

use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::client::danger::ServerCertVerified;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::CipherSuite;
use rustls::ClientConfig;
use rustls::DigitallySignedStruct;
use rustls::RootCertStore;
use rustls::SignatureScheme;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::ServerName;
use rustls_pki_types::UnixTime;
use x509_parser::public_key::PublicKey;

use super::DaemonError;
use super::DaemonResult;
use crate::consts::DEFAULT_CA_PATH;
use crate::consts::DEFAULT_CERT_PATH;
use crate::consts::DEFAULT_KEY_PATH;
use crate::consts::DAEMON_SERVER_NAME;

const MIN_RSA_BITS: usize = 2048;
const MIN_EC_BITS: usize = 256;

const PINNED_CIPHER_SUITES: [CipherSuite; 6] = [
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

/// Locations of the client certificate, its key and the CA bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            cert: PathBuf::from(DEFAULT_CERT_PATH),
            key: PathBuf::from(DEFAULT_KEY_PATH),
            ca: PathBuf::from(DEFAULT_CA_PATH),
        }
    }
}

fn tls_error(message: impl Into<String>) -> DaemonError {
    DaemonError::Tls {
        message: message.into(),
    }
}

/// Build the rustls client configuration: TLS 1.2 minimum, pinned cipher
/// suites, client authentication and a server name fixed to the daemon's
/// identity regardless of the address dialed.
pub(super) fn client_config(paths: &TlsPaths) -> DaemonResult<ClientConfig> {
    let certs = CertificateDer::pem_file_iter(&paths.cert)
        .map_err(|e| Report::new(tls_error(format!("reading {}: {e:?}", paths.cert.display()))))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Report::new(tls_error(format!("parsing {}: {e:?}", paths.cert.display()))))?;
    let leaf = certs
        .first()
        .ok_or_else(|| Report::new(tls_error("client certificate file holds no certificate")))?;
    check_key_strength(leaf)?;

    let key = PrivateKeyDer::from_pem_file(&paths.key)
        .map_err(|e| Report::new(tls_error(format!("reading {}: {e:?}", paths.key.display()))))?;

    let mut roots = RootCertStore::empty();
    for ca in CertificateDer::pem_file_iter(&paths.ca)
        .map_err(|e| Report::new(tls_error(format!("reading {}: {e:?}", paths.ca.display()))))?
    {
        let ca =
            ca.map_err(|e| Report::new(tls_error(format!("parsing {}: {e:?}", paths.ca.display()))))?;
        roots
            .add(ca)
            .change_context_lazy(|| tls_error("invalid CA certificate"))?;
    }

    let mut provider = rustls::crypto::ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| PINNED_CIPHER_SUITES.contains(&suite.suite()));
    let provider = Arc::new(provider);

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .change_context_lazy(|| tls_error("building server verifier"))?;
    let server_name = ServerName::try_from(DAEMON_SERVER_NAME)
        .change_context_lazy(|| tls_error("invalid daemon server name"))?;
    let verifier = ServerNameOverride { inner, server_name };

    ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .change_context_lazy(|| tls_error("selecting protocol versions"))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(certs, key)
        .change_context_lazy(|| tls_error("loading client certificate and key"))
}

/// Reject key pairs below RSA-2048 or a 256-bit ECDSA curve.
fn check_key_strength(cert: &CertificateDer<'_>) -> DaemonResult<()> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| Report::new(tls_error(format!("parsing client certificate: {e}"))))?;
    let public_key = parsed
        .public_key()
        .parsed()
        .map_err(|e| Report::new(tls_error(format!("parsing client public key: {e}"))))?;

    let (kind, bits, min) = match public_key {
        PublicKey::RSA(rsa) => ("RSA", rsa.key_size(), MIN_RSA_BITS),
        PublicKey::EC(point) => ("ECDSA", point.key_size(), MIN_EC_BITS),
        _ => return Err(Report::new(tls_error("unsupported client key type"))),
    };
    if bits < min {
        return Err(Report::new(tls_error(format!(
            "{kind} key of {bits} bits is below the {min}-bit minimum"
        ))));
    }
    Ok(())
}

/// Verifies the server chain against a fixed name instead of the dialed host,
/// since daemons are addressed by pod IP.
#[derive(Debug)]
struct ServerNameOverride {
    inner: Arc<WebPkiServerVerifier>,
    server_name: ServerName<'static>,
}

impl ServerCertVerifier for ServerNameOverride {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            &self.server_name,
            ocsp_response,
            now,
        )
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
