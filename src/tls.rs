use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Build a TLS acceptor from PEM files. Both paths or neither must be given;
/// `Ok(None)` means the server speaks plaintext.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both VETSCHED_TLS_CERT and VETSCHED_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {cert_path}"),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_when_unset() {
        assert!(matches!(load_tls_acceptor(None, None), Ok(None)));
    }

    #[test]
    fn half_configured_is_an_error() {
        let Err(err) = load_tls_acceptor(Some("cert.pem"), None) else {
            panic!("half-configured TLS accepted");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("VETSCHED_TLS_KEY"));
    }

    #[test]
    fn missing_cert_file() {
        let Err(err) =
            load_tls_acceptor(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"))
        else {
            panic!("missing cert file accepted");
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_cert_file() {
        let dir = std::env::temp_dir().join("vetsched_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("empty_cert.pem");
        std::fs::write(&cert, "").unwrap();
        let cert = cert.to_string_lossy().into_owned();
        let Err(err) = load_tls_acceptor(Some(&cert), Some(&cert)) else {
            panic!("empty cert file accepted");
        };
        assert!(err.to_string().contains("no certificates"));
    }
}
