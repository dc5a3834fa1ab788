use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// PEM encoded credential material for mutual TLS.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsBundle {
    ca_pem: String,
    cert_pem: String,
    key_pem: String,
}

impl TlsBundle {
    /// Reads the CA certificate, client certificate and client key files.
    pub fn load(ca_path: &Path, cert_path: &Path, key_path: &Path) -> Result<Self> {
        Self::from_pem(
            read_pem(ca_path)?,
            read_pem(cert_path)?,
            read_pem(key_path)?,
        )
    }

    pub fn from_pem(
        ca_pem: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Result<Self> {
        let bundle = Self {
            ca_pem: ca_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        };

        for (material, pem) in [
            ("CA certificate", &bundle.ca_pem),
            ("client certificate", &bundle.cert_pem),
            ("client key", &bundle.key_pem),
        ] {
            if !contains_pem_block(pem) {
                return Err(Error::InvalidCredentials {
                    material,
                    message: "no PEM block found".to_string(),
                });
            }
        }

        Ok(bundle)
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }
}

impl fmt::Debug for TlsBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsBundle")
            .field("ca_pem", &format_args!("<{} bytes>", self.ca_pem.len()))
            .field("cert_pem", &format_args!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

fn read_pem(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::Credentials {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if !contains_pem_block(&contents) {
        return Err(Error::Credentials {
            path: path.to_path_buf(),
            message: "no PEM block found".to_string(),
        });
    }

    debug!("Loaded PEM material from {:?}", path);
    Ok(contents)
}

fn contains_pem_block(contents: &str) -> bool {
    contents.contains("-----BEGIN ") && contents.contains("-----END ")
}

/// Where and how to reach the broker cluster.
///
/// Built once at startup and shared by reference; there is no way to mutate
/// it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    host: String,
    port: u16,
    client_id: String,
    tls: Arc<TlsBundle>,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: TlsBundle) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "alert-publisher".to_string(),
            tls: Arc::new(tls),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn tls(&self) -> &TlsBundle {
        &self.tls
    }

    /// `host:port`, as used for `bootstrap.servers`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
