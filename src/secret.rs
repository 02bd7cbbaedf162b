use secrecy::{ExposeSecret, SecretString};

/// Passphrase held in zeroizing storage.
///
/// Only the terminal handshake and the clipboard collaborator read the value.
pub struct Passphrase {
    inner: SecretString,
}

impl Passphrase {
    pub fn new(passphrase: &str) -> Self {
        Self { inner: SecretString::from(passphrase.to_owned()) }
    }

    pub fn from_string(passphrase: String) -> Self {
        Self { inner: SecretString::from(passphrase) }
    }

    pub fn expose_secret(&self) -> &str {
        self.inner.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }

    /// Bytes written to the terminal for one entry, newline included.
    pub(crate) fn line(&self) -> Vec<u8> {
        let secret = self.inner.expose_secret();
        let mut line = Vec::with_capacity(secret.len() + 1);
        line.extend_from_slice(secret.as_bytes());
        line.push(b'\n');
        line
    }
}

impl From<SecretString> for Passphrase {
    fn from(secret: SecretString) -> Self {
        Self { inner: secret }
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}
