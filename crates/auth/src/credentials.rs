use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// The four tokens upstream cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(with = "secret_string")]
    pub id_token: SecretString,
    #[serde(with = "secret_string")]
    pub access_token: SecretString,
    #[serde(with = "secret_string")]
    pub refresh_token: SecretString,
    pub account_id: String,
}

/// On-disk shape: `{tokens: {...}, last_refresh: <timestamp>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialFile {
    pub tokens: Credentials,
    pub last_refresh: jiff::Timestamp,
}

/// `secrecy::SecretString` has no blanket `serde` impl (by design, to avoid
/// accidental secret exfiltration); expose it explicitly here since these
/// tokens are meant to round-trip through the on-disk JSON file.
mod secret_string {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
        secrecy::ExposeSecret::expose_secret(value).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
        Ok(SecretString::from(String::deserialize(de)?))
    }
}
