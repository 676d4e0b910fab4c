//! Device identity and cloud credentials

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use state_store::{Model, ValidationError};

/// Claims carried by the device credential token
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Lab the device is registered to
    #[serde(default, alias = "labId")]
    pub lab_id: Option<String>,
}

impl CredentialClaims {
    /// Decode the claims section of a credential token
    ///
    /// The signature is not checked here; the broker authenticates the token
    /// when it is presented.
    pub fn decode(token: &str) -> jsonwebtoken::errors::Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        decode::<CredentialClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: Option<String>,
    pub connected: Option<bool>,
    pub token: Option<String>,
    /// Decoded from `token` on every commit that changes it
    pub claims: Option<CredentialClaims>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Lab registration id, if the credential carries one
    pub fn lab_id(&self) -> Option<&str> {
        self.claims.as_ref()?.lab_id.as_deref()
    }

    pub fn registered(&self) -> bool {
        self.lab_id().is_some()
    }

    /// Every field has been set at least once
    pub fn initialized(&self) -> bool {
        self.id.is_some()
            && self.name.is_some()
            && self.connected.is_some()
            && self.token.is_some()
            && self.claims.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.unwrap_or(false)
    }
}

impl Model for Device {
    const KEY: &'static str = "device";

    fn validate(&mut self, previous: Option<&Self>) -> Result<(), ValidationError> {
        if self.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ValidationError::new(Self::KEY, "id", "must not be empty"));
        }

        let token_changed = previous.map_or(true, |p| p.token != self.token);
        match &self.token {
            None => self.claims = None,
            Some(token) if token_changed || self.claims.is_none() => {
                let claims = CredentialClaims::decode(token).map_err(|e| {
                    ValidationError::new(Self::KEY, "token", format!("undecodable credential: {e}"))
                })?;
                tracing::debug!(
                    lab = claims.lab_id.as_deref().unwrap_or("-"),
                    "Credential claims decoded"
                );
                self.claims = Some(claims);
            }
            Some(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(lab_id: Option<&str>) -> String {
        let claims = CredentialClaims {
            sub: Some("device-1".into()),
            exp: Some(4_102_444_800),
            device_id: Some("device-1".into()),
            lab_id: lab_id.map(str::to_string),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"cloud-secret")).unwrap()
    }

    #[test]
    fn test_token_commit_decodes_claims() {
        let mut device = Device::new("device-1", "Incubator A");
        device.token = Some(token_for(Some("lab-42")));
        device.validate(None).unwrap();

        assert_eq!(device.lab_id(), Some("lab-42"));
        assert!(device.registered());
    }

    #[test]
    fn test_token_without_lab_is_unregistered() {
        let mut device = Device::new("device-1", "Incubator A");
        device.token = Some(token_for(None));
        device.validate(None).unwrap();

        assert!(device.claims.is_some());
        assert!(!device.registered());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let mut device = Device::new("device-1", "Incubator A");
        device.token = Some("not-a-jwt".into());
        let err = device.validate(None).unwrap_err();
        assert_eq!(err.field, "token");
    }

    #[test]
    fn test_clearing_token_clears_claims() {
        let mut previous = Device::new("device-1", "Incubator A");
        previous.token = Some(token_for(Some("lab-1")));
        previous.validate(None).unwrap();

        let mut next = previous.clone();
        next.token = None;
        next.validate(Some(&previous)).unwrap();
        assert!(next.claims.is_none());
        assert!(!next.registered());
    }

    #[test]
    fn test_initialized_requires_every_field() {
        let mut device = Device::new("device-1", "Incubator A");
        assert!(!device.initialized());

        device.token = Some(token_for(Some("lab-1")));
        device.validate(None).unwrap();
        assert!(!device.initialized());

        device.connected = Some(false);
        assert!(device.initialized());
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut device = Device::new("  ", "Incubator A");
        assert_eq!(device.validate(None).unwrap_err().field, "id");
    }
}
