//! Operator authentication gate for the layout calculator.
//!
//! `FaceAuthenticator` is the seam a face recognition service plugs into.
//! The terminal client has no face widget, so it ships `OperatorRegistry`: a
//! JSON file of enrolled operators, where "authenticating" means presenting
//! an enrolled name.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorCode {
    Camera,
    Network,
    NoFace,
    NotRecognized,
    Unavailable,
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthErrorCode::Camera => "camera",
            AuthErrorCode::Network => "network",
            AuthErrorCode::NoFace => "no-face",
            AuthErrorCode::NotRecognized => "not-recognized",
            AuthErrorCode::Unavailable => "unavailable",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Text shown to the operator, chosen by code.
    pub fn user_message(&self) -> &'static str {
        match self.code {
            AuthErrorCode::Camera => "Camera error. Check that a camera is available and allowed.",
            AuthErrorCode::Network => "Connection error. Check your network connection.",
            AuthErrorCode::NoFace => "No valid face was detected. Make sure you are well lit.",
            AuthErrorCode::NotRecognized => "Face not registered. Enroll first.",
            AuthErrorCode::Unavailable => "The authentication service is unavailable.",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EnrollOptions {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct AuthOptions {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserData {
    pub id: String,
    pub name: String,
    pub authenticated_at: DateTime<Utc>,
}

pub trait FaceAuthenticator {
    fn enroll(&self, options: EnrollOptions) -> Result<UserInfo, AuthError>;
    fn authenticate(&self, options: AuthOptions) -> Result<UserData, AuthError>;
}

/// Tracks whether an operator is logged in.
pub struct AuthGate<A> {
    authenticator: A,
    current: Option<UserData>,
}

impl<A: FaceAuthenticator> AuthGate<A> {
    pub fn new(authenticator: A) -> Self {
        Self {
            authenticator,
            current: None,
        }
    }

    pub fn login(&mut self, options: AuthOptions) -> Result<&UserData, AuthError> {
        let user = self.authenticator.authenticate(options)?;
        info!("operator {} authenticated", user.name);
        Ok(&*self.current.insert(user))
    }

    pub fn logout(&mut self) {
        if let Some(user) = self.current.take() {
            info!("operator {} logged out", user.name);
        }
    }

    pub fn current(&self) -> Option<&UserData> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    operators: BTreeMap<String, UserInfo>,
}

/// Enrolled operators persisted as JSON.
#[derive(Clone, Debug)]
pub struct OperatorRegistry {
    path: PathBuf,
}

impl OperatorRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RegistryFile, AuthError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RegistryFile::default()),
            Err(err) => return Err(unavailable(&self.path, err)),
        };
        serde_json::from_slice(&raw).map_err(|err| {
            AuthError::new(
                AuthErrorCode::Unavailable,
                format!("{} is not a valid registry: {err}", self.path.display()),
            )
        })
    }

    fn save(&self, file: &RegistryFile) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(file)
            .map_err(|err| AuthError::new(AuthErrorCode::Unavailable, err.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| unavailable(parent, err))?;
        }
        fs::write(&self.path, json).map_err(|err| unavailable(&self.path, err))
    }
}

fn unavailable(path: &Path, err: io::Error) -> AuthError {
    AuthError::new(
        AuthErrorCode::Unavailable,
        format!("{}: {err}", path.display()),
    )
}

fn normalized(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::new(
            AuthErrorCode::NoFace,
            "no operator identity was presented",
        ));
    }
    Ok(name.to_lowercase())
}

impl FaceAuthenticator for OperatorRegistry {
    fn enroll(&self, options: EnrollOptions) -> Result<UserInfo, AuthError> {
        let key = normalized(&options.name)?;
        let mut file = self.load()?;
        let now = Utc::now();
        let user = match file.operators.get(&key) {
            // Re-enrolling keeps the original id.
            Some(existing) => UserInfo {
                id: existing.id.clone(),
                name: options.name.trim().to_string(),
                email: options.email.or_else(|| existing.email.clone()),
                enrolled_at: now,
            },
            None => UserInfo {
                id: format!("op-{}", now.timestamp_millis()),
                name: options.name.trim().to_string(),
                email: options.email,
                enrolled_at: now,
            },
        };
        file.operators.insert(key, user.clone());
        self.save(&file)?;
        debug!("enrolled {} in {}", user.name, self.path.display());
        Ok(user)
    }

    fn authenticate(&self, options: AuthOptions) -> Result<UserData, AuthError> {
        let key = normalized(&options.name)?;
        let file = self.load()?;
        let user = file.operators.get(&key).ok_or_else(|| {
            AuthError::new(
                AuthErrorCode::NotRecognized,
                format!("{} is not enrolled", options.name.trim()),
            )
        })?;
        Ok(UserData {
            id: user.id.clone(),
            name: user.name.clone(),
            authenticated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, OperatorRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = OperatorRegistry::new(dir.path().join("nested/operators.json"));
        (dir, registry)
    }

    #[test]
    fn enrolled_operator_can_log_in() {
        let (_dir, registry) = registry();
        let info = registry
            .enroll(EnrollOptions {
                name: "Ana".into(),
                email: Some("ana@example.com".into()),
            })
            .unwrap();

        let mut gate = AuthGate::new(registry);
        assert!(!gate.is_authenticated());
        let user = gate
            .login(AuthOptions {
                name: " ana ".into(),
            })
            .unwrap();
        assert_eq!(user.id, info.id);
        assert_eq!(user.name, "Ana");
        assert!(gate.is_authenticated());

        gate.logout();
        assert!(gate.current().is_none());
    }

    #[test]
    fn unknown_operator_is_not_recognized() {
        let (_dir, registry) = registry();
        let mut gate = AuthGate::new(registry);
        let err = gate.login(AuthOptions { name: "bob".into() }).unwrap_err();
        assert_eq!(err.code, AuthErrorCode::NotRecognized);
        assert_eq!(err.user_message(), "Face not registered. Enroll first.");
        assert!(!gate.is_authenticated());
    }

    #[test]
    fn blank_identity_is_no_face() {
        let (_dir, registry) = registry();
        let err = registry
            .enroll(EnrollOptions {
                name: "   ".into(),
                email: None,
            })
            .unwrap_err();
        assert_eq!(err.code, AuthErrorCode::NoFace);
    }

    #[test]
    fn re_enrolling_keeps_the_id() {
        let (_dir, registry) = registry();
        let first = registry
            .enroll(EnrollOptions {
                name: "Ana".into(),
                email: Some("ana@example.com".into()),
            })
            .unwrap();
        let second = registry
            .enroll(EnrollOptions {
                name: "ANA".into(),
                email: None,
            })
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn corrupt_registry_is_unavailable() {
        let (_dir, registry) = registry();
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), b"not json").unwrap();
        let err = registry
            .authenticate(AuthOptions { name: "ana".into() })
            .unwrap_err();
        assert_eq!(err.code, AuthErrorCode::Unavailable);
    }

    #[test]
    fn messages_are_keyed_by_code() {
        let network = AuthError::new(AuthErrorCode::Network, "socket closed");
        assert!(network.user_message().contains("network"));
        let camera = AuthError::new(AuthErrorCode::Camera, "face camera missing");
        assert!(camera.user_message().starts_with("Camera error"));
    }
}
