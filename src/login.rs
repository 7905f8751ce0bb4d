use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{FileStorage, KeyValueStore, keys};

/// Registered account
///
/// Stored in `users.json` keyed by `id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Stable identity (UUID v4)
    pub id: String,

    /// Login name, unique across accounts
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Access token of the linked drive account, if any
    #[serde(default)]
    pub provider_token: Option<String>,

    /// Registration time
    pub created: SystemTime,
}

/// Profile blob kept under the `user` storage key
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    pub name: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: Some(user.id.clone()),
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

/// Login form data
#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Registration form data
#[derive(Debug, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,

    /// Display name; the local part of the email when left empty
    #[serde(default)]
    pub name: String,
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Id of the logged in user
    pub user_id: String,

    pub email: String,

    /// Drive access token carried by the session, once an account is linked
    pub provider_token: Option<String>,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Resolves a bearer token into the session it belongs to
pub trait IdentityProvider: Send + Sync {
    fn session(&self, token: &str) -> Option<Session>;
}

/// User registry and session table
///
/// Accounts live in `{database_dir}/users.json`; every user also gets a
/// directory `{database_dir}/{user_id}/` holding their key-value storage.
/// Sessions are kept in memory only.
pub struct UserDirectory {
    database_dir: PathBuf,
    session_ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
    users_lock: Mutex<()>,
}

const USERS_FILE: &str = "users.json";

impl UserDirectory {
    /// Open the registry, creating the database directory and an empty
    /// `users.json` when they don't exist yet.
    ///
    /// # Arguments
    /// * `database_dir` - Directory holding `users.json` and per-user data
    /// * `session_ttl` - How long a login stays valid
    ///
    /// # Errors
    /// * Returns an error if the directory or the users file cannot be created
    pub fn open(database_dir: impl Into<PathBuf>, session_ttl: Duration) -> Result<Self> {
        let database_dir = database_dir.into();
        create_dir_all(&database_dir)?;

        let users_path = database_dir.join(USERS_FILE);
        if !users_path.exists() {
            let mut file = File::create(&users_path)?;
            file.write_all(b"{}")?;
        }

        Ok(UserDirectory {
            database_dir,
            session_ttl,
            sessions: RwLock::new(HashMap::new()),
            users_lock: Mutex::new(()),
        })
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    /// Key-value storage of one user
    pub fn storage_for(&self, user_id: &str) -> FileStorage {
        FileStorage::for_user(&self.database_dir, user_id)
    }

    /// All registered users, keyed by id
    ///
    /// # Errors
    /// * Returns an error if the users file cannot be read or parsed
    pub fn get_users(&self) -> Result<HashMap<String, User>> {
        let path = self.database_dir.join(USERS_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_str(&contents)?)
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        fs::write(self.database_dir.join(USERS_FILE), json)?;
        Ok(())
    }

    /// Look a user up by email
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .get_users()?
            .into_values()
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    /// Register a new user
    ///
    /// The password is hashed with Argon2 before it is stored. The profile and
    /// the `isAuthenticated` marker are written to the new user's storage.
    ///
    /// # Errors
    /// * `MissingCredentials` if email or password is empty
    /// * `EmailTaken` if another account uses the email
    pub fn register(&self, registration: &Registration) -> Result<User> {
        let email = registration.email.trim();
        if email.is_empty() || registration.password.is_empty() {
            return Err(Error::MissingCredentials);
        }

        let user = {
            let _guard = self.users_lock.lock().map_err(|_| Error::Poisoned)?;
            let mut users = self.get_users()?;
            if users.values().any(|user| user.email.eq_ignore_ascii_case(email)) {
                return Err(Error::EmailTaken(email.to_string()));
            }

            let name = match registration.name.trim() {
                "" => default_display_name(email),
                name => name.to_string(),
            };

            let user = User {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
                name,
                password_hash: hash_password(&registration.password)?,
                provider_token: None,
                created: SystemTime::now(),
            };

            create_dir_all(self.database_dir.join(&user.id))?;
            users.insert(user.id.clone(), user.clone());
            self.save_users(&users)?;
            user
        };

        let storage = self.storage_for(&user.id);
        storage.set(keys::USER, &serde_json::to_string(&UserProfile::from(&user))?)?;
        storage.set(keys::IS_AUTHENTICATED, "true")?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Check an email/password pair
    ///
    /// # Errors
    /// * `InvalidCredentials` if the email is unknown or the password is wrong
    pub fn verify(&self, credentials: &Credentials) -> Result<User> {
        if credentials.email.trim().is_empty() || credentials.password.is_empty() {
            return Err(Error::MissingCredentials);
        }

        let user = self
            .find_by_email(credentials.email.trim())?
            .ok_or(Error::InvalidCredentials)?;

        if verify_password(&credentials.password, &user.password_hash)? {
            Ok(user)
        } else {
            Err(Error::InvalidCredentials)
        }
    }

    /// Verify credentials and open a session
    ///
    /// Marks the user's storage as authenticated and refreshes the profile
    /// blob.
    ///
    /// # Returns
    /// * The session token and the logged in user
    pub fn login(&self, credentials: &Credentials) -> Result<(String, User)> {
        let user = self.verify(credentials)?;
        let token = self.create_session(&user)?;

        let storage = self.storage_for(&user.id);
        storage.set(keys::USER, &serde_json::to_string(&UserProfile::from(&user))?)?;
        storage.set(keys::IS_AUTHENTICATED, "true")?;
        if user.provider_token.is_some() {
            storage.set(keys::GOOGLE_CONNECTED, "true")?;
        }

        info!("User {} logged in", user.id);
        Ok((token, user))
    }

    /// Create a new session for an authenticated user
    ///
    /// # Returns
    /// * A unique session token
    pub fn create_session(&self, user: &User) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user.id.clone(),
            email: user.email.clone(),
            provider_token: user.provider_token.clone(),
            expires_at: SystemTime::now() + self.session_ttl,
        };

        let mut sessions = self.sessions.write().map_err(|_| Error::Poisoned)?;
        sessions.retain(|_, session| session.expires_at > SystemTime::now());
        sessions.insert(token.clone(), session);

        Ok(token)
    }

    /// End a session and clear the login markers from the user's storage
    pub fn logout(&self, token: &str) -> Result<()> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| Error::Poisoned)?
            .remove(token);

        if let Some(session) = removed {
            let storage = self.storage_for(&session.user_id);
            storage.remove(keys::IS_AUTHENTICATED)?;
            storage.remove(keys::USER)?;
            storage.remove(keys::GOOGLE_CONNECTED)?;
            info!("User {} logged out", session.user_id);
        }

        Ok(())
    }

    /// Attach a drive access token to a user
    ///
    /// Live sessions of the user pick the token up immediately and the
    /// storage records the linkage under `googleConnected`.
    pub fn link_provider(&self, user_id: &str, provider_token: &str) -> Result<()> {
        {
            let _guard = self.users_lock.lock().map_err(|_| Error::Poisoned)?;
            let mut users = self.get_users()?;
            let user = users.get_mut(user_id).ok_or(Error::NotAuthenticated)?;
            user.provider_token = Some(provider_token.to_string());
            self.save_users(&users)?;
        }

        let mut sessions = self.sessions.write().map_err(|_| Error::Poisoned)?;
        for session in sessions.values_mut().filter(|s| s.user_id == user_id) {
            session.provider_token = Some(provider_token.to_string());
        }
        drop(sessions);

        self.storage_for(user_id).set(keys::GOOGLE_CONNECTED, "true")?;
        debug!("Linked drive account for user {}", user_id);
        Ok(())
    }

    /// Profile blob of a user, rebuilt from the registry when the storage
    /// has none
    pub fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let storage = self.storage_for(user_id);
        if let Some(blob) = storage.get(keys::USER)? {
            if let Ok(profile) = serde_json::from_str(&blob) {
                return Ok(Some(profile));
            }
        }

        let Some(user) = self.get_users()?.remove(user_id) else {
            return Ok(None);
        };
        let profile = UserProfile::from(&user);
        storage.set(keys::USER, &serde_json::to_string(&profile)?)?;
        storage.set(keys::IS_AUTHENTICATED, "true")?;
        Ok(Some(profile))
    }
}

impl IdentityProvider for UserDirectory {
    fn session(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().ok()?;
        sessions
            .get(token)
            .filter(|session| session.expires_at > SystemTime::now())
            .cloned()
    }
}

/// `alice` for `alice@example.com`
fn default_display_name(email: &str) -> String {
    match email.split('@').next() {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => "User".to_string(),
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
