//! User, settings and language types.

use chrono::{DateTime, Utc};

use super::{LanguageId, UserId};

/// User record
#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,         // Lowercased, unique
    pub password_hash: String, // PHC string (argon2id)
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a user
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Per-user preferences, created together with the user on registration
#[derive(Clone, Debug)]
pub struct UserSettings {
    pub user_id: UserId,
    pub language_id: LanguageId,
    pub updated_at: DateTime<Utc>,
}

/// Settings data for atomic user creation
#[derive(Clone, Debug)]
pub struct NewUserSettings {
    pub language_id: LanguageId,
}

/// Language reference row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Language {
    pub id: LanguageId,
    pub code: String,      // e.g. "en"
    pub i18n_code: String, // locale identifier used by templates, e.g. "en-US"
    pub name: String,
}
