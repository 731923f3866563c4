//! Account preferences and the signed-in user's profile.

use chrono::{DateTime, Utc};
use portier_storage::{Language, StoreError, UserId, UserSettings};
use tracing::{debug, info};

use super::HandlerError;
use crate::server::Portier;

/// Partial update; `None` leaves a field as it is.
#[derive(Clone, Debug, Default)]
pub struct SettingsUpdate {
    /// Language code, e.g. "pl".
    pub language: Option<String>,
}

/// What the signed-in user sees about their own account.
#[derive(Clone, Debug)]
pub struct Profile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub language: Language,
}

pub async fn update_settings(
    server: &Portier,
    user_id: &UserId,
    update: SettingsUpdate,
) -> Result<UserSettings, HandlerError> {
    let settings = server.store.get_user_settings(user_id).await?;

    let Some(code) = update.language else {
        return Ok(settings);
    };
    let language = match server.store.get_language_by_code(code.trim()).await {
        Ok(language) => language,
        Err(StoreError::NotFound) => {
            return Err(HandlerError::InvalidInput(format!("unknown language: {}", code)))
        }
        Err(e) => return Err(e.into()),
    };
    if language.id == settings.language_id {
        debug!(user_id = %user_id.0, "settings unchanged");
        return Ok(settings);
    }

    server
        .store
        .update_user_settings(user_id, language.id)
        .await?;
    info!(user_id = %user_id.0, language = %language.code, "settings updated");
    Ok(server.store.get_user_settings(user_id).await?)
}

pub async fn me(server: &Portier, user_id: &UserId) -> Result<Profile, HandlerError> {
    let user = server.store.get_user_by_id(user_id).await?;
    let settings = server.store.get_user_settings(user_id).await?;
    let language = server.store.get_language(&settings.language_id).await?;

    Ok(Profile {
        id: user.id,
        name: user.name,
        email: user.email,
        confirmed_at: user.confirmed_at,
        language,
    })
}
