//! Login, per-request authentication and logout.
//!
//! Two credentials travel as cookies: a short-lived signed access token that authorizes
//! the request it rides on, and an optional long-lived session secret that only
//! authorizes minting a new access token.

use portier_storage::{StoreError, UserId};
use tracing::{debug, info};
use uuid::Uuid;

use super::{normalize_email, verify_password, HandlerError, ResponseDecoration};
use crate::server::Portier;
use crate::sessions::ClientMeta;

/// Cookies presented by a request.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub session_secret: Option<String>,
}

fn access_cookie(
    server: &Portier,
    user_id: &UserId,
    decoration: &mut ResponseDecoration,
) -> Result<(), HandlerError> {
    let token = server
        .signer
        .sign(&user_id.0.to_string(), server.clock.now())?;
    decoration.set_access(token, server.signer.ttl());
    Ok(())
}

/// Check the password and hand out credentials. A session is opened only with
/// `remember_me`; otherwise the caller gets an access token alone.
pub async fn login(
    server: &Portier,
    email: &str,
    password: &str,
    remember_me: bool,
    meta: &ClientMeta,
) -> Result<ResponseDecoration, HandlerError> {
    let email = normalize_email(email).map_err(|_| HandlerError::InvalidCredentials)?;
    let user = match server.store.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(HandlerError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };
    if !verify_password(password, &user.password_hash).await? {
        return Err(HandlerError::InvalidCredentials);
    }

    let mut decoration = ResponseDecoration::for_user(user.id);
    if remember_me {
        let secret = server.sessions.issue(&user.id, meta).await?;
        decoration.set_session(secret, server.sessions.ttl());
    }
    access_cookie(server, &user.id, &mut decoration)?;

    info!(user_id = %user.id.0, remember_me, "user logged in");
    Ok(decoration)
}

/// Resolve the caller of a request.
///
/// A valid access token identifies the user. A session secret identifies the user when
/// the access token is missing or stale; a live session is slid forward and a fresh
/// access token minted. Dead credentials are cleared. An anonymous caller gets a
/// decoration with no `user_id`, never an error.
pub async fn authenticate(
    server: &Portier,
    credentials: &Credentials,
) -> Result<ResponseDecoration, HandlerError> {
    let mut decoration = ResponseDecoration::default();

    let mut user_id = None;
    if let Some(token) = &credentials.access_token {
        match server.signer.verify(token, server.clock.now()) {
            Ok(claims) => match Uuid::parse_str(&claims.sub) {
                Ok(id) => user_id = Some(UserId(id)),
                Err(_) => decoration.clear_access(),
            },
            Err(e) => {
                debug!(error = %e, "access token rejected");
                decoration.clear_access();
            }
        }
    }

    if let Some(secret) = &credentials.session_secret {
        let owner = match user_id {
            Some(id) => Some(id),
            None => match server.sessions.authenticate(secret).await {
                Ok(id) => Some(id),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
        };

        match owner {
            Some(owner) if server.sessions.refresh(&owner, secret).await? => {
                decoration.set_session(secret.clone(), server.sessions.ttl());
                access_cookie(server, &owner, &mut decoration)?;
                user_id = Some(owner);
            }
            _ => decoration.clear_session(),
        }
    }

    decoration.user_id = user_id;
    Ok(decoration)
}

/// End the session behind `session_secret` and clear both cookies. Access tokens already
/// issued stay valid until they expire.
pub async fn logout(
    server: &Portier,
    user_id: &UserId,
    session_secret: Option<&str>,
) -> Result<ResponseDecoration, HandlerError> {
    if let Some(secret) = session_secret {
        server.sessions.revoke(user_id, secret).await?;
    }

    let mut decoration = ResponseDecoration::default();
    decoration.clear_access();
    decoration.clear_session();

    info!(user_id = %user_id.0, "user logged out");
    Ok(decoration)
}
