use chrono::{DateTime, Utc};
use portier_storage::{
    Clock, ConfirmationToken, CreateSessionParams, CreateTokenParams, Language, LanguageId,
    NewUser, NewUserSettings, SessionId, Store, StoreError, SystemClock, TokenId, TokenStatus,
    TokenType, User, UserId, UserSession, UserSettings,
};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const ACTIVE_STATUSES: &str = "('NEW','PROCESSING')";
const TERMINAL_STATUSES: &str = "('CONSUMED','CANCELED','FAILED')";

pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source (tests drive expiry with a `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }
}

// ───────────────────────────────────── Row mapping ─────────────────────────────────────

fn ts(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp: {}", secs)))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(s).map_err(|e| StoreError::Backend(e.to_string()))
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn unique_or_backend(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: String,
    token: String,
    owner_user_id: Option<String>,
    #[sqlx(rename = "type")]
    token_type: String,
    payload: String,
    subject: Option<String>,
    status: String,
    expires_at: i64,
    status_changed_at: i64,
    created_at: i64,
}

const TOKEN_COLUMNS: &str = "id, token, owner_user_id, type, payload, subject, status, \
     expires_at, status_changed_at, created_at";

impl TryFrom<TokenRow> for ConfirmationToken {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(ConfirmationToken {
            id: TokenId(parse_uuid(&row.id)?),
            token: row.token,
            owner_user_id: row
                .owner_user_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?
                .map(UserId),
            token_type: row
                .token_type
                .parse::<TokenType>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            payload: serde_json::from_str(&row.payload)
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            subject: row.subject,
            status: row
                .status
                .parse::<TokenStatus>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            expires_at: ts(row.expires_at)?,
            status_changed_at: ts(row.status_changed_at)?,
            created_at: ts(row.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    token_hash: String,
    created_at: i64,
    expires_at: i64,
    refreshed_at: i64,
    revoked_at: Option<i64>,
    user_agent: String,
    client_ip: String,
}

const SESSION_COLUMNS: &str = "id, user_id, token_hash, created_at, expires_at, refreshed_at, \
     revoked_at, user_agent, client_ip";

impl TryFrom<SessionRow> for UserSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(UserSession {
            id: SessionId(parse_uuid(&row.id)?),
            user_id: UserId(parse_uuid(&row.user_id)?),
            token_hash: row.token_hash,
            created_at: ts(row.created_at)?,
            expires_at: ts(row.expires_at)?,
            refreshed_at: ts(row.refreshed_at)?,
            revoked_at: row.revoked_at.map(ts).transpose()?,
            user_agent: row.user_agent,
            client_ip: row.client_ip,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    confirmed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, confirmed_at, created_at, updated_at";

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(parse_uuid(&row.id)?),
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            confirmed_at: row.confirmed_at.map(ts).transpose()?,
            created_at: ts(row.created_at)?,
            updated_at: ts(row.updated_at)?,
        })
    }
}

fn language((id, code, i18n_code, name): (i64, String, String, String)) -> Language {
    Language {
        id: LanguageId(id),
        code,
        i18n_code,
        name,
    }
}

/// `$.field` JSON path; only plain identifiers are accepted.
fn json_path(field: &str) -> Result<String, StoreError> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::Backend(format!("invalid payload field: {}", field)));
    }
    Ok(format!("$.{}", field))
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────── Confirmation Tokens ─────────────────────────────

    async fn create_token(
        &self,
        params: &CreateTokenParams,
    ) -> Result<ConfirmationToken, StoreError> {
        let now = self.now();
        let id = Uuid::now_v7();
        let payload =
            serde_json::to_string(&params.payload).map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(subject) = &params.subject {
            // Expired links must not keep holding the subject.
            sqlx::query(&format!(
                "UPDATE confirmation_tokens SET status='CANCELED', status_changed_at=?
                 WHERE subject=? AND status IN {} AND expires_at <= ?",
                ACTIVE_STATUSES
            ))
            .bind(now)
            .bind(subject)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        sqlx::query(
            "INSERT INTO confirmation_tokens
                (id, token, owner_user_id, type, payload, subject, status,
                 expires_at, status_changed_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'NEW', ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&params.token)
        .bind(params.owner_user_id.map(|u| u.0.to_string()))
        .bind(params.token_type.as_str())
        .bind(&payload)
        .bind(&params.subject)
        .bind(params.expires_at.timestamp())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let s = e.to_string();
            if s.contains("confirmation_tokens.subject") {
                StoreError::AlreadyExists
            } else if s.contains("UNIQUE") {
                // bearer value collision; the caller regenerates
                StoreError::Conflict
            } else {
                StoreError::Backend(s)
            }
        })?;

        tx.commit().await.map_err(backend)?;

        Ok(ConfirmationToken {
            id: TokenId(id),
            token: params.token.clone(),
            owner_user_id: params.owner_user_id,
            token_type: params.token_type,
            payload: params.payload.clone(),
            subject: params.subject.clone(),
            status: TokenStatus::New,
            expires_at: ts(params.expires_at.timestamp())?,
            status_changed_at: ts(now)?,
            created_at: ts(now)?,
        })
    }

    async fn exists_active_token(
        &self,
        token_type: Option<TokenType>,
        payload_field: &str,
        value: &str,
        exclude_owner: Option<UserId>,
    ) -> Result<bool, StoreError> {
        let path = json_path(payload_field)?;
        let mut sql = format!(
            "SELECT EXISTS(SELECT 1 FROM confirmation_tokens
             WHERE status IN {} AND expires_at > ? AND json_extract(payload, ?) = ?",
            ACTIVE_STATUSES
        );
        if token_type.is_some() {
            sql.push_str(" AND type = ?");
        }
        if exclude_owner.is_some() {
            sql.push_str(" AND (owner_user_id IS NULL OR owner_user_id != ?)");
        }
        sql.push(')');

        let mut query = sqlx::query_as::<_, (i64,)>(&sql)
            .bind(self.now())
            .bind(path)
            .bind(value);
        if let Some(t) = token_type {
            query = query.bind(t.as_str());
        }
        if let Some(owner) = exclude_owner {
            query = query.bind(owner.0.to_string());
        }
        let (exists,) = query.fetch_one(&self.pool).await.map_err(backend)?;
        Ok(exists != 0)
    }

    async fn get_active_token(
        &self,
        token: &str,
        token_type: Option<TokenType>,
    ) -> Result<ConfirmationToken, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM confirmation_tokens
             WHERE token = ? AND status IN {} AND expires_at > ?",
            TOKEN_COLUMNS, ACTIVE_STATUSES
        );
        if token_type.is_some() {
            sql.push_str(" AND type = ?");
        }

        let mut query = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(token)
            .bind(self.now());
        if let Some(t) = token_type {
            query = query.bind(t.as_str());
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }

    async fn get_token(&self, token: &str) -> Result<ConfirmationToken, StoreError> {
        sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {} FROM confirmation_tokens WHERE token = ?",
            TOKEN_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .try_into()
    }

    async fn consume_token(&self, token: &str) -> Result<(), StoreError> {
        let res = sqlx::query(&format!(
            "UPDATE confirmation_tokens SET status='CONSUMED', status_changed_at=?
             WHERE token=? AND status IN {}",
            ACTIVE_STATUSES
        ))
        .bind(self.now())
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if res.rows_affected() > 0 {
            return Ok(());
        }

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM confirmation_tokens WHERE token=?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match status {
            None => Err(StoreError::NotFound),
            Some((s,)) if s == TokenStatus::Consumed.as_str() => Ok(()),
            // canceled/failed tokens are terminal
            Some(_) => Err(StoreError::Conflict),
        }
    }

    async fn cancel_active_tokens(
        &self,
        owner: &UserId,
        token_type: TokenType,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(&format!(
            "UPDATE confirmation_tokens SET status='CANCELED', status_changed_at=?
             WHERE owner_user_id=? AND type=? AND status IN {}",
            ACTIVE_STATUSES
        ))
        .bind(self.now())
        .bind(owner.0.to_string())
        .bind(token_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected())
    }

    async fn cleanup_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = before.timestamp();
        let res = sqlx::query(&format!(
            "DELETE FROM confirmation_tokens
             WHERE expires_at < ? OR (status IN {} AND status_changed_at < ?)",
            TERMINAL_STATUSES
        ))
        .bind(cutoff)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected())
    }

    // ──────────────────────────────────── Sessions ─────────────────────────────────────

    async fn create_session(
        &self,
        params: &CreateSessionParams,
    ) -> Result<UserSession, StoreError> {
        let id = Uuid::now_v7();
        let now = self.now();
        sqlx::query(
            "INSERT INTO user_sessions
                (id, user_id, token_hash, created_at, expires_at, refreshed_at, user_agent, client_ip)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(params.user_id.0.to_string())
        .bind(&params.token_hash)
        .bind(now)
        .bind(params.expires_at.timestamp())
        .bind(now)
        .bind(&params.user_agent)
        .bind(&params.client_ip)
        .execute(&self.pool)
        .await
        .map_err(unique_or_backend)?;

        Ok(UserSession {
            id: SessionId(id),
            user_id: params.user_id,
            token_hash: params.token_hash.clone(),
            created_at: ts(now)?,
            expires_at: ts(params.expires_at.timestamp())?,
            refreshed_at: ts(now)?,
            revoked_at: None,
            user_agent: params.user_agent.clone(),
            client_ip: params.client_ip.clone(),
        })
    }

    async fn get_active_session(&self, token_hash: &str) -> Result<UserSession, StoreError> {
        sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM user_sessions
             WHERE token_hash=? AND revoked_at IS NULL AND expires_at > ?",
            SESSION_COLUMNS
        ))
        .bind(token_hash)
        .bind(self.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .try_into()
    }

    async fn get_session(&self, token_hash: &str) -> Result<UserSession, StoreError> {
        sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM user_sessions WHERE token_hash=?",
            SESSION_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?
        .try_into()
    }

    async fn refresh_session(
        &self,
        user_id: &UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let now = self.now();
        let res = sqlx::query(
            "UPDATE user_sessions SET expires_at=?, refreshed_at=?
             WHERE user_id=? AND token_hash=? AND revoked_at IS NULL AND expires_at > ?",
        )
        .bind(expires_at.timestamp())
        .bind(now)
        .bind(user_id.0.to_string())
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected() > 0)
    }

    async fn revoke_session(&self, user_id: &UserId, token_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE user_sessions SET revoked_at=?
             WHERE user_id=? AND token_hash=? AND revoked_at IS NULL",
        )
        .bind(self.now())
        .bind(user_id.0.to_string())
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn revoke_user_sessions(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let res = sqlx::query(
            "UPDATE user_sessions SET revoked_at=? WHERE user_id=? AND revoked_at IS NULL",
        )
        .bind(self.now())
        .bind(user_id.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected())
    }

    async fn list_active_sessions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<UserSession>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM user_sessions
             WHERE user_id=? AND revoked_at IS NULL AND expires_at > ?
             ORDER BY created_at DESC",
            SESSION_COLUMNS
        ))
        .bind(user_id.0.to_string())
        .bind(self.now())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(UserSession::try_from).collect()
    }

    async fn cleanup_sessions(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = before.timestamp();
        let res = sqlx::query(
            "DELETE FROM user_sessions
             WHERE expires_at < ? OR (revoked_at IS NOT NULL AND revoked_at < ?)",
        )
        .bind(cutoff)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected())
    }

    // ───────────────────────────────────── Users ───────────────────────────────────────

    async fn finalize_registration(
        &self,
        user: &NewUser,
        settings: &NewUserSettings,
    ) -> Result<UserId, StoreError> {
        let user_id = Uuid::now_v7();
        let now = self.now();

        // Dropping `tx` on any early return rolls both inserts back.
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, confirmed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.confirmed_at.map(|t| t.timestamp()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(unique_or_backend)?;

        sqlx::query("INSERT INTO user_settings (user_id, language_id, updated_at) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(settings.language_id.0)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(UserId(user_id))
    }

    async fn get_user_by_id(&self, user_id: &UserId) -> Result<User, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id=?", USER_COLUMNS))
            .bind(user_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE email=?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }

    async fn update_user_email(&self, user_id: &UserId, email: &str) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE users SET email=?, updated_at=? WHERE id=?")
            .bind(email)
            .bind(self.now())
            .bind(user_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(unique_or_backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_user_password(
        &self,
        user_id: &UserId,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE users SET password_hash=?, updated_at=? WHERE id=?")
            .bind(password_hash)
            .bind(self.now())
            .bind(user_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_user_settings(&self, user_id: &UserId) -> Result<UserSettings, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT language_id, updated_at FROM user_settings WHERE user_id=?",
        )
        .bind(user_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((language_id, updated_at)) => Ok(UserSettings {
                user_id: *user_id,
                language_id: LanguageId(language_id),
                updated_at: ts(updated_at)?,
            }),
        }
    }

    async fn update_user_settings(
        &self,
        user_id: &UserId,
        language_id: LanguageId,
    ) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE user_settings SET language_id=?, updated_at=? WHERE user_id=?")
            .bind(language_id.0)
            .bind(self.now())
            .bind(user_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ─────────────────────────────────── Languages ─────────────────────────────────────

    async fn get_language(&self, id: &LanguageId) -> Result<Language, StoreError> {
        sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, code, i18n_code, name FROM languages WHERE id=?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(language)
        .ok_or(StoreError::NotFound)
    }

    async fn get_language_by_code(&self, code: &str) -> Result<Language, StoreError> {
        sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, code, i18n_code, name FROM languages WHERE code=?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(language)
        .ok_or(StoreError::NotFound)
    }

    async fn list_languages(&self) -> Result<Vec<Language>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, code, i18n_code, name FROM languages ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(language).collect())
    }
}
