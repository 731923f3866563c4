//! Response decoration.
//!
//! Handlers never touch the transport. They return who the caller turned out to be and
//! which cookies to set or clear; the transport layer renders that into headers.

use chrono::Duration;
use portier_storage::UserId;

/// Short-lived signed access credential.
pub const ACCESS_COOKIE: &str = "access_token";
/// Long-lived session secret.
pub const SESSION_COOKIE: &str = "refresh_token";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CookieDirective {
    Set {
        name: &'static str,
        value: String,
        max_age: Duration,
    },
    Clear {
        name: &'static str,
    },
}

impl CookieDirective {
    pub fn name(&self) -> &'static str {
        match self {
            CookieDirective::Set { name, .. } | CookieDirective::Clear { name } => name,
        }
    }

    /// `Set-Cookie` header value.
    pub fn to_header(&self, secure: bool) -> String {
        let (name, value, max_age) = match self {
            CookieDirective::Set {
                name,
                value,
                max_age,
            } => (*name, value.as_str(), max_age.num_seconds().max(0)),
            CookieDirective::Clear { name } => (*name, "", 0),
        };
        let mut header = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            name, value, max_age
        );
        if secure {
            header.push_str("; Secure");
        }
        header
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseDecoration {
    pub user_id: Option<UserId>,
    pub cookies: Vec<CookieDirective>,
}

impl ResponseDecoration {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            cookies: Vec::new(),
        }
    }

    pub fn set_access(&mut self, token: String, max_age: Duration) {
        self.push(CookieDirective::Set {
            name: ACCESS_COOKIE,
            value: token,
            max_age,
        });
    }

    pub fn set_session(&mut self, secret: String, max_age: Duration) {
        self.push(CookieDirective::Set {
            name: SESSION_COOKIE,
            value: secret,
            max_age,
        });
    }

    pub fn clear_access(&mut self) {
        self.push(CookieDirective::Clear {
            name: ACCESS_COOKIE,
        });
    }

    pub fn clear_session(&mut self) {
        self.push(CookieDirective::Clear {
            name: SESSION_COOKIE,
        });
    }

    /// Last directive per cookie name wins.
    pub fn push(&mut self, directive: CookieDirective) {
        self.cookies.retain(|c| c.name() != directive.name());
        self.cookies.push(directive);
    }

    /// Fold `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: ResponseDecoration) {
        if other.user_id.is_some() {
            self.user_id = other.user_id;
        }
        for directive in other.cookies {
            self.push(directive);
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&CookieDirective> {
        self.cookies.iter().find(|c| c.name() == name)
    }

    pub fn set_cookie_headers(&self, secure: bool) -> Vec<String> {
        self.cookies.iter().map(|c| c.to_header(secure)).collect()
    }
}
