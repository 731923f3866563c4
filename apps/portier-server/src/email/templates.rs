//! Notification templates.
//!
//! Only `en` and `pl` are translated; any other locale renders in English.

/// Which notification to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Register,
    EmailChange,
    PasswordReset,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Register => "register",
            NotificationKind::EmailChange => "email_change",
            NotificationKind::PasswordReset => "password_reset",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Locale {
    En,
    Pl,
}

impl Locale {
    fn from_code(code: &str) -> Self {
        match code.split(['-', '_']).next().unwrap_or_default() {
            "pl" => Locale::Pl,
            _ => Locale::En,
        }
    }
}

struct Strings {
    subject: &'static str,
    greeting: &'static str,
    body: &'static str,
    action: &'static str,
    ignore: &'static str,
}

fn strings(kind: NotificationKind, locale: Locale) -> Strings {
    match (kind, locale) {
        (NotificationKind::Register, Locale::En) => Strings {
            subject: "Confirm your Portier account",
            greeting: "Hi",
            body: "Thanks for signing up. Confirm your email address to activate your account.",
            action: "Confirm account",
            ignore: "If you didn't create an account, you can ignore this email.",
        },
        (NotificationKind::Register, Locale::Pl) => Strings {
            subject: "Potwierdź swoje konto Portier",
            greeting: "Cześć",
            body: "Dziękujemy za rejestrację. Potwierdź adres email, aby aktywować konto.",
            action: "Potwierdź konto",
            ignore: "Jeśli nie zakładałeś konta, zignoruj tę wiadomość.",
        },
        (NotificationKind::EmailChange, Locale::En) => Strings {
            subject: "Confirm your new email address",
            greeting: "Hi",
            body: "We received a request to change the email address of your account to this one.",
            action: "Confirm new address",
            ignore: "If you didn't request this change, you can ignore this email.",
        },
        (NotificationKind::EmailChange, Locale::Pl) => Strings {
            subject: "Potwierdź nowy adres email",
            greeting: "Cześć",
            body: "Otrzymaliśmy prośbę o zmianę adresu email Twojego konta na ten adres.",
            action: "Potwierdź nowy adres",
            ignore: "Jeśli nie prosiłeś o zmianę, zignoruj tę wiadomość.",
        },
        (NotificationKind::PasswordReset, Locale::En) => Strings {
            subject: "Reset your Portier password",
            greeting: "Hi",
            body: "We received a request to reset your password.",
            action: "Choose a new password",
            ignore: "If you didn't request a reset, you can ignore this email.",
        },
        (NotificationKind::PasswordReset, Locale::Pl) => Strings {
            subject: "Zresetuj hasło Portier",
            greeting: "Cześć",
            body: "Otrzymaliśmy prośbę o zresetowanie Twojego hasła.",
            action: "Ustaw nowe hasło",
            ignore: "Jeśli nie prosiłeś o reset hasła, zignoruj tę wiadomość.",
        },
    }
}

/// Rendered notification.
#[derive(Clone, Debug)]
pub struct NotificationContent {
    pub subject: String,
    pub html: String,
}

impl NotificationContent {
    pub fn render(kind: NotificationKind, locale: &str, name: &str, link: &str) -> Self {
        let s = strings(kind, Locale::from_code(locale));
        Self {
            subject: s.subject.to_string(),
            html: format!(
                r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; margin: 0; padding: 0; background: #f5f5f5; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 40px 20px; }}
        .card {{ background: white; border-radius: 8px; padding: 40px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        .button {{ display: inline-block; padding: 12px 24px; background: #2563eb; color: white; border-radius: 6px; text-decoration: none; }}
        .footer {{ margin-top: 32px; padding-top: 20px; border-top: 1px solid #eee; color: #888; font-size: 12px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <p>{greeting} {name},</p>
            <p>{body}</p>
            <p><a class="button" href="{link}">{action}</a></p>
            <p>{link}</p>
            <div class="footer">
                <p>{ignore}</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
                greeting = s.greeting,
                name = escape(name),
                body = s.body,
                link = escape(link),
                action = s.action,
                ignore = s.ignore,
            ),
        }
    }
}

/// Minimal HTML escaping for values interpolated into templates.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "https://app.example.com/confirm/abc123";

    #[test]
    fn test_register_content_contains_link() {
        let content = NotificationContent::render(NotificationKind::Register, "en", "Ada", LINK);
        assert_eq!(content.subject, "Confirm your Portier account");
        assert!(content.html.contains(LINK));
        assert!(content.html.contains("Hi Ada"));
        assert!(content.html.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn test_polish_templates() {
        let content =
            NotificationContent::render(NotificationKind::PasswordReset, "pl", "Ola", LINK);
        assert_eq!(content.subject, "Zresetuj hasło Portier");
        assert!(content.html.contains("Cześć Ola"));

        let regional =
            NotificationContent::render(NotificationKind::EmailChange, "pl-PL", "Ola", LINK);
        assert_eq!(regional.subject, "Potwierdź nowy adres email");
    }

    #[test]
    fn test_unknown_locale_falls_back_to_english() {
        let content = NotificationContent::render(NotificationKind::EmailChange, "de", "Jo", LINK);
        assert_eq!(content.subject, "Confirm your new email address");
    }

    #[test]
    fn test_name_is_escaped() {
        let content = NotificationContent::render(
            NotificationKind::Register,
            "en",
            "<script>alert(1)</script>",
            LINK,
        );
        assert!(!content.html.contains("<script>"));
        assert!(content.html.contains("&lt;script&gt;"));
    }
}
