//! SMTP notification dispatcher.

use super::{EmailError, NotificationDispatcher};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpDispatcher {
    pub fn new(
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        use_tls: bool,
        from_address: String,
        from_name: Option<String>,
    ) -> Result<Self, EmailError> {
        let mut builder = if use_tls {
            let tls_params = TlsParameters::new(host.clone()).map_err(|e| {
                EmailError::InvalidConfig(format!("TLS configuration error: {}", e))
            })?;

            // Port 465 uses implicit TLS (SMTPS), other ports use STARTTLS
            if port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                    .map_err(|e| EmailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                    .port(port)
                    .tls(Tls::Wrapper(tls_params))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                    .map_err(|e| EmailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                    .port(port)
                    .tls(Tls::Required(tls_params))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host).port(port)
        };

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        let from = match from_name {
            Some(name) => format!("{} <{}>", name, from_address),
            None => from_address,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| EmailError::InvalidConfig(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| EmailError::SendFailed(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::SendFailed(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}
