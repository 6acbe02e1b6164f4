use super::message::render;
use super::{parse_config, Channel, ChannelError};
use async_trait::async_trait;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::client::{Tls, TlsParametersBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    None,     // plain text
    Starttls, // upgrade after connecting
    Tls,      // implicit TLS (SMTPS)
}

fn default_tls_mode() -> TlsMode {
    TlsMode::Starttls
}

fn default_starttls_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    #[serde(default = "default_tls_mode")]
    pub tls_mode: TlsMode,
    /// Only used with `Starttls`: refuse servers that do not offer it
    #[serde(default = "default_starttls_required")]
    pub starttls_required: bool,
    /// Accept self-signed certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl EmailConfig {
    fn is_local_host(&self) -> bool {
        self.smtp_host == "localhost" || self.smtp_host == "127.0.0.1"
    }

    pub fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.smtp_host)
            .port(self.smtp_port)
            .timeout(Some(SMTP_TIMEOUT));

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            if !username.is_empty() {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
        }

        let tls = match self.tls_mode {
            TlsMode::None => return Ok(builder.build()),
            mode => {
                let relaxed = self.accept_invalid_certs || self.is_local_host();
                let parameters = TlsParametersBuilder::new(self.smtp_host.clone())
                    .dangerous_accept_invalid_certs(relaxed)
                    .dangerous_accept_invalid_hostnames(relaxed)
                    .build()
                    .map_err(|e| ChannelError::InvalidConfig(format!("email: TLS setup: {e}")))?;
                match mode {
                    TlsMode::Tls => Tls::Wrapper(parameters),
                    _ if self.starttls_required => Tls::Required(parameters),
                    _ => Tls::Opportunistic(parameters),
                }
            }
        };
        Ok(builder.tls(tls).build())
    }

    fn mailboxes(&self) -> Result<(Mailbox, Vec<Mailbox>), ChannelError> {
        let from_address: Address = self.from_address.parse().map_err(|e| {
            ChannelError::InvalidConfig(format!("email: from_address '{}': {e}", self.from_address))
        })?;
        let from = Mailbox::new(self.from_name.clone(), from_address);

        let mut recipients = self
            .to_addresses
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                addr.parse::<Mailbox>().map_err(|e| {
                    ChannelError::InvalidConfig(format!("email: recipient '{addr}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        recipients.sort_by_key(|mailbox| mailbox.email.to_string());
        recipients.dedup_by(|a, b| a.email == b.email);

        if recipients.is_empty() {
            return Err(ChannelError::InvalidConfig(
                "email: no recipients configured".to_string(),
            ));
        }
        Ok((from, recipients))
    }
}

/// SMTP delivery; one message addressed to every configured recipient
pub struct EmailChannel;

impl EmailChannel {
    pub fn new() -> Self {
        Self
    }

    pub fn build_message(
        config: &EmailConfig,
        issue: &issues::Model,
        project: &projects::Model,
        is_regression: bool,
    ) -> Result<Message, ChannelError> {
        let (from, recipients) = config.mailboxes()?;
        let message = render(issue, project, is_regression, config.base_url.as_deref());

        let mut builder = Message::builder().from(from).subject(message.title.clone());
        for recipient in recipients {
            builder = builder.to(recipient);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(message.text(), message.html()))
            .map_err(|e| ChannelError::InvalidConfig(format!("email: {e}")))
    }
}

impl Default for EmailChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_smtp_error(error: lettre::transport::smtp::Error) -> ChannelError {
    if error.is_permanent() {
        ChannelError::Permanent(error.to_string())
    } else {
        ChannelError::Transient(error.to_string())
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Email
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: EmailConfig = parse_config(NotificationType::Email, config)?;
        let email = Self::build_message(&config, issue, project, is_regression)?;
        let mailer = config.transport()?;

        mailer.send(email).await.map_err(classify_smtp_error)?;
        debug!(
            issue_id = issue.id,
            recipients = config.to_addresses.len(),
            "Email notification delivered"
        );
        Ok(())
    }

    fn address_to(&self, config: &Value, email: &str) -> Option<Value> {
        let mut config = config.clone();
        if let Some(fields) = config.as_object_mut() {
            fields.insert("to_addresses".to_string(), Value::from(vec![email]));
        }
        Some(config)
    }
}
