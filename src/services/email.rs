use lettre::{
    Message, SmtpTransport, Transport,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
};
use log::{info, error, warn};

pub struct EmailService;

impl EmailService {
    /// Payment receipt after a completed capture. Best-effort: the upgrade
    /// already committed, a mail failure only gets logged.
    pub async fn send_receipt_email(email: &str, plan: &str, amount: f64, reference: &str) -> bool {
        match Self::try_send_receipt(email, plan, amount, reference).await {
            Ok(_) => {
                info!("Receipt email sent to {}", email);
                true
            }
            Err(e) => {
                error!("Failed to send receipt email to {}: {}", email, e);
                false
            }
        }
    }

    async fn try_send_receipt(
        email: &str,
        plan: &str,
        amount: f64,
        reference: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (_, from_mailbox) = Self::credentials()?;
        let to_mailbox: Mailbox = email.parse()?;

        let email_body = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <body>
                <h1>Thanks for upgrading! 🎉</h1>
                <p>Your PlanForge subscription is now on the <strong>{}</strong> plan.</p>
                <p>Amount charged: <strong>${:.2} USD</strong><br>
                   Reference: <strong>{}</strong></p>
                <p>Your new generation quota is available immediately.</p>
                <p>Best regards,<br><strong>The PlanForge Team</strong></p>
            </body>
            </html>
            "#,
            plan, amount, reference
        );

        let email_message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(format!("Your PlanForge {} plan receipt", plan))
            .header(ContentType::TEXT_HTML)
            .body(email_body)?;

        Self::mailer()?.send(&email_message)?;
        Ok(())
    }

    pub async fn send_welcome_email(email: &str, name: &str) -> bool {
        match Self::try_send_welcome(email, name).await {
            Ok(_) => {
                info!("Welcome email sent to {}", email);
                true
            }
            Err(e) => {
                error!("Failed to send welcome email: {}", e);
                false
            }
        }
    }

    async fn try_send_welcome(email: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        let (_, from_mailbox) = Self::credentials()?;
        let display_name = if name.is_empty() { "there" } else { name };
        let to_mailbox: Mailbox = email.parse()?;

        let email_body = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <body>
                <h1>Welcome to PlanForge! 🚀</h1>
                <p>Hi {},</p>
                <p>Your account is ready. With PlanForge you can:</p>
                <ul>
                    <li>Generate AI-assisted startup business plans</li>
                    <li>Explore trending startup keywords</li>
                    <li>Upgrade to Pro or Enterprise for a bigger monthly quota</li>
                </ul>
                <p>Your free Basic plan includes 2 generations per month.</p>
                <p>Best regards,<br><strong>The PlanForge Team</strong></p>
            </body>
            </html>
            "#,
            display_name
        );

        let email_message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject("Welcome to PlanForge! 🚀")
            .header(ContentType::TEXT_HTML)
            .body(email_body)?;

        Self::mailer()?.send(&email_message)?;
        Ok(())
    }

    fn credentials() -> Result<(Credentials, Mailbox), Box<dyn std::error::Error>> {
        let mail_user = crate::config::Config::mail_user();
        let mail_password = crate::config::Config::mail_password();

        if mail_user.is_empty() || mail_password.is_empty() {
            warn!("Email credentials not configured. Skipping email send.");
            return Err("Email not configured".into());
        }

        let from_mailbox: Mailbox = crate::config::Config::mail_from().parse()?;
        Ok((Credentials::new(mail_user, mail_password), from_mailbox))
    }

    fn mailer() -> Result<SmtpTransport, Box<dyn std::error::Error>> {
        let (creds, _) = Self::credentials()?;
        Ok(SmtpTransport::relay(&crate::config::Config::mail_host())?
            .credentials(creds)
            .build())
    }
}
