//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API for billing-related events.

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Tightship <noreply@tightship.io>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Tightship".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@tightship.io".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://tightship.io".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed (non-fatal - doesn't propagate error),
    /// `Err` only for critical configuration issues.
    ///
    /// The `Ok(false)` return allows callers to track email delivery status
    /// while not failing webhook processing due to email errors.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        #[allow(clippy::disallowed_methods)]
        // json! macro uses unwrap internally, safe for primitive types
        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false) // Don't fail webhooks due to email errors
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false) // Don't fail webhooks due to email errors
            }
        }
    }

    /// Send payment failed notification (with optional hosted invoice URL)
    pub async fn send_payment_failed(
        &self,
        to: &str,
        org_name: &str,
        amount_cents: i64,
        invoice_url: Option<&str>,
    ) -> BillingResult<bool> {
        let amount = format!("£{:.2}", amount_cents as f64 / 100.0);
        let update_link = format!("{}/billing", self.config.dashboard_url);
        let invoice_section = invoice_url
            .map(|url| {
                format!(
                    r#"<p><a href="{}" style="color: #6366f1;">View Invoice</a></p>"#,
                    url
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Payment Failed</h2>
    <p>Hi there,</p>
    <p>We weren't able to process the payment of <strong>{amount}</strong> for <strong>{org_name}</strong>.</p>
    <p>Please update your payment method to avoid any interruption to your menus and pricing sync.</p>
    <p>
        <a href="{update_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Update Payment Method
        </a>
    </p>
    {invoice_section}
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            amount = amount,
            org_name = org_name,
            update_link = update_link,
            invoice_section = invoice_section,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Payment Failed - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send payment recovered notification
    pub async fn send_payment_recovered(&self, to: &str, org_name: &str) -> BillingResult<bool> {
        let billing_link = format!("{}/billing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #16a34a;">Payment Received</h2>
    <p>Hi there,</p>
    <p>Good news - your payment for <strong>{org_name}</strong> went through and your account is back in good standing.</p>
    <p>All menus, pricing and integrations continue uninterrupted.</p>
    <p><a href="{billing_link}" style="color: #6366f1;">View billing details</a></p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            org_name = org_name,
            billing_link = billing_link,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Payment Received - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send subscription cancelled confirmation
    pub async fn send_subscription_cancelled(
        &self,
        to: &str,
        org_name: &str,
        end_date: &str,
    ) -> BillingResult<bool> {
        let billing_link = format!("{}/billing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Subscription Cancelled</h2>
    <p>Hi there,</p>
    <p>The subscription for <strong>{org_name}</strong> has been cancelled.</p>
    <p>Paid features remain available until <strong>{end_date}</strong>, after which the account moves to the Free plan. Your menus and pricing data are kept.</p>
    <p>Changed your mind? You can resubscribe any time from the billing page.</p>
    <p><a href="{billing_link}" style="color: #6366f1;">Manage billing</a></p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            org_name = org_name,
            end_date = end_date,
            billing_link = billing_link,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Subscription Cancelled - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send grace period expiring warning
    pub async fn send_grace_period_expiring(
        &self,
        to: &str,
        org_name: &str,
        days_left: i64,
    ) -> BillingResult<bool> {
        let update_link = format!("{}/billing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Service Suspension in {days_left} Day(s)</h2>
    <p>Hi there,</p>
    <p>We still haven't been able to collect payment for <strong>{org_name}</strong>.</p>
    <p>Unless a payment succeeds within <strong>{days_left} day(s)</strong>, menu updates and platform sync will be suspended.</p>
    <p>
        <a href="{update_link}" style="display: inline-block; padding: 12px 24px; background-color: #dc2626; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Fix Payment Method
        </a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            days_left = days_left,
            org_name = org_name,
            update_link = update_link,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Action Required - {}", self.config.app_name),
            &html,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_disabled_without_api_key() {
        let config = EmailConfig {
            resend_api_key: String::new(),
            email_from: "Tightship <noreply@tightship.io>".to_string(),
            app_name: "Tightship".to_string(),
            support_email: "support@tightship.io".to_string(),
            dashboard_url: "https://tightship.io".to_string(),
        };
        assert!(!config.is_enabled());
    }

    #[tokio::test]
    async fn test_send_skipped_when_disabled() {
        let service = BillingEmailService::new(EmailConfig {
            resend_api_key: String::new(),
            email_from: "Tightship <noreply@tightship.io>".to_string(),
            app_name: "Tightship".to_string(),
            support_email: "support@tightship.io".to_string(),
            dashboard_url: "https://tightship.io".to_string(),
        });

        // No API key configured: the send is a logged no-op, not an error
        let sent = service
            .send_payment_recovered("owner@example.com", "Testaurant")
            .await
            .unwrap();
        assert!(!sent);
    }
}
