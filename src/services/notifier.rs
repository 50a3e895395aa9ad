//! Transactional email through the Resend HTTP API.

use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::settings::Settings;
use crate::utils::errors::{ApiError, AppError, AppResult};

const RESEND_URL: &str = "https://api.resend.com/emails";

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Signup,
    ProfileComplete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeRequest {
    pub email: String,
    #[serde(rename = "type")]
    pub kind: EmailKind,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeOutcome {
    pub success: bool,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Six digits, 100000..=999999.
pub fn confirmation_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub fn validate_email(email: &str) -> AppResult<()> {
    if EMAIL_RE.is_match(email.trim()) {
        Ok(())
    } else {
        Err(AppError::validation("A valid email address is required"))
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn layout(accent: &str, icon: &str, title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="margin:0;padding:0;font-family:'Segoe UI',Tahoma,Geneva,Verdana,sans-serif;background-color:#0a0a0f;">
  <div style="max-width:600px;margin:0 auto;padding:40px 20px;">
    <div style="background:linear-gradient(135deg,#1a1a2e 0%,#16162a 100%);border-radius:16px;padding:40px;border:1px solid rgba(139,92,246,0.2);">
      <div style="text-align:center;margin-bottom:32px;">
        <div style="display:inline-block;background:{accent};border-radius:12px;padding:16px;margin-bottom:16px;"><span style="font-size:32px;">{icon}</span></div>
        <h1 style="color:#ffffff;margin:0;font-size:28px;font-weight:700;">{title}</h1>
      </div>
      {body}
    </div>
    <p style="color:#52525b;font-size:12px;text-align:center;margin-top:24px;">&copy; Apex Pips. All rights reserved.</p>
  </div>
</body>
</html>"#
    )
}

fn bullet_list(colour: &str, heading: &str, items: &[&str]) -> String {
    let lis: String = items.iter().map(|i| format!("<li>{i}</li>")).collect();
    format!(
        r#"<div style="border-radius:12px;padding:24px;margin-bottom:24px;border:1px solid {colour};">
        <h2 style="color:{colour};margin:0 0 16px 0;font-size:18px;">{heading}</h2>
        <ul style="color:#a1a1aa;margin:0;padding-left:20px;line-height:2;">{lis}</ul>
      </div>"#
    )
}

pub fn render(kind: EmailKind, name: Option<&str>, code: &str) -> RenderedEmail {
    match kind {
        EmailKind::Signup => {
            let body = format!(
                r#"<p style="color:#a1a1aa;font-size:16px;line-height:1.6;text-align:center;">Your account has been created successfully. Here's your confirmation code:</p>
      <div style="border-radius:12px;padding:32px;margin-bottom:24px;border:1px solid rgba(139,92,246,0.3);text-align:center;">
        <p style="color:#a1a1aa;font-size:14px;margin:0 0 12px 0;text-transform:uppercase;letter-spacing:1px;">Your Confirmation Code</p>
        <h2 style="color:#8B5CF6;margin:0;font-size:42px;font-weight:700;letter-spacing:8px;font-family:monospace;">{code}</h2>
      </div>
      {next}
      <p style="color:#71717a;font-size:14px;margin-top:32px;text-align:center;">If you didn't create this account, please ignore this email.</p>"#,
                next = bullet_list(
                    "#8B5CF6",
                    "What's Next?",
                    &[
                        "Complete your profile to start trading",
                        "Make your first deposit",
                        "Start trading with leverage up to 100x",
                    ],
                ),
            );
            RenderedEmail {
                subject: "Welcome to Apex Pips - Your Confirmation Code".into(),
                html: layout(
                    "linear-gradient(135deg,#8B5CF6 0%,#3B82F6 100%)",
                    "📈",
                    "Welcome to Apex Pips!",
                    &body,
                ),
            }
        }
        EmailKind::ProfileComplete => {
            let greeting = match name.map(str::trim).filter(|n| !n.is_empty()) {
                Some(n) => format!("Hi {},", escape_html(n)),
                None => "Hi,".to_string(),
            };
            let body = format!(
                r#"<p style="color:#a1a1aa;font-size:16px;line-height:1.6;">{greeting} your profile has been completed successfully. You're now ready to start trading on Apex Pips!</p>
      {benefits}"#,
                benefits = bullet_list(
                    "#22c55e",
                    "Your Benefits",
                    &[
                        "Access to all trading pairs",
                        "Up to 100x leverage",
                        "24/7 live support",
                        "Instant deposits &amp; fast withdrawals",
                    ],
                ),
            );
            RenderedEmail {
                subject: "Profile Complete - You're Ready to Trade!".into(),
                html: layout(
                    "linear-gradient(135deg,#22c55e 0%,#16a34a 100%)",
                    "✅",
                    "Profile Complete!",
                    &body,
                ),
            }
        }
    }
}

#[derive(Clone)]
pub struct Mailer {
    client: Client,
    api_key: Option<String>,
    from: String,
    endpoint: String,
}

impl Mailer {
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_key: settings.resend_api_key.clone(),
            from: settings.email_from.clone(),
            endpoint: RESEND_URL.into(),
        })
    }

    /// Renders and sends a welcome email. Without an API key the email is
    /// skipped and `delivered` is false.
    pub async fn send_welcome(&self, req: &WelcomeRequest) -> AppResult<WelcomeOutcome> {
        validate_email(&req.email)?;
        let code = confirmation_code();
        let mail = render(req.kind, req.name.as_deref(), &code);
        let to = req.email.trim();

        let delivered = match &self.api_key {
            Some(key) => {
                self.deliver(key, to, &mail).await?;
                log::info!("{:?} email sent to {to}", req.kind);
                true
            }
            None => {
                log::warn!("RESEND_API_KEY not set; {:?} email to {to} skipped", req.kind);
                false
            }
        };

        Ok(WelcomeOutcome {
            success: true,
            delivered,
            confirmation_code: (req.kind == EmailKind::Signup).then_some(code),
        })
    }

    async fn deliver(&self, key: &str, to: &str, mail: &RenderedEmail) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": mail.subject,
                "html": mail.html,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { provider: "resend", code: status.as_u16(), body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_codes_are_six_digits() {
        for _ in 0..200 {
            let c = confirmation_code();
            assert_eq!(c.len(), 6);
            let n: u32 = c.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn signup_mail_embeds_code() {
        let m = render(EmailKind::Signup, None, "123456");
        assert!(m.subject.contains("Confirmation Code"));
        assert!(m.html.contains("123456"));
    }

    #[test]
    fn profile_mail_greets_by_escaped_name() {
        let m = render(EmailKind::ProfileComplete, Some("<Ann>"), "000000");
        assert!(m.html.contains("Hi &lt;Ann&gt;,"));
        assert!(!m.html.contains("000000"));

        let anon = render(EmailKind::ProfileComplete, Some("  "), "1");
        assert!(anon.html.contains("Hi, your profile"));
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("trader@example.com").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("a b@c.d").is_err());
    }

    #[test]
    fn request_uses_type_field() {
        let r: WelcomeRequest = serde_json::from_value(serde_json::json!({
            "email": "a@b.co", "type": "profile_complete", "name": "Ann"
        }))
        .unwrap();
        assert_eq!(r.kind, EmailKind::ProfileComplete);
    }

    #[actix_rt::test]
    async fn missing_key_skips_delivery_but_returns_code() {
        let mailer = Mailer::from_settings(&Settings::for_tests()).unwrap();
        let out = mailer
            .send_welcome(&WelcomeRequest {
                email: "new@user.io".into(),
                kind: EmailKind::Signup,
                name: None,
            })
            .await
            .unwrap();
        assert!(out.success);
        assert!(!out.delivered);
        assert_eq!(out.confirmation_code.map(|c| c.len()), Some(6));
    }
}
