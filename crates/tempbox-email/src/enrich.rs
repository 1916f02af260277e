use crate::insights::{detect_service, main_code};
use crate::BrandResolver;
use std::sync::Arc;
use tempbox_core::MailMessage;

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Fills the presentational fields of messages before they leave the server.
#[derive(Clone)]
pub struct MessageEnricher {
    brand: Arc<BrandResolver>,
}

impl MessageEnricher {
    pub fn new(brand: Arc<BrandResolver>) -> Self {
        Self { brand }
    }

    pub fn brand(&self) -> &BrandResolver {
        &self.brand
    }

    pub async fn enrich(&self, mut message: MailMessage) -> MailMessage {
        let html = (!message.html.is_empty()).then_some(message.html.as_str());
        message.brand_info = Some(self.brand.brand_info(&message.from, html).await);
        message.verification_code = main_code(message.display_text(), &message.subject);
        message.service = Some(detect_service(&message.from, &message.subject));

        if message.text.trim().is_empty() {
            message.text = message.intro.clone();
        }
        message.html = if message.html.trim().is_empty() {
            format!("<p>{}</p>", escape_html(&message.intro))
        } else {
            ammonia::clean(&message.html)
        };
        message
    }

    pub async fn enrich_all(&self, messages: Vec<MailMessage>) -> Vec<MailMessage> {
        let mut enriched = Vec::with_capacity(messages.len());
        for message in messages {
            enriched.push(self.enrich(message).await);
        }
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempbox_core::MessageCategory;

    fn enricher() -> MessageEnricher {
        let brand = BrandResolver::new(Duration::from_millis(100), 128)
            .expect("resolver built")
            .without_clearbit();
        MessageEnricher::new(Arc::new(brand))
    }

    fn message(html: &str, text: &str) -> MailMessage {
        MailMessage {
            id: "m1".to_string(),
            from: "noreply@github.com".to_string(),
            from_name: None,
            to: "box@dcctb.com".to_string(),
            subject: "Verify your device".to_string(),
            intro: "Code <482913> expires soon".to_string(),
            text: text.to_string(),
            html: html.to_string(),
            received_at: Utc::now(),
            has_attachments: false,
            seen: false,
            attachments: Vec::new(),
            brand_info: None,
            verification_code: None,
            service: None,
        }
    }

    #[tokio::test]
    async fn fills_brand_code_and_service() {
        let enriched = enricher()
            .enrich(message("", "Your verification code: 482913"))
            .await;

        let brand = enriched.brand_info.expect("brand attached");
        assert_eq!(brand.company_name, "Github");
        assert_eq!(enriched.verification_code.as_deref(), Some("482913"));
        let service = enriched.service.expect("service attached");
        assert_eq!(service.service.as_deref(), Some("GitHub"));
        assert_eq!(service.category, MessageCategory::Verification);
    }

    #[tokio::test]
    async fn empty_bodies_fall_back_to_the_escaped_intro() {
        let enriched = enricher().enrich(message("", "")).await;
        assert_eq!(enriched.text, "Code <482913> expires soon");
        assert_eq!(enriched.html, "<p>Code &lt;482913&gt; expires soon</p>");
    }

    #[tokio::test]
    async fn html_is_sanitized() {
        let enriched = enricher()
            .enrich(message(
                r#"<p onclick="steal()">Hi</p><script>alert(1)</script>"#,
                "Hi",
            ))
            .await;
        assert!(enriched.html.contains("<p>Hi</p>"));
        assert!(!enriched.html.contains("script"));
        assert!(!enriched.html.contains("onclick"));
    }
}
