mod backend;
mod brand;
mod enrich;
mod error;
mod mailsac;
mod mailtm;
mod manager;
mod retry;

pub mod insights;

#[cfg(test)]
mod test_support;

pub use backend::ProviderBackend;
pub use brand::{company_name, extract_domain, logo_from_html, BrandResolver};
pub use enrich::MessageEnricher;
pub use error::EmailError;
pub use mailsac::MailsacBackend;
pub use mailtm::MailTmBackend;
pub use manager::{ProviderManager, DEFAULT_FAILURE_THRESHOLD, DEFAULT_ROTATION_WINDOW};
pub use retry::RetryPolicy;
