mod api;
mod credentials;
mod error;
mod polling;

pub use api::{GeneratedInbox, HealthReport, Inbox, InboxClient, ServerInfo, CREDENTIALS_HEADER};
pub use credentials::{CredentialStore, SavedCredentials, CREDENTIALS_FILE};
pub use error::ClientError;
pub use polling::{Backoff, PollOutcome, PollingController, PollingSnapshot};
