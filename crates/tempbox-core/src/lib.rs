mod model;
mod validate;

pub use model::*;
pub use validate::{is_valid_address, is_valid_message_id, MAX_ADDRESS_LEN, MAX_MESSAGE_ID_LEN};
