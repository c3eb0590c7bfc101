pub mod error;
pub mod key_info;

pub use error::{CourierError, CourierResult};
pub use key_info::{KeyListing, KeyRecord, KeyType, PrivateKeyPem};
