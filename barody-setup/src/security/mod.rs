pub mod crypto;
pub mod password;
pub mod token;
