pub mod records;
pub mod requests;
pub mod responses;
pub mod state;
