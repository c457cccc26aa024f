pub mod address;
pub mod cache;
pub mod dns;
pub mod governor;
pub mod smtp;
