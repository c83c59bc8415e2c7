pub mod expiry;
pub mod health;
