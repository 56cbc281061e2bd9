pub mod currency;
pub mod operation;
pub mod user;
