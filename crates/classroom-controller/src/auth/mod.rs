//! Room credential issuance and verification.

pub mod token;

pub use token::{IssuedToken, TokenIssuer};
