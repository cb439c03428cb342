pub mod mailer;
pub mod password;
pub mod service;
pub mod tokens;
pub mod verification;
