pub mod badge;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod status;
pub mod view;
