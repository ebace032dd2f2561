pub mod history;

pub use history::{HttpMessageHistory, MessageHistory, MessagePage, SessionToken};
