pub mod agent;
pub mod conversation;
pub mod ticket;
pub mod user;
