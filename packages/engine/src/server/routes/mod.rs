pub mod admin;
pub mod agents;
pub mod health;
pub mod jobs;
pub mod keys;
