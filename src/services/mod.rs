pub mod access;
pub mod dashboard;
pub mod directory;
pub mod discord;
pub mod events;
pub mod gateway;
pub mod init;
pub mod live_status;
pub mod parser;
pub mod registration;
pub mod twitch;
