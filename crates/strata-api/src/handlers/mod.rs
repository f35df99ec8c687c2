pub mod directories;
pub mod download;
pub mod files;
pub mod locations;
pub mod transfer;
pub mod upload;
