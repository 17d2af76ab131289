pub mod app_settings;
pub mod file_credentials;
