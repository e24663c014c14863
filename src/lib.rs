pub mod collector;
pub mod commands;
pub mod datetime_utils;
pub mod error_utils;
pub mod filename_utils;
pub mod ledger;
pub mod oauth;
pub mod resume;
pub mod twitter;
pub mod video;
