pub mod downloader;
pub mod gate;
pub mod premium;
pub mod progress;
pub mod relay_service;
pub mod stats;
pub mod uploader;
