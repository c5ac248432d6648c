pub mod auth;
pub mod keys;
pub mod s3_storage;
pub mod staging;
pub mod storage_service;
pub mod thumbnail_service;
pub mod upload_service;
pub mod video_repository;
