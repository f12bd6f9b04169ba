pub mod config;
pub mod error;
pub mod gallery;
pub mod image_processing;
pub mod models;
pub mod modelscope;
pub mod provider;
pub mod service;
pub mod storage;
