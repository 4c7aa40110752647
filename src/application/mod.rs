// Application layer - Use cases and the ports they depend on
pub mod cache;
pub mod chunk_planner;
pub mod downsampler;
pub mod error;
pub mod export;
pub mod grid;
pub mod history_repository;
pub mod history_service;
pub mod resilient_fetcher;
pub mod synthetic;
