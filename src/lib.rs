pub mod actions;
pub mod app;
pub mod capture;
pub mod config;
pub mod cues;
pub mod decision;
pub mod geometry;
pub mod meeting;
pub mod vision;
