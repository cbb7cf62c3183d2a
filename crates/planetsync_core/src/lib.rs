pub mod assets;
pub mod audit;
pub mod classify;
pub mod config;
pub mod diff;
pub mod error;
pub mod geometry;
pub mod images;
pub mod markup;
pub mod records;
pub mod remote;
pub mod report;
