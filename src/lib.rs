pub mod archive;
pub mod asset;
pub mod backend;
pub mod cleanup;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod exposure;
pub mod http;
pub mod install;
pub mod package;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod source;
