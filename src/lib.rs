// src/lib.rs

//! shotcache: random prnt.sc screenshot acquisition and caching service

pub mod error;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
