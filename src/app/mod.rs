pub mod adb;
pub mod cli;
pub mod config;
pub mod controller;
pub mod device_info;
pub mod error;
pub mod logcat;
pub mod logging;
pub mod models;
pub mod notify;
