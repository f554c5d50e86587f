pub mod apk;
pub mod apps;
pub mod client;
pub mod parse;
pub mod runner;
