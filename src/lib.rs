pub mod audit;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod range;
pub mod report;
pub mod risk;
pub mod rpc;
pub mod scanner;
