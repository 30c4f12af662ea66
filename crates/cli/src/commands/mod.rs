pub mod broker;
pub mod config_cmd;
pub mod dev;
pub mod gateway;
pub mod memory;
pub mod perspectives;
pub mod worker;
