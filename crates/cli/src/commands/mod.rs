pub mod config_cmd;
pub mod doctor;
pub mod persona;
pub mod serve;
