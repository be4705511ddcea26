pub mod protocol {
    pub mod crc8;
    pub mod frame;
    pub mod packet;
}

pub mod models {
    pub mod command;
    pub mod heat_pump;
}

pub mod client;
pub mod config;
pub mod device;
pub mod security;
pub mod transport;
pub mod utils;
