#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("hwaddr {0} does not have a valid lease")]
    NoValidLease(String),
}

pub type Result<T> = std::result::Result<T, Error>;
