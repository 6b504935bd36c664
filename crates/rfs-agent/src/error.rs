use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] rfs_config::ConfigError),

    #[error(transparent)]
    Net(#[from] rfs_net::NetError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
