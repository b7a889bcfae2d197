#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid metrics config: {message}")]
    Config { message: String },
    #[cfg(feature = "prometheus")]
    #[error(transparent)]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
