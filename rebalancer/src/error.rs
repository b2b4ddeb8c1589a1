use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("metadata store error: {0}")]
    Store(#[from] coordination_store::Error),

    #[error("segment assignment strategy failed: {0}")]
    Strategy(String),

    #[error("instance assignment failed: {0}")]
    InstanceAssignment(String),

    #[error("invalid rebalance config: {0}")]
    InvalidConfig(String),

    #[error("ideal state for table {0} not found")]
    TableNotFound(String),

    #[error("segments in ERROR state for table {0}")]
    SegmentsInError(String),

    #[error("external view did not converge for table {0} within {1:?}")]
    ConvergenceTimeout(String, std::time::Duration),

    #[error("table {0} has heterogeneous replica counts across segments")]
    HeterogeneousReplicaCount(String),
}

pub type Result<T> = std::result::Result<T, Error>;
