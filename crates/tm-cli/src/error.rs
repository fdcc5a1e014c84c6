use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Device(#[from] tm_device::DeviceError),
    #[error(transparent)]
    Data(#[from] tm_io::DataError),
    #[error("naive and tiled kernels disagree: {0}")]
    KernelDisagreement(tm_io::DataError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
