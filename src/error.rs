use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepuffError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid deflate stream: {0}")]
    BadDeflate(String),

    #[error("invalid puff stream: {0}")]
    BadPuff(String),

    #[error("buffer boundary exceeded: {0}")]
    Boundary(String),

    #[error("stream error: {0}")]
    Stream(String),
}

impl RepuffError {
    pub fn bad_deflate<T: fmt::Display>(msg: T) -> Self {
        RepuffError::BadDeflate(msg.to_string())
    }

    pub fn bad_puff<T: fmt::Display>(msg: T) -> Self {
        RepuffError::BadPuff(msg.to_string())
    }

    pub fn boundary<T: fmt::Display>(msg: T) -> Self {
        RepuffError::Boundary(msg.to_string())
    }

    pub fn stream<T: fmt::Display>(msg: T) -> Self {
        RepuffError::Stream(msg.to_string())
    }
}

pub type RepuffResult<T> = Result<T, RepuffError>;
