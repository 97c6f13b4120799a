use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] turbojpeg::Error),

    #[error("Pixel buffer size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Cannot encode an empty {width}x{height} image")]
    EmptyImage { width: u32, height: u32 },
}
