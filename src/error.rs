use thiserror::Error;

/// The five error kinds from the gateway's error handling design.
///
/// `Configuration` is fatal and handled at startup only; the rest are
/// surfaced as read/write failures or authorization rejections and never
/// terminate the process.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error on link '{link}': {source}")]
    Transport {
        link: String,
        #[source]
        source: std::io::Error,
    },

    #[error("modbus exception on link '{link}': {code:?}")]
    Protocol {
        link: String,
        code: tokio_modbus::ExceptionCode,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("opc ua authorization rejected: {0}")]
    Authorization(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
