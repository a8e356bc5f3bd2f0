use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use dot_payment_engine::{OrderFlowError, WithdrawalError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Invalid request. {0}")]
    InvalidRequest(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) |
            Self::ConfigurationError(_) |
            Self::IOError(_) |
            Self::BackendError(_) |
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<OrderFlowError> for ServerError {
    fn from(e: OrderFlowError) -> Self {
        match e {
            OrderFlowError::OrderNotFound(_) | OrderFlowError::NoOrderForAccount(_) => {
                ServerError::NoRecordFound(e.to_string())
            },
            OrderFlowError::UnsupportedAsset(_) | OrderFlowError::Keyring(_) => {
                ServerError::InvalidRequest(e.to_string())
            },
            OrderFlowError::Store(_) => ServerError::BackendError(e.to_string()),
        }
    }
}

impl From<WithdrawalError> for ServerError {
    fn from(e: WithdrawalError) -> Self {
        match e {
            WithdrawalError::OrderNotFound(_) => ServerError::NoRecordFound(e.to_string()),
            WithdrawalError::InsufficientBalance { .. } |
            WithdrawalError::AlreadyInFlight(_) |
            WithdrawalError::NotAwaitingWithdrawal(..) |
            WithdrawalError::InvalidRecipient(_) => ServerError::InvalidRequest(e.to_string()),
            _ => ServerError::BackendError(e.to_string()),
        }
    }
}
