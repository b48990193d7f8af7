use std::fmt;

#[derive(Debug)]
pub enum RegroupError {
    Planning(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    Other(String),
}

impl fmt::Display for RegroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegroupError::Planning(e) => write!(f, "Planning error: {}", e),
            RegroupError::Io(e) => write!(f, "IO error: {}", e),
            RegroupError::Json(e) => write!(f, "JSON error: {}", e),
            RegroupError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for RegroupError {}

impl From<std::io::Error> for RegroupError {
    fn from(err: std::io::Error) -> Self {
        RegroupError::Io(err)
    }
}

impl From<serde_json::Error> for RegroupError {
    fn from(err: serde_json::Error) -> Self {
        RegroupError::Json(err)
    }
}

impl From<String> for RegroupError {
    fn from(err: String) -> Self {
        RegroupError::Other(err)
    }
}

impl From<&str> for RegroupError {
    fn from(err: &str) -> Self {
        RegroupError::Other(err.to_string())
    }
}
