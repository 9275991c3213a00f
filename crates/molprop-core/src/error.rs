use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("Shape mismatch for `{name}`: expected {expected}, got {actual:?}")]
    Shape {
        name: &'static str,
        expected: String,
        actual: Vec<usize>,
    },
}

impl Error {
    pub(crate) fn shape(name: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        Error::Shape {
            name,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}
