use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AdapterError {
    #[error("adapter `{name}` is not loaded (loaded adapters: {loaded:?})")]
    UnknownAdapter { name: String, loaded: Vec<String> },
    #[error("adapter `{0}` is already loaded")]
    DuplicateAdapter(String),
    #[error("got {names} adapter names but {weights} blend weights")]
    WeightCountMismatch { names: usize, weights: usize },
    #[error("adapter `{0}` contains no LoRA layers")]
    Empty(String),
}
