pub mod implementations;

pub use implementations::bert::Config as BertConfig;
pub use implementations::{BertCheckpoint, BertForMaskedLM, BertModel};
