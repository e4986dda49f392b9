pub mod bert;

pub use bert::{BertCheckpoint, BertForMaskedLM, BertModel};
