pub mod codecs;
pub mod envelope;
