pub mod checksum;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod obfuscate;
pub mod reader;
pub mod writer;
