cfg_if! {
    if #[cfg(feature = "zstd_support")]
    {
        use zstd::bulk::Compressor;

        use super::error::WireError;

        /// Compresses non-handshake payloads before obfuscation and checksum.
        pub struct Encoder {
            result: Vec<u8>,
            compressor: Compressor<'static>,
        }

        impl Encoder {
            const COMPRESSION_LEVEL: i32 = 3;

            pub fn new() -> Result<Self, WireError> {
                let compressor = Compressor::new(Self::COMPRESSION_LEVEL)
                    .map_err(|_| WireError::CompressionFailed { payload_size: 0 })?;
                Ok(Self {
                    result: Vec::new(),
                    compressor,
                })
            }

            pub fn encode(&mut self, payload: &[u8]) -> Result<&[u8], WireError> {
                self.result = self
                    .compressor
                    .compress(payload)
                    .map_err(|_| WireError::CompressionFailed {
                        payload_size: payload.len(),
                    })?;
                Ok(&self.result)
            }
        }
    }
    else
    {
        use super::error::WireError;

        /// Passthrough encoder used when the `zstd_support` feature is disabled.
        pub struct Encoder {
            result: Vec<u8>,
        }

        impl Encoder {
            pub fn new() -> Result<Self, WireError> {
                Ok(Self { result: Vec::new() })
            }

            pub fn encode(&mut self, payload: &[u8]) -> Result<&[u8], WireError> {
                self.result = payload.to_vec();
                Ok(&self.result)
            }
        }
    }
}
