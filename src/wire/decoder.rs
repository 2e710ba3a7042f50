cfg_if! {
    if #[cfg(feature = "zstd_support")]
    {
        use zstd::bulk::Decompressor;

        use super::error::WireError;

        /// Decompresses non-handshake payloads after checksum validation and
        /// deobfuscation.
        pub struct Decoder {
            result: Vec<u8>,
            decompressor: Decompressor<'static>,
        }

        impl Decoder {
            pub fn new() -> Result<Self, WireError> {
                let decompressor = Decompressor::new()
                    .map_err(|_| WireError::DecompressionFailed { payload_size: 0 })?;
                Ok(Self {
                    result: Vec::new(),
                    decompressor,
                })
            }

            /// SECURITY: This method processes untrusted network data. Any
            /// malformed payload returns an error instead of panicking.
            pub fn decode(&mut self, payload: &[u8]) -> Result<&[u8], WireError> {
                let upper_bound = Decompressor::<'static>::upper_bound(payload)
                    .map_err(|_| WireError::DecompressionFailed {
                        payload_size: payload.len(),
                    })?;

                self.result = self
                    .decompressor
                    .decompress(payload, upper_bound)
                    .map_err(|_| WireError::DecompressionFailed {
                        payload_size: payload.len(),
                    })?;
                Ok(&self.result)
            }
        }
    }
    else
    {
        use super::error::WireError;

        /// Passthrough decoder used when the `zstd_support` feature is disabled.
        pub struct Decoder {
            result: Vec<u8>,
        }

        impl Decoder {
            pub fn new() -> Result<Self, WireError> {
                Ok(Self { result: Vec::new() })
            }

            pub fn decode(&mut self, payload: &[u8]) -> Result<&[u8], WireError> {
                self.result = payload.to_vec();
                Ok(&self.result)
            }
        }
    }
}
