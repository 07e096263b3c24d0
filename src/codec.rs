//! The codec facade: session configuration and the encode/decode entry
//! points.
//!
//! An [`Externalizer`] is cheap to construct and holds no per-call state; all
//! reference tables live and die inside one `encode` or `decode` call. Only
//! the [`crate::Registry`] is shared, so one instance (or several sharing a
//! registry) can serve a whole process.

use crate::compress::{self, CompressionMode};
use crate::registry::Registry;
use crate::table::RefTable;
use crate::value::Value;
use crate::{num, reader, writer, CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Session configuration. The writer and reader of one stream must agree on
/// every field here; none of it travels on the wire.
#[derive(Debug, Clone)]
pub struct Config {
    /// Outer compression applied after encoding and removed before decoding.
    pub compression: CompressionMode,
    /// Deflate-family compression level, 0..=9.
    pub compression_level: u32,
    /// When set, streams are framed as records: a flag byte, a big-endian
    /// payload length, then the payload, compressed only when the encoded
    /// form reaches the threshold AND compression actually shrank it. When
    /// unset, the whole stream is compressed unconditionally.
    pub compression_threshold: Option<usize>,
    /// Initial bucket count of every reference table.
    pub table_initial_size: usize,
    /// Bucket-array growth factor of every reference table.
    pub table_expand_ratio: f64,
    /// Occupancy fraction that triggers reference-table growth.
    pub table_load_factor: f64,
    /// Variable-width encoding for int/long fields. Off means fixed width.
    pub use_number_compression: bool,
    /// Intern repeated int (and float bit pattern) field values.
    pub use_int_table: bool,
    /// Intern repeated long (and double bit pattern) field values.
    pub use_long_table: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compression: CompressionMode::None,
            compression_level: 6,
            compression_threshold: None,
            table_initial_size: crate::table::DEFAULT_INITIAL_SIZE,
            table_expand_ratio: crate::table::DEFAULT_EXPAND_RATIO,
            table_load_factor: crate::table::DEFAULT_LOAD_FACTOR,
            use_number_compression: true,
            use_int_table: true,
            use_long_table: true,
        }
    }
}

impl Config {
    /// Creates one session reference table with this configuration's sizing.
    pub(crate) fn new_table<K>(&self) -> RefTable<K> {
        RefTable::with_config(
            self.table_initial_size,
            self.table_expand_ratio,
            self.table_load_factor,
        )
    }
}

const RECORD_PLAIN: u8 = 0;
const RECORD_COMPRESSED: u8 = 1;

/// Encodes and decodes object graphs against a shared type registry.
pub struct Externalizer {
    registry: Arc<Registry>,
    config: Config,
}

impl Externalizer {
    /// Creates a codec with the default configuration.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, Config::default())
    }

    /// Creates a codec with an explicit configuration.
    pub fn with_config(registry: Arc<Registry>, config: Config) -> Self {
        Externalizer { registry, config }
    }

    /// The registry this codec resolves types against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serializes one value graph into a fresh byte vector.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut body = BytesMut::new();
        writer::write_graph(&self.registry, &self.config, &mut body, value)?;
        if self.config.compression == CompressionMode::None {
            return Ok(body.to_vec());
        }
        match self.config.compression_threshold {
            None => compress::compress(self.config.compression, self.config.compression_level, &body),
            Some(threshold) => {
                let mut out = BytesMut::with_capacity(body.len() + 5);
                if body.len() >= threshold {
                    let packed = compress::compress(
                        self.config.compression,
                        self.config.compression_level,
                        &body,
                    )?;
                    if packed.len() < body.len() {
                        log::debug!(
                            "record compressed {} -> {} bytes",
                            body.len(),
                            packed.len()
                        );
                        out.put_u8(RECORD_COMPRESSED);
                        num::write_i32_raw(&mut out, packed.len() as i32);
                        out.put_slice(&packed);
                        return Ok(out.to_vec());
                    }
                    log::debug!("record kept plain, compression did not shrink it");
                }
                out.put_u8(RECORD_PLAIN);
                num::write_i32_raw(&mut out, body.len() as i32);
                out.put_slice(&body);
                Ok(out.to_vec())
            }
        }
    }

    /// Reconstructs a value graph from bytes produced by [`Externalizer::encode`]
    /// under the same configuration. Bytes past the end of the graph are
    /// ignored.
    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        let body = if self.config.compression == CompressionMode::None {
            Bytes::copy_from_slice(data)
        } else {
            match self.config.compression_threshold {
                None => Bytes::from(compress::decompress(self.config.compression, data)?),
                Some(_) => {
                    let mut input = Bytes::copy_from_slice(data);
                    num::need(&input, 1, "record flag")?;
                    let flag = input.get_u8();
                    let len = num::read_i32_raw(&mut input)?;
                    if len < 0 {
                        return Err(CodecError::Corrupt(format!(
                            "negative record length {len}"
                        )));
                    }
                    num::need(&input, len as usize, "record payload")?;
                    let payload = input.copy_to_bytes(len as usize);
                    match flag {
                        RECORD_PLAIN => payload,
                        RECORD_COMPRESSED => {
                            Bytes::from(compress::decompress(self.config.compression, &payload)?)
                        }
                        other => {
                            return Err(CodecError::Corrupt(format!(
                                "unexpected record flag {other}"
                            )))
                        }
                    }
                }
            }
        };
        reader::read_graph(&self.registry, &self.config, body)
    }
}
