use zstd_safe::{DCtx, InBuffer, OutBuffer};

/// How much the output grows per `decompress_stream` call.
const OUTPUT_CHUNK_SIZE: usize = 256 * 1024;

/// Decompresses the payloads of `PERF_RECORD_COMPRESSED` records.
///
/// All compressed records of a file form one zstd stream, so the context
/// is kept between calls.
pub struct ZstdDecompressor {
    dctx: DCtx<'static>,
}

impl ZstdDecompressor {
    pub fn new() -> Self {
        Self {
            dctx: DCtx::create(),
        }
    }

    /// Appends the data decompressed from one record payload to `output`.
    pub fn decompress_into(
        &mut self,
        compressed: &[u8],
        output: &mut Vec<u8>,
    ) -> Result<(), std::io::Error> {
        let mut input = InBuffer::around(compressed);
        loop {
            let start = output.len();
            output.resize(start + OUTPUT_CHUNK_SIZE, 0);
            let (result, end) = {
                let mut out_buffer = OutBuffer::around_pos(&mut output[..], start);
                let result = self.dctx.decompress_stream(&mut out_buffer, &mut input);
                (result, out_buffer.pos())
            };
            output.truncate(end);
            if let Err(code) = result {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("zstd: {}", zstd_safe::get_error_name(code)),
                ));
            }
            // A full output chunk may mean that more output is pending.
            if input.pos() == compressed.len() && end < start + OUTPUT_CHUNK_SIZE {
                return Ok(());
            }
        }
    }
}
