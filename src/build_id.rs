use byteorder::{ByteOrder, WriteBytesExt};

use crate::constants::{
    PERF_RECORD_MISC_BUILD_ID_SIZE, PERF_RECORD_MISC_KERNEL, PERF_RECORD_MISC_USER,
};
use crate::cursor::{write_padded_string, RecordCursor};
use crate::error::ParseError;

/// Build ids are at most this long. The on-disk field is 24 bytes wide.
pub const MAX_BUILD_ID_SIZE: usize = 20;

/// Old versions of perf did not write down the length of the build ID.
/// Detect the true length by removing 4-byte chunks of zeros from the end.
fn detect_build_id_len(build_id_bytes: &[u8]) -> u8 {
    let mut len = build_id_bytes.len();
    const CHUNK_SIZE: usize = 4;
    for chunk in build_id_bytes.chunks(CHUNK_SIZE).rev() {
        if chunk.iter().any(|b| *b != 0) {
            break;
        }
        len -= chunk.len();
    }
    len as u8
}

/// `build_id_event`
///
/// Used both as a record in the data section and as the entries of the
/// build id feature section. If `PERF_RECORD_MISC_KERNEL` is set in `misc`,
/// this is the build id for the vmlinux image or a kmod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdRecord {
    pub misc: u16,
    pub pid: i32,
    pub build_id: Vec<u8>,
    pub filename: Vec<u8>,
}

impl BuildIdRecord {
    /// A build id for a user space file. The build id is truncated to 20 bytes.
    pub fn new(pid: i32, build_id: &[u8], filename: &[u8]) -> Self {
        Self {
            misc: PERF_RECORD_MISC_USER | PERF_RECORD_MISC_BUILD_ID_SIZE,
            pid,
            build_id: build_id[..build_id.len().min(MAX_BUILD_ID_SIZE)].to_vec(),
            filename: filename.to_vec(),
        }
    }

    /// A build id for the kernel or a kernel module.
    pub fn new_kernel(build_id: &[u8], filename: &[u8]) -> Self {
        Self {
            misc: PERF_RECORD_MISC_KERNEL | PERF_RECORD_MISC_BUILD_ID_SIZE,
            ..Self::new(-1, build_id, filename)
        }
    }

    pub fn is_kernel(&self) -> bool {
        self.misc & PERF_RECORD_MISC_KERNEL != 0
    }

    pub fn parse<T: ByteOrder>(cur: &mut RecordCursor<T>, misc: u16) -> Result<Self, ParseError> {
        let pid = cur.read_i32()?;
        let build_id_bytes = cur.read_slice(24)?;

        // Followed by file path for the remaining bytes. The total size of the record
        // is given by header.size.
        let path_len = cur.remaining();
        let filename = cur.read_padded_string(path_len)?;

        // If PERF_RECORD_MISC_BUILD_ID_SIZE is set in header.misc, then build_id_bytes[20]
        // is the length of the build id (<= 20), and build_id_bytes[21..24] are unused.
        // Otherwise, the length of the build ID is unknown but at most 20, and has to be
        // detected by removing trailing 4-byte groups of zero bytes.
        // Simpleperf does not use PERF_RECORD_MISC_BUILD_ID_SIZE and may fill
        // bytes 20..24 with uninitialized data, so those bytes have to be ignored.
        let build_id_len = if misc & PERF_RECORD_MISC_BUILD_ID_SIZE != 0 {
            build_id_bytes[20].min(MAX_BUILD_ID_SIZE as u8)
        } else {
            detect_build_id_len(&build_id_bytes[..MAX_BUILD_ID_SIZE])
        };
        let build_id = build_id_bytes[..build_id_len as usize].to_owned();

        Ok(Self {
            misc,
            pid,
            build_id,
            filename,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        let len = self.build_id.len().min(MAX_BUILD_ID_SIZE);
        buf.write_i32::<T>(self.pid)?;
        buf.extend_from_slice(&self.build_id[..len]);
        buf.resize(buf.len() + MAX_BUILD_ID_SIZE - len, 0);
        buf.push(len as u8);
        buf.extend_from_slice(&[0; 3]);
        write_padded_string(buf, &self.filename);
        Ok(())
    }
}
