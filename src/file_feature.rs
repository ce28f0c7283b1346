//! The simpleperf `FILE2` feature: one protobuf message per binary that
//! samples were attributed to, so that symbols survive without the binary.

use std::io::Write;

use byteorder::{ByteOrder, WriteBytesExt};
use prost::Message as _;

use crate::{Error, ReadError};

/// Values of [`FileFeature::r#type`].
pub const DSO_KERNEL: u32 = 0;
pub const DSO_KERNEL_MODULE: u32 = 1;
pub const DSO_ELF_FILE: u32 = 2;
pub const DSO_DEX_FILE: u32 = 3;
pub const DSO_SYMBOL_MAP_FILE: u32 = 4;
pub const DSO_UNKNOWN_FILE: u32 = 5;

#[derive(Clone, PartialEq, ::prost_derive::Message)]
pub struct FileFeature {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub r#type: u32,
    #[prost(uint64, tag = "3")]
    pub min_vaddr: u64,
    #[prost(message, repeated, tag = "4")]
    pub symbol: ::prost::alloc::vec::Vec<Symbol>,
    #[prost(oneof = "TypeSpecificInfo", tags = "5, 6, 7")]
    pub type_specific_info: ::core::option::Option<TypeSpecificInfo>,
}

#[derive(Clone, PartialEq, ::prost_derive::Message)]
pub struct Symbol {
    #[prost(uint64, tag = "1")]
    pub vaddr: u64,
    #[prost(uint32, tag = "2")]
    pub len: u32,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost_derive::Message)]
pub struct DexFile {
    #[prost(uint64, repeated, tag = "1")]
    pub dex_file_offset: ::prost::alloc::vec::Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost_derive::Message)]
pub struct ElfFile {
    #[prost(uint64, tag = "1")]
    pub file_offset_of_min_vaddr: u64,
}

#[derive(Clone, PartialEq, ::prost_derive::Message)]
pub struct KernelModule {
    #[prost(uint64, tag = "1")]
    pub memory_offset_of_min_vaddr: u64,
}

#[derive(Clone, PartialEq, ::prost_derive::Oneof)]
pub enum TypeSpecificInfo {
    #[prost(message, tag = "5")]
    DexFile(DexFile),
    #[prost(message, tag = "6")]
    ElfFile(ElfFile),
    #[prost(message, tag = "7")]
    KernelModule(KernelModule),
}

/// Parse the section: a sequence of u32 sizes, each followed by an encoded
/// [`FileFeature`].
pub fn parse_file2_section<T: ByteOrder>(data: &[u8]) -> Result<Vec<FileFeature>, Error> {
    let mut files = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(ReadError::String.into());
        }
        let size = T::read_u32(&rest[..4]) as usize;
        rest = &rest[4..];
        if rest.len() < size {
            return Err(ReadError::String.into());
        }
        files.push(FileFeature::decode(&rest[..size])?);
        rest = &rest[size..];
    }
    Ok(files)
}

pub fn write_file2_section<W: Write, T: ByteOrder>(
    mut writer: W,
    files: &[FileFeature],
) -> Result<(), std::io::Error> {
    for file in files {
        let bytes = file.encode_to_vec();
        writer.write_u32::<T>(bytes.len() as u32)?;
        writer.write_all(&bytes)?;
    }
    Ok(())
}
