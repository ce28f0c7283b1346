use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};
use linear_map::LinearMap;

use super::section::PerfFileSection;
use crate::attr::PerfEventAttr;
use crate::build_id::BuildIdRecord;
use crate::cursor::{align8, read_bytes, RecordCursor};
use crate::record_header::RecordHeader;
use crate::{Error, ReadError};

/// The number of available and online CPUs. (`nr_cpus`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrCpus {
    /// CPUs not yet onlined
    pub nr_cpus_available: u32,
    pub nr_cpus_online: u32,
}

impl NrCpus {
    pub const STRUCT_SIZE: usize = 4 + 4;

    pub fn parse<R: Read, T: ByteOrder>(mut reader: R) -> Result<Self, std::io::Error> {
        let nr_cpus_available = reader.read_u32::<T>()?;
        let nr_cpus_online = reader.read_u32::<T>()?;
        Ok(Self {
            nr_cpus_available,
            nr_cpus_online,
        })
    }

    pub fn write<W: Write, T: ByteOrder>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u32::<T>(self.nr_cpus_available)?;
        writer.write_u32::<T>(self.nr_cpus_online)?;
        Ok(())
    }
}

/// `perf_header_string`: a u32 length followed by that many bytes, which
/// hold a NUL-terminated string padded to a multiple of 8.
pub struct HeaderString;

impl HeaderString {
    /// Parse a string.
    pub fn parse<R: Read, T: ByteOrder>(mut reader: R) -> Result<Option<String>, std::io::Error> {
        let len = reader.read_u32::<T>()?;
        let mut s = read_bytes(&mut reader, u64::from(len))?;
        let actual_len = memchr::memchr(0, &s).unwrap_or(s.len());
        s.truncate(actual_len);
        Ok(String::from_utf8(s).ok())
    }

    pub fn write<W: Write, T: ByteOrder>(mut writer: W, s: &str) -> Result<(), std::io::Error> {
        let padded_len = align8(s.len() + 1);
        writer.write_u32::<T>(padded_len as u32)?;
        writer.write_all(s.as_bytes())?;
        writer.write_all(&vec![0; padded_len - s.len()])?;
        Ok(())
    }
}

/// `HEADER_CMDLINE`: a u32 count followed by that many header strings.
pub struct Cmdline;

impl Cmdline {
    pub fn parse<R: Read, T: ByteOrder>(mut reader: R) -> Result<Vec<String>, std::io::Error> {
        let nr = reader.read_u32::<T>()?;
        let mut args = Vec::new();
        for _ in 0..nr {
            args.push(HeaderString::parse::<_, T>(&mut reader)?.unwrap_or_default());
        }
        Ok(args)
    }

    pub fn write<W: Write, T: ByteOrder>(
        mut writer: W,
        args: &[impl AsRef<str>],
    ) -> Result<(), std::io::Error> {
        writer.write_u32::<T>(args.len() as u32)?;
        for arg in args {
            HeaderString::write::<_, T>(&mut writer, arg.as_ref())?;
        }
        Ok(())
    }
}

/// `HEADER_BUILD_ID`: a sequence of build id records, each with its own
/// record header.
pub struct BuildIdList;

impl BuildIdList {
    pub fn parse<T: ByteOrder>(data: &[u8]) -> Result<Vec<BuildIdRecord>, Error> {
        let mut build_ids = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let header = RecordHeader::parse::<T>(rest).map_err(|_| ReadError::BuildIdSection)?;
            let size = header.size as usize;
            if size < RecordHeader::STRUCT_SIZE || size > rest.len() {
                return Err(ReadError::BuildIdSection.into());
            }
            let body = &rest[RecordHeader::STRUCT_SIZE..size];
            let mut cur = RecordCursor::<T>::new(body, header.type_);
            build_ids.push(BuildIdRecord::parse(&mut cur, header.misc)?);
            rest = &rest[size..];
        }
        Ok(build_ids)
    }

    pub fn write<W: Write, T: ByteOrder>(
        mut writer: W,
        build_ids: &[BuildIdRecord],
    ) -> Result<(), Error> {
        for build_id in build_ids {
            let bytes = crate::Record::BuildId(build_id.clone()).serialize::<T>()?;
            writer.write_all(&bytes)?;
        }
        Ok(())
    }
}

/// `HEADER_AUXTRACE`: the file position of every auxtrace record in the data
/// section, so that aux data can be read without scanning the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxTraceIndexEntry {
    /// The file offset of the auxtrace record.
    pub offset: u64,
    /// The size of the auxtrace record, including the aux data after it.
    pub size: u64,
}

pub struct AuxTraceIndex;

impl AuxTraceIndex {
    const VERSION: u64 = 1;

    pub fn parse<R: Read, T: ByteOrder>(
        mut reader: R,
        section_size: usize,
    ) -> Result<Vec<AuxTraceIndexEntry>, Error> {
        if section_size < 8 {
            return Err(ReadError::AuxtraceSection.into());
        }
        let _version = reader.read_u64::<T>()?;
        let count = (section_size - 8) / 16;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = reader.read_u64::<T>()?;
            let size = reader.read_u64::<T>()?;
            entries.push(AuxTraceIndexEntry { offset, size });
        }
        Ok(entries)
    }

    pub fn write<W: Write, T: ByteOrder>(
        mut writer: W,
        entries: &[AuxTraceIndexEntry],
    ) -> Result<(), std::io::Error> {
        writer.write_u64::<T>(Self::VERSION)?;
        for entry in entries {
            writer.write_u64::<T>(entry.offset)?;
            writer.write_u64::<T>(entry.size)?;
        }
        Ok(())
    }
}

/// A single event attr with name and corresponding event IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescription {
    pub attr: PerfEventAttr,
    pub name: Option<String>,
    pub event_ids: Vec<u64>,
}

impl AttributeDescription {
    /// Parse the `HEADER_EVENT_DESC` section of a record file into a Vec of `AttributeDescription` structs.
    pub fn parse_event_desc_section<R: Read, T: ByteOrder>(
        mut reader: R,
    ) -> Result<Vec<Self>, std::io::Error> {
        // ```c
        // struct {
        //   uint32_t nr; /* number of events */
        //   uint32_t attr_size; /* size of each perf_event_attr */
        //   struct {
        //     struct perf_event_attr attr;  /* size of attr_size */
        //     uint32_t nr_ids;
        //     struct perf_header_string event_string;
        //     uint64_t ids[nr_ids];
        //   } events[nr]; /* Variable length records */
        // };
        // ```
        let nr = reader.read_u32::<T>()?;
        let mut attributes = Vec::new();
        let attr_size = reader.read_u32::<T>()?;
        for _ in 0..nr {
            let attr = PerfEventAttr::parse::<_, T>(&mut reader, Some(attr_size))?;
            let nr_ids = reader.read_u32::<T>()?;
            let event_string = HeaderString::parse::<_, T>(&mut reader)?;
            let mut ids = Vec::new();
            for _ in 0..nr_ids {
                ids.push(reader.read_u64::<T>()?);
            }
            attributes.push(AttributeDescription {
                attr,
                name: event_string,
                event_ids: ids,
            });
        }
        Ok(attributes)
    }

    /// Write the `HEADER_EVENT_DESC` section.
    pub fn write_event_desc_section<W: Write, T: ByteOrder>(
        mut writer: W,
        attributes: &[Self],
    ) -> Result<(), std::io::Error> {
        writer.write_u32::<T>(attributes.len() as u32)?;
        writer.write_u32::<T>(PerfEventAttr::STRUCT_SIZE)?;
        for desc in attributes {
            desc.attr.write::<_, T>(&mut writer)?;
            writer.write_u32::<T>(desc.event_ids.len() as u32)?;
            HeaderString::write::<_, T>(&mut writer, desc.name.as_deref().unwrap_or(""))?;
            for id in &desc.event_ids {
                writer.write_u64::<T>(*id)?;
            }
        }
        Ok(())
    }

    /// Parse the `attr` section of a record file. Each entry is a
    /// `perf_file_attr`: the attr, followed by a section pointing at the
    /// list of event ids for that attr.
    ///
    /// The names come from elsewhere in the file; they are `None` here.
    pub fn parse_attr_section<C: Read + Seek, T: ByteOrder>(
        mut cursor: C,
        attr_section: &PerfFileSection,
        attr_size: u64,
    ) -> Result<Vec<Self>, Error> {
        if attr_size <= PerfFileSection::STRUCT_SIZE {
            return Err(ReadError::AttrsSection.into());
        }
        let attr_struct_size = u32::try_from(attr_size - PerfFileSection::STRUCT_SIZE)
            .map_err(|_| ReadError::AttrsSection)?;
        let file_len = cursor.seek(SeekFrom::End(0))?;

        cursor.seek(SeekFrom::Start(attr_section.offset))?;
        let attr_count = attr_section.size / attr_size;
        let mut entries = Vec::new();
        for _ in 0..attr_count {
            let attr = PerfEventAttr::parse::<_, T>(&mut cursor, Some(attr_struct_size))
                .map_err(|_| ReadError::PerfEventAttr)?;
            let ids_section =
                PerfFileSection::parse::<_, T>(&mut cursor).map_err(|_| ReadError::AttrsSection)?;
            if ids_section
                .offset
                .checked_add(ids_section.size)
                .is_none_or(|end| end > file_len)
            {
                return Err(Error::SectionOutOfBounds("event ids"));
            }
            entries.push((attr, ids_section));
        }

        let mut attributes = Vec::with_capacity(entries.len());
        for (attr, section) in entries {
            cursor.seek(SeekFrom::Start(section.offset))?;
            // This section is just a list of u64 event IDs.
            let id_count = section.size / 8;
            let mut event_ids = Vec::with_capacity(id_count as usize);
            for _ in 0..id_count {
                event_ids.push(cursor.read_u64::<T>()?);
            }
            attributes.push(AttributeDescription {
                attr,
                name: None,
                event_ids,
            });
        }
        Ok(attributes)
    }

    /// The event attributes.
    pub fn attributes(&self) -> &PerfEventAttr {
        &self.attr
    }

    /// The event name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The IDs for this event.
    pub fn ids(&self) -> &[u64] {
        &self.event_ids
    }
}

/// The names of the dynamic PMU types, keyed by the attr `type_` value.
///
/// For example, this allows you to find out whether an event with a
/// dynamic type is a kprobe or a uprobe, which then lets you interpret
/// the meaning of the config fields.
pub struct PmuMappings;

impl PmuMappings {
    pub fn parse<R: Read, T: ByteOrder>(
        mut reader: R,
    ) -> Result<LinearMap<u32, String>, std::io::Error> {
        // struct {
        //     uint32_t nr;
        //     struct pmu {
        //        uint32_t pmu_type;
        //        struct perf_header_string pmu_name;
        //     } [nr]; /* Variable length records */
        // };
        let nr = reader.read_u32::<T>()?;
        let mut vec = Vec::new();
        for _ in 0..nr {
            let pmu_type = reader.read_u32::<T>()?;
            if let Some(pmu_name) = HeaderString::parse::<_, T>(&mut reader)? {
                vec.push((pmu_type, pmu_name));
            }
        }
        vec.sort_by_key(|item| item.0);
        Ok(vec.into_iter().collect())
    }

    pub fn write<W: Write, T: ByteOrder>(
        mut writer: W,
        mappings: &LinearMap<u32, String>,
    ) -> Result<(), std::io::Error> {
        writer.write_u32::<T>(mappings.len() as u32)?;
        for (pmu_type, name) in mappings {
            writer.write_u32::<T>(*pmu_type)?;
            HeaderString::write::<_, T>(&mut writer, name)?;
        }
        Ok(())
    }
}
