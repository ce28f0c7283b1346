use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use linear_map::LinearMap;

use crate::build_id::BuildIdRecord;
use crate::error::Error;
use crate::event_type::EventType;
use crate::feature_sections::{
    AttributeDescription, AuxTraceIndex, AuxTraceIndexEntry, BuildIdList, Cmdline, NrCpus,
    PmuMappings,
};
use crate::features::{Feature, FeatureSet};
use crate::file_feature::{parse_file2_section, FileFeature};
use crate::header::PerfHeader;
use crate::simpleperf;

/// The byte order of a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    LittleEndian,
    BigEndian,
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Endianness::LittleEndian;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Endianness::BigEndian;
}

/// Contains the information from the header, the attr section and the
/// feature sections of a record file.
#[derive(Debug, Clone)]
pub struct RecordFile {
    pub(crate) endian: Endianness,
    pub(crate) header: PerfHeader,
    pub(crate) features: FeatureSet,
    pub(crate) feature_sections: LinearMap<Feature, Vec<u8>>,
    /// Guaranteed to have at least one element
    pub(crate) attributes: Vec<AttributeDescription>,
}

impl RecordFile {
    /// The endian of the file.
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    pub fn header(&self) -> &PerfHeader {
        &self.header
    }

    /// The attributes of the recorded events, in attr section order.
    /// Records refer to these by index.
    pub fn event_attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    /// The set of features present in the file.
    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// The raw payload of a feature section.
    pub fn feature_section_data(&self, feature: Feature) -> Option<&[u8]> {
        self.feature_sections.get(&feature).map(Vec::as_slice)
    }

    /// The host name of the machine the data was recorded on.
    pub fn hostname(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::HOSTNAME)
    }

    /// The OS release, e.g. the kernel version.
    pub fn os_release(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::OSRELEASE)
    }

    /// The version of the recording tool.
    pub fn version(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::VERSION)
    }

    /// The CPU architecture, e.g. `x86_64` or `aarch64`.
    pub fn arch(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::ARCH)
    }

    pub fn cpu_desc(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::CPUDESC)
    }

    pub fn cpu_id(&self) -> Result<Option<&str>, Error> {
        self.feature_string(Feature::CPUID)
    }

    /// The number of available and online CPUs.
    pub fn nr_cpus(&self) -> Result<Option<NrCpus>, Error> {
        self.feature_section_data(Feature::NRCPUS)
            .map(|section| {
                if section.len() < NrCpus::STRUCT_SIZE {
                    return Err(Error::NotEnoughSpaceForNrCpus);
                }
                let nr_cpus = match self.endian {
                    Endianness::LittleEndian => NrCpus::parse::<_, LittleEndian>(section),
                    Endianness::BigEndian => NrCpus::parse::<_, BigEndian>(section),
                }?;
                Ok(nr_cpus)
            })
            .transpose()
    }

    /// The command line that was used to create the file.
    pub fn cmdline(&self) -> Result<Option<Vec<String>>, Error> {
        self.feature_section_data(Feature::CMDLINE)
            .map(|section| {
                let args = match self.endian {
                    Endianness::LittleEndian => Cmdline::parse::<_, LittleEndian>(section),
                    Endianness::BigEndian => Cmdline::parse::<_, BigEndian>(section),
                }?;
                Ok(args)
            })
            .transpose()
    }

    /// The build ids from the build id feature section.
    pub fn build_ids(&self) -> Result<Vec<BuildIdRecord>, Error> {
        let Some(section) = self.feature_section_data(Feature::BUILD_ID) else {
            return Ok(Vec::new());
        };
        match self.endian {
            Endianness::LittleEndian => BuildIdList::parse::<LittleEndian>(section),
            Endianness::BigEndian => BuildIdList::parse::<BigEndian>(section),
        }
    }

    /// The positions of all auxtrace records in the data section.
    pub fn auxtrace_index(&self) -> Result<Vec<AuxTraceIndexEntry>, Error> {
        let Some(section) = self.feature_section_data(Feature::AUXTRACE) else {
            return Ok(Vec::new());
        };
        match self.endian {
            Endianness::LittleEndian => {
                AuxTraceIndex::parse::<_, LittleEndian>(section, section.len())
            }
            Endianness::BigEndian => AuxTraceIndex::parse::<_, BigEndian>(section, section.len()),
        }
    }

    /// The names of dynamic PMU types, keyed by attr type.
    pub fn pmu_mappings(&self) -> Result<Option<LinearMap<u32, String>>, Error> {
        self.feature_section_data(Feature::PMU_MAPPINGS)
            .map(|section| {
                let mappings = match self.endian {
                    Endianness::LittleEndian => PmuMappings::parse::<_, LittleEndian>(section),
                    Endianness::BigEndian => PmuMappings::parse::<_, BigEndian>(section),
                }?;
                Ok(mappings)
            })
            .transpose()
    }

    /// The key/value pairs of the simpleperf meta info section.
    pub fn simpleperf_meta_info(&self) -> Result<Option<HashMap<&str, &str>>, Error> {
        match self.feature_section_data(Feature::SIMPLEPERF_META_INFO) {
            Some(section) => Ok(Some(
                simpleperf::parse_meta_info_map(section).map_err(|_| Error::StringUtf8)?,
            )),
            None => Ok(None),
        }
    }

    /// The event types listed in the simpleperf meta info, in attr order.
    pub fn simpleperf_event_types(&self) -> Result<Option<Vec<EventType>>, Error> {
        Ok(self
            .simpleperf_meta_info()?
            .and_then(|info| simpleperf::get_event_types(&info)))
    }

    /// The per-binary symbol information of the simpleperf `FILE2` section.
    pub fn simpleperf_files(&self) -> Result<Vec<FileFeature>, Error> {
        let Some(section) = self.feature_section_data(Feature::SIMPLEPERF_FILE2) else {
            return Ok(Vec::new());
        };
        match self.endian {
            Endianness::LittleEndian => parse_file2_section::<LittleEndian>(section),
            Endianness::BigEndian => parse_file2_section::<BigEndian>(section),
        }
    }

    /// A string feature section.
    pub fn feature_string(&self, feature: Feature) -> Result<Option<&str>, Error> {
        match self.feature_section_data(feature) {
            Some(section) => Ok(Some(self.read_string(section)?.0)),
            None => Ok(None),
        }
    }

    fn read_string<'s>(&self, s: &'s [u8]) -> Result<(&'s str, &'s [u8]), Error> {
        if s.len() < 4 {
            return Err(Error::NotEnoughSpaceForStringLen);
        }
        let (len_bytes, rest) = s.split_at(4);
        let len = match self.endian {
            Endianness::LittleEndian => LittleEndian::read_u32(len_bytes),
            Endianness::BigEndian => BigEndian::read_u32(len_bytes),
        };
        let len = usize::try_from(len).map_err(|_| Error::StringLengthTooLong)?;
        if rest.len() < len {
            return Err(Error::StringLengthTooLong);
        }
        let (s, rest) = rest.split_at(len);
        let actual_len = memchr::memchr(0, s).unwrap_or(s.len());
        let s = std::str::from_utf8(&s[..actual_len]).map_err(|_| Error::StringUtf8)?;
        Ok((s, rest))
    }
}
