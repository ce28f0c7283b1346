use std::fmt;

/// A piece of optional data stored in a record file. Its data is contained in a
/// "feature section" at the end of the file.
///
/// For each used feature, a bit is set in the feature flags in the file header.
/// The feature sections are stored just after the file's data section; there's
/// one section for each enabled feature, ordered from low feature bit to high
/// feature bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Feature(pub u32);

impl Feature {
    pub const TRACING_DATA: Self = Self(1);
    pub const BUILD_ID: Self = Self(2);
    pub const HOSTNAME: Self = Self(3);
    pub const OSRELEASE: Self = Self(4);
    pub const VERSION: Self = Self(5);
    pub const ARCH: Self = Self(6);
    pub const NRCPUS: Self = Self(7);
    pub const CPUDESC: Self = Self(8);
    pub const CPUID: Self = Self(9);
    pub const TOTAL_MEM: Self = Self(10);
    pub const CMDLINE: Self = Self(11);
    pub const EVENT_DESC: Self = Self(12);
    pub const CPU_TOPOLOGY: Self = Self(13);
    pub const NUMA_TOPOLOGY: Self = Self(14);
    pub const BRANCH_STACK: Self = Self(15);
    pub const PMU_MAPPINGS: Self = Self(16);
    pub const GROUP_DESC: Self = Self(17);
    pub const AUXTRACE: Self = Self(18);
    pub const STAT: Self = Self(19);
    pub const CACHE: Self = Self(20);
    pub const SAMPLE_TIME: Self = Self(21);
    pub const SAMPLE_TOPOLOGY: Self = Self(22);
    pub const CLOCKID: Self = Self(23);
    pub const DIR_FORMAT: Self = Self(24);
    pub const BPF_PROG_INFO: Self = Self(25);
    pub const BPF_BTF: Self = Self(26);
    pub const COMPRESSED: Self = Self(27);
    pub const CPU_PMU_CAPS: Self = Self(28);
    pub const CLOCK_DATA: Self = Self(29);
    pub const HYBRID_TOPOLOGY: Self = Self(30);
    pub const HYBRID_CPU_PMU_CAPS: Self = Self(31);

    /// simpleperf `FEAT_META_INFO`
    pub const SIMPLEPERF_META_INFO: Self = Self(128);
    /// simpleperf `FEAT_DEBUG_UNWIND`
    pub const SIMPLEPERF_DEBUG_UNWIND: Self = Self(129);
    /// simpleperf `FEAT_DEBUG_UNWIND_FILE`
    pub const SIMPLEPERF_DEBUG_UNWIND_FILE: Self = Self(130);
    /// simpleperf `FEAT_FILE2`
    pub const SIMPLEPERF_FILE2: Self = Self(131);

    /// The largest feature id that fits into the header's feature bitmask.
    pub const MAX: Self = Self(255);

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::TRACING_DATA => "TRACING_DATA",
            Self::BUILD_ID => "BUILD_ID",
            Self::HOSTNAME => "HOSTNAME",
            Self::OSRELEASE => "OSRELEASE",
            Self::VERSION => "VERSION",
            Self::ARCH => "ARCH",
            Self::NRCPUS => "NRCPUS",
            Self::CPUDESC => "CPUDESC",
            Self::CPUID => "CPUID",
            Self::TOTAL_MEM => "TOTAL_MEM",
            Self::CMDLINE => "CMDLINE",
            Self::EVENT_DESC => "EVENT_DESC",
            Self::CPU_TOPOLOGY => "CPU_TOPOLOGY",
            Self::NUMA_TOPOLOGY => "NUMA_TOPOLOGY",
            Self::BRANCH_STACK => "BRANCH_STACK",
            Self::PMU_MAPPINGS => "PMU_MAPPINGS",
            Self::GROUP_DESC => "GROUP_DESC",
            Self::AUXTRACE => "AUXTRACE",
            Self::STAT => "STAT",
            Self::CACHE => "CACHE",
            Self::SAMPLE_TIME => "SAMPLE_TIME",
            Self::SAMPLE_TOPOLOGY => "SAMPLE_TOPOLOGY",
            Self::CLOCKID => "CLOCKID",
            Self::DIR_FORMAT => "DIR_FORMAT",
            Self::BPF_PROG_INFO => "BPF_PROG_INFO",
            Self::BPF_BTF => "BPF_BTF",
            Self::COMPRESSED => "COMPRESSED",
            Self::CPU_PMU_CAPS => "CPU_PMU_CAPS",
            Self::CLOCK_DATA => "CLOCK_DATA",
            Self::HYBRID_TOPOLOGY => "HYBRID_TOPOLOGY",
            Self::HYBRID_CPU_PMU_CAPS => "HYBRID_CPU_PMU_CAPS",
            Self::SIMPLEPERF_META_INFO => "SIMPLEPERF_META_INFO",
            Self::SIMPLEPERF_DEBUG_UNWIND => "SIMPLEPERF_DEBUG_UNWIND",
            Self::SIMPLEPERF_DEBUG_UNWIND_FILE => "SIMPLEPERF_DEBUG_UNWIND_FILE",
            Self::SIMPLEPERF_FILE2 => "SIMPLEPERF_FILE2",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Feature> for u32 {
    fn from(feature: Feature) -> Self {
        feature.0
    }
}

/// The set of features used in the record file. The file contains one
/// feature section for each feature. This set is provided in the file header.
///
/// The set has room for 4 * 64 = 256 feature bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(pub [u64; 4]);

impl FeatureSet {
    /// The number of features in this set.
    pub fn len(&self) -> usize {
        let b = &self.0;
        let len = b[0].count_ones() + b[1].count_ones() + b[2].count_ones() + b[3].count_ones();
        len as usize
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == [0, 0, 0, 0]
    }

    /// Emits all features in this set, from low to high.
    pub fn iter(&self) -> FeatureSetIter {
        FeatureSetIter {
            current_feature: 0,
            set: *self,
        }
    }

    /// Checks if the feature is contained in this set.
    #[inline]
    pub fn has_feature(&self, feature: Feature) -> bool {
        if feature > Feature::MAX {
            return false;
        }
        let features_chunk_index = (feature.0 / 64) as usize;
        let feature_bit = feature.0 % 64;
        let features_chunk = self.0[features_chunk_index];
        (features_chunk & (1 << feature_bit)) != 0
    }

    /// Adds the feature. Returns false if its id does not fit into the set.
    pub fn insert(&mut self, feature: Feature) -> bool {
        if feature > Feature::MAX {
            return false;
        }
        self.0[(feature.0 / 64) as usize] |= 1 << (feature.0 % 64);
        true
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        let mut set = FeatureSet::default();
        for feature in iter {
            set.insert(feature);
        }
        set
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

pub struct FeatureSetIter {
    current_feature: u32,
    set: FeatureSet,
}

impl Iterator for FeatureSetIter {
    type Item = Feature;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_feature <= Feature::MAX.0 {
            let feature = Feature(self.current_feature);
            self.current_feature += 1;

            if self.set.has_feature(feature) {
                return Some(feature);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iterates_low_to_high() {
        let set: FeatureSet = [
            Feature::SIMPLEPERF_META_INFO,
            Feature::BUILD_ID,
            Feature::CMDLINE,
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Feature::BUILD_ID, Feature::CMDLINE, Feature::SIMPLEPERF_META_INFO]
        );
        assert_eq!(set.0[2], 1);
        assert!(!set.has_feature(Feature::HOSTNAME));
        assert!(!FeatureSet::default().insert(Feature(300)));
        assert_eq!(format!("{:?}", Feature(77)), "Unknown(77)");
    }
}
