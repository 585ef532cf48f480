//! Interconnect classification between pairs of devices

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of every key in the published topology map
pub const TOPOLOGY_KEY_PREFIX: &str = "GPU";

/// Interconnect quality between two devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    /// No information; never overrides another classification
    #[default]
    Unknown,
    /// Positively reported as not connected
    None,
    SameBoard,
    SingleSwitch,
    MultiSwitch,
    HostBridge,
    SameCpu,
    CrossCpu,
    #[serde(rename = "nvlink1")]
    NvLink1,
    #[serde(rename = "nvlink2")]
    NvLink2,
    #[serde(rename = "nvlink3")]
    NvLink3,
    #[serde(rename = "nvlink4")]
    NvLink4,
}

impl LinkType {
    /// Whether a probe produced a classification
    pub fn is_known(&self) -> bool {
        *self != LinkType::Unknown
    }

    /// Whether the pair has a detected link worth publishing
    pub fn is_link(&self) -> bool {
        !matches!(self, LinkType::Unknown | LinkType::None)
    }

    /// Classification for a number of NVLinks joining two devices
    pub fn from_nvlink_count(count: u32) -> Self {
        match count {
            0 => LinkType::Unknown,
            1 => LinkType::NvLink1,
            2 => LinkType::NvLink2,
            3 => LinkType::NvLink3,
            _ => LinkType::NvLink4,
        }
    }

    /// Short name used in topology keys (matches `nvidia-smi topo -m`)
    pub fn abbreviation(&self) -> &'static str {
        match self {
            LinkType::SameBoard => "PSB",
            LinkType::SingleSwitch => "PIX",
            LinkType::MultiSwitch => "PXB",
            LinkType::HostBridge => "PHB",
            LinkType::SameCpu => "NODE",
            LinkType::CrossCpu => "SYS",
            LinkType::NvLink1 => "NV1",
            LinkType::NvLink2 => "NV2",
            LinkType::NvLink3 => "NV3",
            LinkType::NvLink4 => "NV4",
            LinkType::None | LinkType::Unknown => "N-A",
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LinkType::Unknown => "N/A",
            LinkType::None => "No link",
            LinkType::SameBoard => "Same board",
            LinkType::SingleSwitch => "Single PCI switch",
            LinkType::MultiSwitch => "Multiple PCI switches",
            LinkType::HostBridge => "Host PCI bridge",
            LinkType::SameCpu => "Same CPU socket",
            LinkType::CrossCpu => "Cross CPU socket",
            LinkType::NvLink1 => "Single NVLink",
            LinkType::NvLink2 => "Two NVLinks",
            LinkType::NvLink3 => "Three NVLinks",
            LinkType::NvLink4 => "Four NVLinks",
        };
        f.write_str(text)
    }
}

/// Square, symmetric link classification over the devices of one node.
///
/// Positions follow inventory order; `labels[i]` is the device index of the
/// device at position `i`. The diagonal is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyMatrix {
    labels: Vec<u32>,
    cells: Vec<LinkType>,
}

impl TopologyMatrix {
    /// Create a matrix with every cell `Unknown`
    pub fn new(labels: Vec<u32>) -> Self {
        let n = labels.len();
        Self {
            labels,
            cells: vec![LinkType::Unknown; n * n],
        }
    }

    /// Number of devices covered
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Device index labels, by position
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Classification between positions `i` and `j`
    pub fn get(&self, i: usize, j: usize) -> LinkType {
        let n = self.len();
        if i >= n || j >= n {
            return LinkType::Unknown;
        }
        self.cells[i * n + j]
    }

    /// Record the classification for the unordered pair `{i, j}`.
    /// Both triangles are written together so the matrix stays symmetric.
    pub fn set_pair(&mut self, i: usize, j: usize, link: LinkType) {
        let n = self.len();
        if i == j || i >= n || j >= n {
            return;
        }
        self.cells[i * n + j] = link;
        self.cells[j * n + i] = link;
    }

    /// Sparse map from `GPU_<abbr>_<lower>_<higher>` to the link description.
    ///
    /// Unlinked pairs are omitted.
    pub fn to_annotation_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for i in 0..self.len() {
            for j in (i + 1)..self.len() {
                let link = self.get(i, j);
                if !link.is_link() {
                    continue;
                }
                let (a, b) = (self.labels[i], self.labels[j]);
                let (lower, higher) = if a <= b { (a, b) } else { (b, a) };
                map.insert(
                    format!(
                        "{}_{}_{}_{}",
                        TOPOLOGY_KEY_PREFIX,
                        link.abbreviation(),
                        lower,
                        higher
                    ),
                    link.to_string(),
                );
            }
        }
        map
    }

    /// JSON encoding of [`Self::to_annotation_map`]
    pub fn to_annotation_json(&self) -> crate::GpuShareResult<String> {
        Ok(serde_json::to_string(&self.to_annotation_map())?)
    }
}
