//! 分区后缀数组索引：参考序列切分为内存受限的片段，
//! 每个片段独立建后缀数组，三份制品落盘（meta / ref / sarr）。

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{AlignerError, Result};
use crate::util::dna;

pub mod partition;
pub mod sa;
pub mod store;

/// 磁盘格式版本，结构变更时递增。
pub const FORMAT_VERSION: u32 = 1;

/// 参考序列的一个连续片段。
///
/// `seq` 为字母表编码的碱基，长度为 `len + tail`：片段自身拥有的
/// `[start, start+len)` 区间，外加从后继区间复制的至多 `overlap` 个
/// 碱基的延伸尾巴，使跨片段边界起始的 read 也能在本片段内完整验证。
/// 覆盖性不变式只针对拥有区间：所有片段的拥有区间恰好无缝拼出参考序列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// 片段序号（0 起）
    pub index: u32,
    /// 在参考序列上的起始绝对坐标
    pub start: u64,
    /// 拥有区间长度
    pub len: u32,
    /// 编码后的碱基，含延伸尾巴
    pub seq: Vec<u8>,
}

impl Fragment {
    /// 延伸尾巴的长度。
    #[inline]
    pub fn tail_len(&self) -> usize {
        self.seq.len() - self.len as usize
    }
}

/// 一个片段与其后缀数组的配对：持久化与搜索分发的基本单元。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPartition {
    pub fragment: Fragment,
    /// 含尾巴序列全部偏移的置换，按后缀字典序排序。尾巴内的偏移
    /// 也在内：段锚定的出现可能整个落在尾巴里，而候选起点仍在
    /// 拥有区间内；候选越界由搜索内核裁剪
    pub sa: Vec<u32>,
}

/// meta 文件中记录的单片段布局。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSpan {
    pub start: u64,
    pub len: u32,
    /// 含尾巴的序列长度
    pub padded_len: u32,
    /// 片段序列在 `.ref` 文件中的字节偏移
    pub ref_offset: u64,
    /// 后缀数组在 `.sarr` 文件中的字节偏移
    pub sarr_offset: u64,
}

/// 索引全局元数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    /// 参考序列标识（FASTA 记录 id）
    pub reference_name: String,
    /// 参考序列总长
    pub total_len: u64,
    /// 构建时使用的分片大小
    pub fragment_size: u32,
    /// 构建时使用的延伸尾巴上限
    pub overlap: u32,
    pub fragments: Vec<FragmentSpan>,
    /// 由参考标识与分片参数导出的指纹，用于陈旧检测
    pub fingerprint: u64,
    /// 构建时间（RFC 3339）
    pub built_at: String,
}

impl IndexMeta {
    /// 由参考标识与分片参数导出内容指纹。
    pub fn fingerprint_of(name: &str, total_len: u64, fragment_size: u32, overlap: u32) -> u64 {
        let mut h = Xxh64::new(0);
        h.update(name.as_bytes());
        h.update(&total_len.to_le_bytes());
        h.update(&fragment_size.to_le_bytes());
        h.update(&overlap.to_le_bytes());
        h.digest()
    }

    /// 单个分区驻留内存的估算上界（序列字节 + u32 后缀数组）。
    pub fn max_partition_bytes(&self) -> usize {
        self.fragments
            .iter()
            .map(|f| f.padded_len as usize * 5)
            .max()
            .unwrap_or(0)
    }
}

/// 完整的内存态索引：元数据加有序分区列表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeIndex {
    pub meta: IndexMeta,
    pub partitions: Vec<IndexPartition>,
}

/// 搜索阶段获取分区的统一入口：内存态索引直接出借，
/// 磁盘索引按需读取单个分区，保证同时驻留的分区数受限于工作线程数。
pub trait PartitionSource: Sync {
    fn meta(&self) -> &IndexMeta;
    fn fetch(&self, index: usize) -> Result<Cow<'_, IndexPartition>>;
}

impl PartitionSource for GenomeIndex {
    fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    fn fetch(&self, index: usize) -> Result<Cow<'_, IndexPartition>> {
        Ok(Cow::Borrowed(&self.partitions[index]))
    }
}

/// 从原始 ASCII 参考序列构建完整索引。
///
/// 非核酸序列返回 `UnsupportedAlphabet`；分片参数非法返回 `Configuration`。
pub fn build_index(
    reference_name: &str,
    reference: &[u8],
    fragment_size: u32,
    overlap: u32,
) -> Result<GenomeIndex> {
    if !dna::looks_nucleic(reference) {
        return Err(AlignerError::UnsupportedAlphabet(format!(
            "reference '{reference_name}' does not look like a nucleotide sequence"
        )));
    }

    let encoded = dna::encode_seq(reference);
    let fragments = partition::partition_reference(&encoded, fragment_size, overlap)?;

    let mut partitions = Vec::with_capacity(fragments.len());
    let mut spans = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let sa = sa::build_suffix_array(&fragment.seq)?;
        spans.push(FragmentSpan {
            start: fragment.start,
            len: fragment.len,
            padded_len: fragment.seq.len() as u32,
            // 落盘时由 store 回填
            ref_offset: 0,
            sarr_offset: 0,
        });
        partitions.push(IndexPartition { fragment, sa });
    }

    let total_len = reference.len() as u64;
    let meta = IndexMeta {
        format_version: FORMAT_VERSION,
        reference_name: reference_name.to_string(),
        total_len,
        fragment_size,
        overlap,
        fragments: spans,
        fingerprint: IndexMeta::fingerprint_of(reference_name, total_len, fragment_size, overlap),
        built_at: chrono::Utc::now().to_rfc3339(),
    };

    Ok(GenomeIndex { meta, partitions })
}
