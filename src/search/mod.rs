//! 错配容忍搜索内核：同一输入/输出契约下的可互换实现
//! （CPU 参考实现，以及可选的 OpenCL 设备实现），由运行时能力探测选择。

use crate::error::Result;
use crate::index::IndexPartition;
use crate::io::reads::Read;
use crate::util::dna;

pub mod cpu;
#[cfg(feature = "opencl")]
pub mod opencl;

/// 错配预算：绝对数或 read 长度的百分比（二者互斥，向下取整）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MismatchBudget {
    Absolute(u32),
    Percent(f64),
}

impl MismatchBudget {
    /// 对给定 read 长度解析出有效预算。
    #[inline]
    pub fn resolve(&self, read_len: usize) -> u32 {
        match *self {
            MismatchBudget::Absolute(k) => k,
            MismatchBudget::Percent(p) => (read_len as f64 * p / 100.0).floor() as u32,
        }
    }
}

/// 搜索查询配置。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub budget: MismatchBudget,
    /// 是否同时搜索反向互补链
    pub search_revcomp: bool,
    /// 是否仅报告最小错配层（全局裁决在聚合阶段完成）
    pub best_only: bool,
}

/// 匹配方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}

/// 一条匹配记录：某 read 在某片段内某偏移处、某条链上的一次对齐。
/// 聚合阶段将片段内偏移换算为参考绝对坐标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    /// read 在所属批次内的序号
    pub read: usize,
    /// 片段序号
    pub fragment: u32,
    /// 片段拥有区间内的 0 基偏移
    pub offset: u32,
    pub strand: Strand,
    pub mismatches: u32,
    /// read 坐标系下的错配位置
    pub mismatch_positions: Vec<u32>,
}

/// read 被跳过的原因（记录诊断，不中断批次）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 没有任何有效碱基（空序列或纯 N）
    NoValidBases,
    /// 字母表与核酸搜索不兼容
    AlphabetMismatch,
}

/// 预筛 read：返回 `Some(reason)` 表示该 read 应被跳过并计数。
pub fn screen_read(read: &Read) -> Option<SkipReason> {
    if read.seq.is_empty() {
        return Some(SkipReason::NoValidBases);
    }
    if !dna::looks_nucleic(&read.seq) {
        let has_acgt = read
            .seq
            .iter()
            .any(|&b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U'));
        return Some(if has_acgt {
            SkipReason::AlphabetMismatch
        } else {
            SkipReason::NoValidBases
        });
    }
    None
}

/// 搜索内核契约：给定一个内存态分区与一批 read，返回预算内的全部匹配。
///
/// 两个实现必须对相同输入产出相同的记录集合（集合意义下，
/// 内部并列顺序允许实现相关）。CPU 实现是语义基准。
pub trait SearchKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// 对一个 (分区, 批次) 工作单元执行搜索。
    ///
    /// 预筛不通过的 read 由调用方跳过；内核自身对零长度分区
    /// 静默返回空集。设备内存不足返回 `DeviceResource`。
    fn search(
        &self,
        partition: &IndexPartition,
        reads: &[Read],
        config: &SearchConfig,
    ) -> Result<Vec<MatchRecord>>;
}

/// 对单个候选起点做带上界的逐碱基验证。预算内返回
/// (错配数, read 坐标系下的错配位置)。N 与任何碱基都不匹配。
#[inline]
pub(crate) fn verify_candidate(
    text: &[u8],
    candidate: usize,
    pattern: &[u8],
    budget: u32,
) -> Option<(u32, Vec<u32>)> {
    let window = &text[candidate..candidate + pattern.len()];
    let mut mismatches = 0u32;
    let mut positions = Vec::new();
    for (qi, (&a, &b)) in pattern.iter().zip(window).enumerate() {
        if a != b || a == dna::CODE_N {
            mismatches += 1;
            if mismatches > budget {
                return None;
            }
            positions.push(qi as u32);
        }
    }
    Some((mismatches, positions))
}

/// 按检测到的硬件能力选择内核：编译了 `opencl` 特性且存在可用
/// 设备时选择设备内核，否则使用 CPU 参考实现。
pub fn select_kernel() -> Box<dyn SearchKernel> {
    #[cfg(feature = "opencl")]
    {
        match opencl::OpenClKernel::probe() {
            Ok(Some(kernel)) => return Box::new(kernel),
            Ok(None) => {}
            Err(_) => {}
        }
    }
    Box::new(cpu::CpuKernel::new())
}
