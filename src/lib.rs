//! # galign
//!
//! 基于分区后缀数组的短 read 比对器。
//!
//! 本 crate 把参考序列切分为内存受限的片段，对每个片段独立构建
//! 后缀数组，再用鸽笼锚定在错配预算内搜索 read，包括：
//!
//! - **索引构建**：参考序列分片 + 逐片段后缀数组，三份制品落盘
//! - **错配容忍搜索**：鸽笼切分 + 后缀数组二分 + 候选验证
//! - **流水化调度**：read 批次装载与搜索重叠，rayon 分区并行
//! - **确定性聚合**：绝对坐标换算、全局 best-only 裁决、按输入顺序发射
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use galign::align::{AlignConfig, Aligner, CancelToken, IndexInput};
//! use galign::io::fastq::FastqSource;
//! use galign::io::sam::SamWriter;
//! use galign::search::MismatchBudget;
//! use std::path::Path;
//!
//! let config = AlignConfig {
//!     budget: MismatchBudget::Absolute(2),
//!     search_revcomp: true,
//!     ..AlignConfig::default()
//! };
//! let aligner = Aligner::new(config)?;
//!
//! let input = IndexInput::Sequence { name: "chr1", seq: b"ACGTACGTAGCTGATCGTAG" };
//! let reads = FastqSource::open(Path::new("reads.fastq"))?;
//! let mut sink = SamWriter::create(Path::new("out.sam"))?;
//!
//! let outcome = aligner.run(&input, reads, &mut sink, &CancelToken::new())?;
//! println!("{:.1}% aligned", outcome.stats.percent_aligned());
//! # Ok::<(), galign::error::AlignerError>(())
//! ```
//!
//! ## 模块说明
//!
//! - [`io`] — FASTA / FASTQ 解析、read 批次装载、SAM 输出
//! - [`index`] — 参考分片、后缀数组构建、索引持久化
//! - [`search`] — 错配容忍搜索内核（CPU 参考实现与可选设备实现）
//! - [`align`] — 比对调度器（阶段状态机、并行分发、聚合发射）
//! - [`util`] — DNA 编码 / 解码 / 反向互补等工具函数
//! - [`error`] — 错误分类与统一 [`Result`] 别名

pub mod align;
pub mod error;
pub mod index;
pub mod io;
pub mod search;
pub mod util;

pub use error::Result;
