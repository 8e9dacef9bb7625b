//! 比对调度器：驱动
//! `Configuring → IndexReady → Searching → Aggregating → Done | Failed | Cancelled`
//! 状态机，把 (分区, read 批次) 工作单元分发到 rayon 工作池，
//! 对异步回流的部分结果做确定性聚合，并按输入顺序发射最终结果。

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::error::{AlignerError, Result};
use crate::index::{self, GenomeIndex, IndexMeta, PartitionSource};
use crate::index::store::IndexStore;
use crate::io::reads::{Batch, BatchLoader, Read, ReadSource};
use crate::io::sam::ResultSink;
use crate::search::cpu::CpuKernel;
use crate::search::{MatchRecord, MismatchBudget, SearchConfig, SearchKernel, Strand};

/// 运行阶段。用于错误归属与进度报告。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    IndexReady,
    Searching,
    Aggregating,
    Done,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Configuring => "Configuring",
            Phase::IndexReady => "IndexReady",
            Phase::Searching => "Searching",
            Phase::Aggregating => "Aggregating",
            Phase::Done => "Done",
            Phase::Failed => "Failed",
            Phase::Cancelled => "Cancelled",
        }
    }
}

/// 运行级取消令牌：在工作单元之间被检查，不打断单元内部执行；
/// 在途单元自然结束后不再派发新单元。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 一次比对运行的完整配置面。
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// 分片大小（碱基数）
    pub fragment_size: u32,
    /// 片段延伸尾巴上限；决定能跨边界匹配的最大 read 长度
    pub overlap: u32,
    /// 总内存上限（字节）：同时驻留的分区 + read 批次缓冲
    pub memory_limit: usize,
    /// 错配预算（绝对数与百分比互斥，由枚举天然保证）
    pub budget: MismatchBudget,
    pub search_revcomp: bool,
    pub best_only: bool,
    /// 最低质量阈值；无质量信息的 read 不受影响
    pub min_quality: Option<u8>,
    /// 全轮匹配总数上限
    pub max_results: usize,
    pub threads: usize,
    /// 相邻 read 配对
    pub paired: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            fragment_size: 16 * 1024 * 1024,
            overlap: 1024,
            memory_limit: 512 * 1024 * 1024,
            budget: MismatchBudget::Absolute(0),
            search_revcomp: false,
            best_only: false,
            min_quality: None,
            max_results: 10_000_000,
            threads: 1,
            paired: false,
        }
    }
}

/// 比对的参考来源：原始序列（现场建索引）或磁盘上的预建索引。
/// 二者互斥由枚举保证。
pub enum IndexInput<'a> {
    Sequence { name: &'a str, seq: &'a [u8] },
    Prebuilt(&'a Path),
}

/// 阶段边界回传的运行统计；不依赖任何进程级单例。
#[derive(Debug, Clone, Default)]
pub struct AlignStats {
    pub reads_total: usize,
    pub reads_aligned: usize,
    /// 因质量阈值被过滤
    pub reads_filtered: usize,
    /// 因字母表问题被跳过
    pub reads_skipped: usize,
    pub matches_emitted: usize,
    /// 达到结果上限后被截断。超限不是错误：运行正常收尾并发射
    /// 截断前的全部匹配，超限语义由本标志承载
    pub truncated: bool,
    pub index_elapsed: Duration,
    pub load_elapsed: Duration,
    pub search_elapsed: Duration,
    pub write_elapsed: Duration,
}

impl AlignStats {
    pub fn percent_aligned(&self) -> f64 {
        if self.reads_total == 0 {
            0.0
        } else {
            self.reads_aligned as f64 * 100.0 / self.reads_total as f64
        }
    }
}

/// 运行结束状态。取消的运行不发射任何输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct AlignOutcome {
    pub status: RunStatus,
    pub stats: AlignStats,
}

/// 一条最终匹配：绝对参考坐标 + 片段内定位 + 链 + 错配信息。
/// 发射后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub coordinate: u64,
    pub fragment: u32,
    pub offset: u32,
    pub strand: Strand,
    pub mismatches: u32,
    pub mismatch_positions: Vec<u32>,
}

/// 一条 read 的全部匹配，按 (错配数升序, 坐标升序) 排列；
/// best-only 模式下截到全局最小错配层。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentResultSet {
    pub matches: Vec<Match>,
}

/// 比对调度器本体。
pub struct Aligner {
    config: AlignConfig,
    kernel: Box<dyn SearchKernel>,
    /// 设备内核二次失败后的单元级回退
    fallback: CpuKernel,
}

impl Aligner {
    /// `Configuring` 阶段：校验配置并确认 read 批次内存预算为正。
    pub fn new(config: AlignConfig) -> Result<Self> {
        Self::with_kernel(config, crate::search::select_kernel())
    }

    pub fn with_kernel(config: AlignConfig, kernel: Box<dyn SearchKernel>) -> Result<Self> {
        validate(&config).map_err(|e| e.in_phase(Phase::Configuring.name()))?;
        Ok(Aligner {
            config,
            kernel,
            fallback: CpuKernel::new(),
        })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    fn search_config(&self) -> SearchConfig {
        SearchConfig {
            budget: self.config.budget,
            search_revcomp: self.config.search_revcomp,
            best_only: self.config.best_only,
        }
    }

    /// `IndexReady` 阶段：现场构建或从磁盘打开索引。
    /// 磁盘索引的分片参数不符时返回 `StaleIndex`，由调用方决定重建；
    /// 本方法绝不静默重建。
    pub fn prepare_index(&self, input: &IndexInput<'_>) -> Result<PreparedIndex> {
        let phase = Phase::IndexReady.name();
        match input {
            IndexInput::Sequence { name, seq } => {
                let idx = index::build_index(name, seq, self.config.fragment_size, self.config.overlap)
                    .map_err(|e| e.in_phase(phase))?;
                Ok(PreparedIndex::InMemory(idx))
            }
            IndexInput::Prebuilt(prefix) => {
                let store = IndexStore::open(prefix, Some(self.config.fragment_size))
                    .map_err(|e| e.in_phase(phase))?;
                Ok(PreparedIndex::OnDisk(store))
            }
        }
    }

    /// 执行一次完整运行：索引准备、流水化搜索、确定性聚合与发射。
    ///
    /// 批次 N+1 的装载与批次 N 的搜索重叠（容量 1 的有界通道），
    /// 两者共享同一内存上限。取消后不再派发新单元，已产出的记录
    /// 全部丢弃，输出文件由 sink 撤销。
    pub fn run<S>(
        &self,
        input: &IndexInput<'_>,
        reads: S,
        sink: &mut dyn ResultSink,
        cancel: &CancelToken,
    ) -> Result<AlignOutcome>
    where
        S: ReadSource + Send,
    {
        let mut stats = AlignStats::default();

        let started = Instant::now();
        let prepared = self.prepare_index(input)?;
        stats.index_elapsed = started.elapsed();

        let driven = match &prepared {
            PreparedIndex::InMemory(idx) => self.drive(idx, reads, sink, cancel, &mut stats),
            PreparedIndex::OnDisk(store) => self.drive(store, reads, sink, cancel, &mut stats),
        };
        let status = match driven {
            Ok(status) => status,
            Err(e) => {
                // 失败的运行与取消一样撤销输出，不留下只有头部的半成品
                let _ = sink.abort();
                return Err(e);
            }
        };

        match status {
            RunStatus::Cancelled => sink.abort()?,
            RunStatus::Completed => sink.finish()?,
        }
        Ok(AlignOutcome { status, stats })
    }

    /// `Searching` + `Aggregating` 主循环。
    fn drive<S>(
        &self,
        source: &dyn PartitionSource,
        reads: S,
        sink: &mut dyn ResultSink,
        cancel: &CancelToken,
        stats: &mut AlignStats,
    ) -> Result<RunStatus>
    where
        S: ReadSource + Send,
    {
        let meta = source.meta().clone();
        let n_partitions = meta.fragments.len();
        let search_cfg = self.search_config();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| {
                AlignerError::Configuration(format!("cannot build worker pool: {e}"))
                    .in_phase(Phase::Configuring.name())
            })?;

        {
            let t = Instant::now();
            sink.begin(&meta)
                .map_err(|e| e.in_phase(Phase::Aggregating.name()))?;
            stats.write_elapsed += t.elapsed();
        }

        let (tx, rx) = mpsc::sync_channel::<Result<Batch>>(1);
        // 实际分区驻留开销来自索引元数据，比配置期的上界估算更紧
        let budget = self
            .config
            .memory_limit
            .saturating_sub(meta.max_partition_bytes().saturating_mul(self.config.threads))
            .max(1);
        let min_quality = self.config.min_quality;
        let paired = self.config.paired;
        let loader_cancel = cancel.clone();

        let status = std::thread::scope(|scope| -> Result<RunStatus> {
            // rx 移入作用域：提前返回时先于隐式 join 释放，
            // 阻塞在 send 上的装载线程得以退出
            let rx = rx;
            scope.spawn(move || {
                let mut loader = BatchLoader::new(reads, budget, min_quality, paired);
                loop {
                    if loader_cancel.is_cancelled() {
                        break;
                    }
                    match loader.next_batch() {
                        Ok(Some(batch)) => {
                            if tx.send(Ok(batch)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            });

            for message in &rx {
                let batch = message.map_err(|e| e.in_phase(Phase::Searching.name()))?;
                stats.reads_total +=
                    batch.reads.len() + batch.filtered_by_quality + batch.skipped_alphabet;
                stats.reads_filtered += batch.filtered_by_quality;
                stats.reads_skipped += batch.skipped_alphabet;
                stats.load_elapsed += batch.load_elapsed;

                if cancel.is_cancelled() {
                    return Ok(RunStatus::Cancelled);
                }
                if stats.truncated || batch.reads.is_empty() {
                    continue;
                }

                // Searching：分区工作单元可乱序完成，collect 按分区序归位
                let t = Instant::now();
                let unit_results: Vec<Vec<MatchRecord>> = pool.install(|| {
                    (0..n_partitions)
                        .into_par_iter()
                        .map(|pi| -> Result<Vec<MatchRecord>> {
                            if cancel.is_cancelled() {
                                return Ok(Vec::new());
                            }
                            let partition = source.fetch(pi)?;
                            self.search_unit(&partition, &batch.reads, &search_cfg)
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .map_err(|e| e.in_phase(Phase::Searching.name()))?;
                stats.search_elapsed += t.elapsed();

                if cancel.is_cancelled() {
                    return Ok(RunStatus::Cancelled);
                }

                // Aggregating：跨分区合并、全局 best-only 裁决、定序、发射
                let sets = aggregate_batch(&meta, batch.reads.len(), unit_results, &search_cfg);
                let t = Instant::now();
                for (read, mut set) in batch.reads.iter().zip(sets) {
                    let remaining = self.config.max_results - stats.matches_emitted;
                    if set.matches.len() > remaining {
                        set.matches.truncate(remaining);
                        stats.truncated = true;
                    }
                    if !set.matches.is_empty() {
                        stats.reads_aligned += 1;
                    }
                    stats.matches_emitted += set.matches.len();
                    sink.write(read, &set)
                        .map_err(|e| e.in_phase(Phase::Aggregating.name()))?;
                    if stats.truncated {
                        break;
                    }
                }
                stats.write_elapsed += t.elapsed();
            }

            if cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }
            Ok(RunStatus::Completed)
        })?;

        if status == RunStatus::Completed && stats.reads_total == 0 {
            return Err(AlignerError::Configuration(
                "read source yielded no reads".to_string(),
            )
            .in_phase(Phase::Configuring.name()));
        }
        Ok(status)
    }

    /// 单个 (分区, 批次) 单元：设备资源不足时对半缩批重试一次，
    /// 再失败则回退 CPU 内核。
    fn search_unit(
        &self,
        partition: &crate::index::IndexPartition,
        reads: &[Read],
        cfg: &SearchConfig,
    ) -> Result<Vec<MatchRecord>> {
        match self.kernel.search(partition, reads, cfg) {
            Err(AlignerError::DeviceResource { .. }) => {
                if reads.len() < 2 {
                    return self.fallback.search(partition, reads, cfg);
                }
                let mid = reads.len() / 2;
                let mut all = self.retry_half(partition, &reads[..mid], 0, cfg)?;
                all.extend(self.retry_half(partition, &reads[mid..], mid, cfg)?);
                Ok(all)
            }
            other => other,
        }
    }

    fn retry_half(
        &self,
        partition: &crate::index::IndexPartition,
        chunk: &[Read],
        base: usize,
        cfg: &SearchConfig,
    ) -> Result<Vec<MatchRecord>> {
        let mut records = match self.kernel.search(partition, chunk, cfg) {
            Err(AlignerError::DeviceResource { .. }) => self.fallback.search(partition, chunk, cfg)?,
            other => other?,
        };
        for r in &mut records {
            r.read += base;
        }
        Ok(records)
    }
}

/// 现成索引的两种持有形态。
pub enum PreparedIndex {
    InMemory(GenomeIndex),
    OnDisk(IndexStore),
}

/// 校验配置；按分区驻留的上界估算确认 read 批次预算为正。
fn validate(config: &AlignConfig) -> Result<()> {
    if config.fragment_size == 0 {
        return Err(AlignerError::Configuration(
            "fragment size must be greater than zero".to_string(),
        ));
    }
    if config.threads == 0 {
        return Err(AlignerError::Configuration(
            "thread count must be at least 1".to_string(),
        ));
    }
    if config.max_results == 0 {
        return Err(AlignerError::Configuration(
            "result cap must be greater than zero".to_string(),
        ));
    }
    if let MismatchBudget::Percent(p) = config.budget {
        if !(0.0..=100.0).contains(&p) {
            return Err(AlignerError::Configuration(format!(
                "mismatch percentage {p} is outside [0, 100]"
            )));
        }
    }

    // 同时驻留的分区数以工作线程数为上界；含尾巴序列字节 + u32 后缀数组
    let per_partition = (config.fragment_size as usize + config.overlap as usize) * 5;
    let reserved = per_partition.saturating_mul(config.threads);
    match config.memory_limit.checked_sub(reserved) {
        Some(budget) if budget > 0 => Ok(()),
        _ => Err(AlignerError::Configuration(format!(
            "memory limit of {} bytes leaves no read-batch budget after reserving {} bytes \
             for {} concurrently loaded partitions",
            config.memory_limit, reserved, config.threads
        ))),
    }
}

/// 把一个批次的分区结果合并为逐 read 的有序结果集。
///
/// 分区结果按片段序迭代，片段内偏移换算为绝对坐标后按
/// (错配数, 坐标, 链) 排序——无论工作单元以何种顺序完成，
/// 输出都是确定的。best-only 在此做全局裁决：只保留该 read 在
/// 全参考范围内实际观察到的最小错配层，丢弃内核先行计算的高层记录。
fn aggregate_batch(
    meta: &IndexMeta,
    n_reads: usize,
    unit_results: Vec<Vec<MatchRecord>>,
    cfg: &SearchConfig,
) -> Vec<AlignmentResultSet> {
    let mut per_read: Vec<AlignmentResultSet> = vec![AlignmentResultSet::default(); n_reads];

    for records in unit_results {
        for rec in records {
            let span = &meta.fragments[rec.fragment as usize];
            per_read[rec.read].matches.push(Match {
                coordinate: span.start + u64::from(rec.offset),
                fragment: rec.fragment,
                offset: rec.offset,
                strand: rec.strand,
                mismatches: rec.mismatches,
                mismatch_positions: rec.mismatch_positions,
            });
        }
    }

    for set in &mut per_read {
        set.matches.sort_by(|a, b| {
            a.mismatches
                .cmp(&b.mismatches)
                .then(a.coordinate.cmp(&b.coordinate))
                .then(a.strand.cmp(&b.strand))
        });
        if cfg.best_only && !set.matches.is_empty() {
            let best = set.matches[0].mismatches;
            set.matches.retain(|m| m.mismatches == best);
        }
    }

    per_read
}
