use std::time::Duration;

use crate::error::Result;
use crate::util::dna;

/// 一条 read：标识、核酸序列、可选的逐碱基质量（与序列等长）、
/// 可选的配对伙伴（按所在批次内的位置引用，不是指针）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    pub id: String,
    pub seq: Vec<u8>,
    /// Phred+33 原始质量字节
    pub qual: Option<Vec<u8>>,
    pub mate: Option<usize>,
}

impl Read {
    pub fn new(id: impl Into<String>, seq: Vec<u8>) -> Self {
        Read {
            id: id.into(),
            seq,
            qual: None,
            mate: None,
        }
    }

    /// 批量内存预算用的占用估算。
    pub fn estimated_bytes(&self) -> usize {
        self.id.len() + self.seq.len() + self.qual.as_ref().map_or(0, Vec::len) + 64
    }

    /// 最低 Phred 质量分；无质量信息返回 `None`。
    pub fn min_quality(&self) -> Option<u8> {
        self.qual
            .as_ref()
            .and_then(|q| q.iter().min().map(|&b| b.saturating_sub(33)))
    }
}

/// read 源契约：按稳定顺序产出 read，`Ok(None)` 表示正常结束，
/// `Err` 表示错误终止——两者必须可区分。
pub trait ReadSource {
    fn next_read(&mut self) -> Result<Option<Read>>;
}

/// 一个待搜索的 read 批次及其装载诊断。
#[derive(Debug, Default)]
pub struct Batch {
    pub reads: Vec<Read>,
    /// 因质量阈值被过滤的 read 数
    pub filtered_by_quality: usize,
    /// 因字母表问题被跳过的 read 数
    pub skipped_alphabet: usize,
    /// 本批次的装载耗时
    pub load_elapsed: Duration,
}

/// 把 read 源切成内存受限的批次。
///
/// - 批次字节预算由调度器按（内存上限 − 分区驻留预留）计算；
/// - 质量过滤：有质量信息且最低 Phred 分低于阈值的 read 被丢弃并
///   计数；没有质量信息的 read 永不因质量被过滤；
/// - 字母表预筛：空序列、纯 N 或非核酸的 read 被跳过并计数；
/// - 配对模式下相邻两条 read 互为 mate，批次边界不拆散配对。
pub struct BatchLoader<S> {
    source: S,
    budget_bytes: usize,
    min_quality: Option<u8>,
    paired: bool,
    done: bool,
}

impl<S: ReadSource> BatchLoader<S> {
    pub fn new(source: S, budget_bytes: usize, min_quality: Option<u8>, paired: bool) -> Self {
        BatchLoader {
            source,
            budget_bytes: budget_bytes.max(1),
            min_quality,
            paired,
            done: false,
        }
    }

    /// 装载下一个批次；源耗尽返回 `Ok(None)`。
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }

        let started = std::time::Instant::now();
        let mut batch = Batch::default();
        let mut bytes = 0usize;

        loop {
            let full = bytes >= self.budget_bytes;
            // 配对模式下凑齐偶数条再收批
            if full && (!self.paired || batch.reads.len() % 2 == 0) {
                break;
            }
            match self.source.next_read()? {
                None => {
                    self.done = true;
                    break;
                }
                Some(read) => {
                    if let (Some(threshold), Some(min)) = (self.min_quality, read.min_quality()) {
                        if min < threshold {
                            batch.filtered_by_quality += 1;
                            continue;
                        }
                    }
                    if read.seq.is_empty() || !dna::looks_nucleic(&read.seq) {
                        batch.skipped_alphabet += 1;
                        continue;
                    }
                    bytes += read.estimated_bytes();
                    batch.reads.push(read);
                }
            }
        }

        if self.paired {
            let n = batch.reads.len();
            for i in (0..n.saturating_sub(1)).step_by(2) {
                batch.reads[i].mate = Some(i + 1);
                batch.reads[i + 1].mate = Some(i);
            }
        }

        batch.load_elapsed = started.elapsed();
        if batch.reads.is_empty() && batch.filtered_by_quality == 0 && batch.skipped_alphabet == 0 {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource(std::vec::IntoIter<Read>);

    impl ReadSource for VecSource {
        fn next_read(&mut self) -> Result<Option<Read>> {
            Ok(self.0.next())
        }
    }

    fn source(reads: Vec<Read>) -> VecSource {
        VecSource(reads.into_iter())
    }

    fn with_qual(id: &str, seq: &[u8], qual: &[u8]) -> Read {
        let mut r = Read::new(id, seq.to_vec());
        r.qual = Some(qual.to_vec());
        r
    }

    #[test]
    fn batches_respect_byte_budget() {
        let reads: Vec<Read> = (0..10)
            .map(|i| Read::new(format!("r{i}"), b"ACGTACGT".to_vec()))
            .collect();
        let mut loader = BatchLoader::new(source(reads), 150, None, false);

        let mut sizes = Vec::new();
        let mut total = 0;
        while let Some(batch) = loader.next_batch().unwrap() {
            sizes.push(batch.reads.len());
            total += batch.reads.len();
        }
        assert_eq!(total, 10);
        assert!(sizes.len() > 1, "budget should split into several batches");
    }

    #[test]
    fn quality_filter_drops_low_reads_only() {
        let reads = vec![
            with_qual("low", b"ACGT", b"!!!!"),  // Phred 0
            with_qual("high", b"ACGT", b"IIII"), // Phred 40
            Read::new("noqual", b"ACGT".to_vec()),
        ];
        let mut loader = BatchLoader::new(source(reads), usize::MAX, Some(20), false);
        let batch = loader.next_batch().unwrap().unwrap();
        let ids: Vec<&str> = batch.reads.iter().map(|r| r.id.as_str()).collect();
        // 无质量信息的 read 永不因质量被过滤
        assert_eq!(ids, vec!["high", "noqual"]);
        assert_eq!(batch.filtered_by_quality, 1);
    }

    #[test]
    fn bad_alphabet_reads_are_counted_not_fatal() {
        let reads = vec![
            Read::new("ok", b"ACGT".to_vec()),
            Read::new("empty", Vec::new()),
            Read::new("all_n", b"NNNN".to_vec()),
        ];
        let mut loader = BatchLoader::new(source(reads), usize::MAX, None, false);
        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.reads.len(), 1);
        assert_eq!(batch.skipped_alphabet, 2);
        assert!(loader.next_batch().unwrap().is_none());
    }

    #[test]
    fn paired_batches_keep_mates_together() {
        let reads: Vec<Read> = (0..6)
            .map(|i| Read::new(format!("r{i}"), b"ACGTACGTACGTACGT".to_vec()))
            .collect();
        // 预算刚好卡在奇数条上，配对模式应凑齐偶数
        let one = Read::new("x", b"ACGTACGTACGTACGT".to_vec()).estimated_bytes();
        let mut loader = BatchLoader::new(source(reads), one + 1, None, true);

        while let Some(batch) = loader.next_batch().unwrap() {
            assert_eq!(batch.reads.len() % 2, 0);
            for i in (0..batch.reads.len()).step_by(2) {
                assert_eq!(batch.reads[i].mate, Some(i + 1));
                assert_eq!(batch.reads[i + 1].mate, Some(i));
            }
        }
    }

    #[test]
    fn min_quality_helper() {
        assert_eq!(with_qual("r", b"AC", b"+5").min_quality(), Some(10));
        assert_eq!(Read::new("r", b"AC".to_vec()).min_quality(), None);
    }
}
