use std::cmp::Ordering;

use crate::error::Result;
use crate::index::IndexPartition;
use crate::io::reads::Read;
use crate::search::{screen_read, MatchRecord, SearchConfig, SearchKernel, Strand};
use crate::util::dna;

/// CPU 参考内核。
///
/// 算法（鸽笼锚定）：有效预算为 k 时，把 read 切成 k+1 个不相交的
/// 等长段；若某位置的总错配数 ≤ k，则至少一段在该位置完全精确匹配。
/// 于是对每一段在分区的后缀数组上二分查找精确出现，由出现位置反推
/// read 的候选起点，再对候选起点做带上界的逐碱基错配计数验证。
///
/// 候选起点落在拥有区间之外的匹配归相邻分区所有，直接丢弃——
/// 这使结果与分片方式无关且天然无重复。N 与任何碱基都不匹配。
pub struct CpuKernel;

impl CpuKernel {
    pub fn new() -> Self {
        CpuKernel
    }
}

impl Default for CpuKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchKernel for CpuKernel {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn search(
        &self,
        partition: &IndexPartition,
        reads: &[Read],
        config: &SearchConfig,
    ) -> Result<Vec<MatchRecord>> {
        let fragment = &partition.fragment;
        // 零长度片段：本批次静默跳过
        if fragment.len == 0 || partition.sa.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (read_idx, read) in reads.iter().enumerate() {
            if screen_read(read).is_some() {
                continue;
            }
            let forward = dna::encode_seq(&read.seq);
            let budget = config.budget.resolve(forward.len());

            search_strand(partition, &forward, budget, read_idx, Strand::Forward, &mut out);
            if config.search_revcomp {
                let reverse = dna::revcomp_code(&forward);
                search_strand(partition, &reverse, budget, read_idx, Strand::Reverse, &mut out);
            }
        }
        Ok(out)
    }
}

/// 在单条链上搜索一个 read 的全部预算内匹配。
fn search_strand(
    partition: &IndexPartition,
    pattern: &[u8],
    budget: u32,
    read_idx: usize,
    strand: Strand,
    out: &mut Vec<MatchRecord>,
) {
    let text = &partition.fragment.seq;
    let own_len = partition.fragment.len as usize;
    let m = pattern.len();
    if m == 0 || m > text.len() {
        // read 比含尾巴的片段还长，不可能整条落入
        return;
    }

    let k = budget.min(m as u32);
    let pieces = k as usize + 1;
    let piece_len = m / pieces;

    let mut candidates: Vec<usize> = Vec::new();
    if piece_len == 0 {
        // 预算不小于 read 长度：所有能容纳 read 的偏移都是候选
        candidates.extend((0..own_len).filter(|&c| c + m <= text.len()));
    } else {
        for pi in 0..pieces {
            let piece = &pattern[pi * piece_len..(pi + 1) * piece_len];
            // 含 N 的段不可能精确匹配（N 永不匹配）；若所有段都含 N，
            // 则任何位置的错配数都至少为段数 = k+1，必然超出预算。
            if piece.contains(&dna::CODE_N) {
                continue;
            }
            let (lo, hi) = sa_bounds(text, &partition.sa, piece);
            for &occurrence in &partition.sa[lo..hi] {
                let occurrence = occurrence as usize;
                if occurrence < pi * piece_len {
                    continue;
                }
                let candidate = occurrence - pi * piece_len;
                if candidate < own_len && candidate + m <= text.len() {
                    candidates.push(candidate);
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
    }

    for candidate in candidates {
        if let Some((mismatches, positions)) = crate::search::verify_candidate(text, candidate, pattern, k) {
            out.push(MatchRecord {
                read: read_idx,
                fragment: partition.fragment.index,
                offset: candidate as u32,
                strand,
                mismatches,
                mismatch_positions: positions,
            });
        }
    }
}

/// 截断到 `piece` 长度的后缀前缀比较。被序列末端截短的窗口
/// 视为更小，与后缀数组的排序规则一致。
#[inline]
fn cmp_prefix(text: &[u8], offset: usize, piece: &[u8]) -> Ordering {
    let end = (offset + piece.len()).min(text.len());
    text[offset..end].cmp(piece)
}

/// 在后缀数组上二分出以 `piece` 为前缀的区间 `[lo, hi)`。
fn sa_bounds(text: &[u8], sa: &[u32], piece: &[u8]) -> (usize, usize) {
    let lo = sa.partition_point(|&p| cmp_prefix(text, p as usize, piece) == Ordering::Less);
    let hi = lo
        + sa[lo..].partition_point(|&p| cmp_prefix(text, p as usize, piece) != Ordering::Greater);
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::search::MismatchBudget;

    fn config(budget: u32, revcomp: bool) -> SearchConfig {
        SearchConfig {
            budget: MismatchBudget::Absolute(budget),
            search_revcomp: revcomp,
            best_only: false,
        }
    }

    fn search_one(
        reference: &[u8],
        fragment_size: u32,
        overlap: u32,
        read: &[u8],
        cfg: &SearchConfig,
    ) -> Vec<MatchRecord> {
        let index = build_index("chr1", reference, fragment_size, overlap).unwrap();
        let reads = vec![Read::new("r1", read.to_vec())];
        let kernel = CpuKernel::new();
        let mut all = Vec::new();
        for p in &index.partitions {
            all.extend(kernel.search(p, &reads, cfg).unwrap());
        }
        all
    }

    /// 朴素全扫描，作为完备性基准。
    fn naive_offsets(reference: &[u8], pattern: &[u8], k: u32) -> Vec<(u64, u32)> {
        let text = dna::encode_seq(reference);
        let pat = dna::encode_seq(pattern);
        let mut hits = Vec::new();
        if pat.is_empty() || pat.len() > text.len() {
            return hits;
        }
        for start in 0..=(text.len() - pat.len()) {
            let mm = pat
                .iter()
                .zip(&text[start..start + pat.len()])
                .filter(|&(&a, &b)| a != b || a == dna::CODE_N)
                .count() as u32;
            if mm <= k {
                hits.push((start as u64, mm));
            }
        }
        hits
    }

    fn absolute_hits(index_frag_size: u32, records: &[MatchRecord], reference: &[u8]) -> Vec<(u64, u32)> {
        let mut hits: Vec<(u64, u32)> = records
            .iter()
            .map(|r| {
                (
                    u64::from(r.fragment) * u64::from(index_frag_size) + u64::from(r.offset),
                    r.mismatches,
                )
            })
            .collect();
        hits.sort_unstable();
        let _ = reference;
        hits
    }

    #[test]
    fn exact_match_scenario() {
        // 参考 "ACGTACGTAC"，read "CGTA"，预算 0，仅正向 → 偏移 1 与 5
        let records = search_one(b"ACGTACGTAC", 10, 0, b"CGTA", &config(0, false));
        let mut offsets: Vec<u32> = records.iter().map(|r| r.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![1, 5]);
        assert!(records.iter().all(|r| r.mismatches == 0));
        assert!(records.iter().all(|r| r.strand == Strand::Forward));
    }

    #[test]
    fn one_mismatch_scenario() {
        // read "CGTT" 与 "CGTA" 差一个碱基，预算 1 → 偏移 1 与 5，各 1 个错配
        let records = search_one(b"ACGTACGTAC", 10, 0, b"CGTT", &config(1, false));
        let mut hits: Vec<(u32, u32)> = records.iter().map(|r| (r.offset, r.mismatches)).collect();
        hits.sort_unstable();
        assert_eq!(hits, vec![(1, 1), (5, 1)]);
        // 错配位置在 read 坐标系
        assert!(records.iter().all(|r| r.mismatch_positions == vec![3]));
    }

    #[test]
    fn fragmentation_invariance() {
        // 位置 5 切成两个片段后搜索整条参考序列，结果与单片段一致
        let reference = b"ACGTACGTAC";
        let cfg = config(0, false);
        let whole = search_one(reference, 10, 0, reference, &cfg);
        let split = search_one(reference, 5, 10, reference, &cfg);

        let whole_hits = absolute_hits(10, &whole, reference);
        let split_hits = absolute_hits(5, &split, reference);
        assert_eq!(whole_hits, vec![(0, 0)]);
        assert_eq!(split_hits, whole_hits);
    }

    #[test]
    fn anchor_in_extension_tail_still_yields_boundary_match() {
        // read "TCCT" 在偏移 4 处差 1 个碱基；预算 1 时唯一的精确段
        // "CT" 出现在偏移 6——按 5 分片后落在片段 0 的延伸尾巴里，
        // 而候选起点 4 仍在拥有区间内，必须被找到
        let reference = b"AAAAGCCTTT";
        let cfg = config(1, false);
        let whole = absolute_hits(10, &search_one(reference, 10, 0, b"TCCT", &cfg), reference);
        let split = absolute_hits(5, &search_one(reference, 5, 5, b"TCCT", &cfg), reference);
        assert_eq!(whole, vec![(4, 1)]);
        assert_eq!(split, whole);
    }

    #[test]
    fn matches_are_complete_up_to_budget() {
        let reference = b"ACGTAGGTACCTAGCATGCATTACGGATCGATTACGCATGAGGCTA";
        for read in [&b"TACG"[..], b"GCATGCAT", b"ACCTAGG"] {
            for k in 0..3u32 {
                let records = search_one(reference, 9, 16, read, &config(k, false));
                let found = absolute_hits(9, &records, reference);
                let expected = naive_offsets(reference, read, k);
                assert_eq!(found, expected, "read={:?} k={k}", std::str::from_utf8(read));
            }
        }
    }

    #[test]
    fn reverse_complement_matches_are_tagged() {
        // "TACG" 的反向互补是 "CGTA"，在参考上出现于偏移 1 与 5
        let records = search_one(b"ACGTACGTAC", 10, 0, b"TACG", &config(0, true));
        let rev: Vec<&MatchRecord> = records.iter().filter(|r| r.strand == Strand::Reverse).collect();
        let mut offsets: Vec<u32> = rev.iter().map(|r| r.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![1, 5]);
    }

    #[test]
    fn n_bases_never_match() {
        // read 中的 N 永远计为错配，即使参考对应位置也是 N
        let records = search_one(b"ACGTNACGT", 9, 0, b"GTNA", &config(0, false));
        assert!(records.is_empty());
        let records = search_one(b"ACGTNACGT", 9, 0, b"GTNA", &config(1, false));
        let hits: Vec<(u32, u32)> = records.iter().map(|r| (r.offset, r.mismatches)).collect();
        assert_eq!(hits, vec![(2, 1)]);
    }

    #[test]
    fn budget_not_below_read_length_matches_everywhere() {
        let records = search_one(b"ACGTACGT", 8, 0, b"TTTT", &config(4, false));
        // 所有能容纳 read 的偏移都在预算内
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn reads_longer_than_fragment_are_skipped() {
        let records = search_one(b"ACGT", 4, 0, b"ACGTACGT", &config(0, false));
        assert!(records.is_empty());
    }

    #[test]
    fn screened_reads_are_skipped_without_aborting() {
        let index = build_index("chr1", b"ACGTACGTAC", 10, 0).unwrap();
        let reads = vec![
            Read::new("bad", b"NNNN".to_vec()),
            Read::new("good", b"CGTA".to_vec()),
        ];
        let records = CpuKernel::new()
            .search(&index.partitions[0], &reads, &config(0, false))
            .unwrap();
        assert!(records.iter().all(|r| r.read == 1));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn percent_budget_scales_with_read_length() {
        let cfg = SearchConfig {
            budget: MismatchBudget::Percent(25.0),
            search_revcomp: false,
            best_only: false,
        };
        // 4bp read 的 25% 预算为 1 个错配
        let records = search_one(b"ACGTACGTAC", 10, 0, b"CGTT", &cfg);
        let mut offsets: Vec<u32> = records.iter().map(|r| r.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![1, 5]);
    }
}
