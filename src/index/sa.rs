use crate::error::{AlignerError, Result};
use crate::util::dna;

/// 构建片段的后缀数组（倍增法，O(n log n) 排序）。
///
/// 输入为字母表编码的片段序列（含延伸尾巴）。排序覆盖全部偏移，
/// 延伸尾巴内的后缀同样入数组：锚定段的精确出现可能整个落在
/// 尾巴里，而其反推出的候选起点仍在拥有区间内。候选起点是否
/// 越界由搜索内核裁决，不在这里预先裁剪。
///
/// 同内容前缀的并列（只可能出现在被序列末端截短的后缀之间）由
/// 较短后缀在前的规则确定性地打破。
pub fn build_suffix_array(text: &[u8]) -> Result<Vec<u32>> {
    let n = text.len();
    if n > u32::MAX as usize {
        return Err(AlignerError::FragmentTooLarge {
            len: n as u64,
            max: u32::MAX as u64,
        });
    }
    if let Some(&bad) = text.iter().find(|&&b| b as usize >= dna::SIGMA) {
        return Err(AlignerError::UnsupportedAlphabet(format!(
            "byte {bad} is outside the nucleotide alphabet"
        )));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<i64> = text.iter().map(|&b| i64::from(b)).collect();
    let mut tmp: Vec<i64> = vec![0; n];

    let mut k = 1usize;
    while k < n {
        sa.sort_unstable_by(|&i, &j| {
            let r1 = rank[i];
            let r2 = rank[j];
            if r1 != r2 {
                return r1.cmp(&r2);
            }
            let r1n = if i + k < n { rank[i + k] } else { -1 };
            let r2n = if j + k < n { rank[j + k] } else { -1 };
            r1n.cmp(&r2n)
        });

        tmp[sa[0]] = 0;
        for i in 1..n {
            let a = sa[i - 1];
            let b = sa[i];
            let prev = (rank[a], if a + k < n { rank[a + k] } else { -1 });
            let curr = (rank[b], if b + k < n { rank[b + k] } else { -1 });
            tmp[b] = tmp[a] + i64::from(curr != prev);
        }

        rank.copy_from_slice(&tmp);
        if rank[sa[n - 1]] as usize == n - 1 {
            break;
        }
        k <<= 1;
    }

    Ok(sa.into_iter().map(|p| p as u32).collect())
}
