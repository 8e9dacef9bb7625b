use crate::error::{AlignerError, Result};
use crate::index::Fragment;

/// 将编码后的参考序列切分为有序片段列表。
///
/// 片段的拥有区间无缝无重叠地覆盖整个参考序列，每段长度不超过
/// `fragment_size`（末段可更短）。每个片段额外携带从后继区间复制的
/// 至多 `overlap` 个碱基作为延伸尾巴（参考序列末尾处截断），
/// 使跨边界起始的 read 仍可在单个片段内完整验证。
///
/// 分片大小决定了构建与搜索两个阶段的峰值内存：片段越小越多，
/// 内存越低但搜索开销越大。
pub fn partition_reference(
    encoded: &[u8],
    fragment_size: u32,
    overlap: u32,
) -> Result<Vec<Fragment>> {
    if fragment_size == 0 {
        return Err(AlignerError::Configuration(
            "fragment size must be greater than zero".to_string(),
        ));
    }
    if encoded.is_empty() {
        return Err(AlignerError::Configuration(
            "reference sequence is empty, fragmentation would produce zero fragments".to_string(),
        ));
    }

    let total = encoded.len();
    let size = fragment_size as usize;
    let mut fragments = Vec::with_capacity((total + size - 1) / size);

    let mut start = 0usize;
    let mut index = 0u32;
    while start < total {
        let own_end = (start + size).min(total);
        let padded_end = (own_end + overlap as usize).min(total);
        fragments.push(Fragment {
            index,
            start: start as u64,
            len: (own_end - start) as u32,
            seq: encoded[start..padded_end].to_vec(),
        });
        start = own_end;
        index += 1;
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::dna;

    fn make_reference(len: usize) -> Vec<u8> {
        let mut x: u32 = 42;
        let mut v = Vec::with_capacity(len);
        for _ in 0..len {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            v.push((x >> 16) as u8 % 4);
        }
        v
    }

    #[test]
    fn fragments_reconstruct_reference() {
        for (total, size, overlap) in [(10, 10, 0), (10, 3, 4), (100, 7, 10), (33, 33, 5)] {
            let reference = make_reference(total);
            let frags = partition_reference(&reference, size, overlap).unwrap();

            let mut rebuilt = Vec::new();
            let mut expected_start = 0u64;
            for f in &frags {
                assert_eq!(f.start, expected_start, "fragments must be contiguous");
                assert!(f.len <= size, "fragment exceeds configured size");
                assert!(f.tail_len() <= overlap as usize);
                rebuilt.extend_from_slice(&f.seq[..f.len as usize]);
                expected_start += u64::from(f.len);
            }
            assert_eq!(rebuilt, reference, "total={total} size={size}");
        }
    }

    #[test]
    fn tail_extends_into_next_fragment() {
        let reference = dna::encode_seq(b"ACGTACGTAC");
        let frags = partition_reference(&reference, 5, 5).unwrap();
        assert_eq!(frags.len(), 2);
        // 首片段的尾巴覆盖到参考末尾
        assert_eq!(frags[0].seq, reference);
        assert_eq!(frags[0].len, 5);
        // 末片段无处延伸
        assert_eq!(frags[1].seq, &reference[5..]);
        assert_eq!(frags[1].tail_len(), 0);
    }

    #[test]
    fn zero_fragment_size_is_rejected() {
        let err = partition_reference(&[0, 1, 2], 0, 0).unwrap_err();
        assert!(matches!(err, AlignerError::Configuration(_)));
    }

    #[test]
    fn empty_reference_is_rejected() {
        let err = partition_reference(&[], 10, 0).unwrap_err();
        assert!(matches!(err, AlignerError::Configuration(_)));
    }
}
