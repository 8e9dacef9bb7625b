/// 核酸字母表编码：{0:A, 1:C, 2:G, 3:T, 4:N}。
/// 无需哨兵符号——后缀数组按片段内偏移排序，不做 BWT 环绕。
pub const SIGMA: usize = 5;

pub const CODE_A: u8 = 0;
pub const CODE_C: u8 = 1;
pub const CODE_G: u8 = 2;
pub const CODE_T: u8 = 3;
pub const CODE_N: u8 = 4;

#[inline]
pub fn to_code(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => CODE_A,
        b'C' => CODE_C,
        b'G' => CODE_G,
        b'T' | b'U' => CODE_T,
        _ => CODE_N, // 其他字符一律视为 N
    }
}

#[inline]
pub fn from_code(a: u8) -> u8 {
    match a {
        CODE_A => b'A',
        CODE_C => b'C',
        CODE_G => b'G',
        CODE_T => b'T',
        _ => b'N',
    }
}

/// 将 ASCII 序列编码为字母表编码。
pub fn encode_seq(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| to_code(b)).collect()
}

/// 判断序列是否可按核酸处理：至少含有一个确定碱基（ACGTU），
/// 且确定碱基不少于无法解释的字符。纯 N、空序列、蛋白质序列都会被拒绝。
pub fn looks_nucleic(seq: &[u8]) -> bool {
    let mut acgt = 0usize;
    let mut other = 0usize;
    for &b in seq {
        match b.to_ascii_uppercase() {
            b'A' | b'C' | b'G' | b'T' | b'U' => acgt += 1,
            b'N' | b'-' | b'.' => {}
            _ => other += 1,
        }
    }
    acgt > 0 && acgt >= other
}

/// 编码态的互补碱基。N 的互补仍为 N。
#[inline]
pub fn complement_code(a: u8) -> u8 {
    match a {
        CODE_A => CODE_T,
        CODE_C => CODE_G,
        CODE_G => CODE_C,
        CODE_T => CODE_A,
        _ => CODE_N,
    }
}

/// 编码态序列的反向互补。
pub fn revcomp_code(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&a| complement_code(a)).collect()
}

#[inline]
pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' | b'U' => b'A',
        _ => b'N',
    }
}

/// ASCII 序列的反向互补。
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// 规范化序列：大写化，非 ACGTN 字符映射为 N。
pub fn normalize_seq(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| from_code(to_code(b))).collect()
}
