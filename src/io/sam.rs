use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::align::AlignmentResultSet;
use crate::error::Result;
use crate::index::IndexMeta;
use crate::io::reads::Read;
use crate::search::Strand;
use crate::util::dna;

/// 结果汇契约：按输入顺序接收 (read, 有序结果集)，负责落盘格式与
/// 文件句柄生命周期。取消的运行调用 `abort` 丢弃已写的部分输出。
pub trait ResultSink {
    fn begin(&mut self, meta: &IndexMeta) -> Result<()>;
    fn write(&mut self, read: &Read, result: &AlignmentResultSet) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    fn abort(&mut self) -> Result<()>;
}

/// 最小化 SAM 输出：`@SQ` 头来自索引元数据；每条 read 的首个匹配为
/// 主记录，其余以 secondary (0x100) 标志输出；无匹配写 unmapped 行。
pub struct SamWriter<W: Write> {
    out: W,
    /// 写入文件时记录路径，abort 时删除
    path: Option<PathBuf>,
    /// `begin` 时从索引元数据取得的参考名，作为 RNAME
    reference: Option<String>,
}

const FLAG_PAIRED: u32 = 0x1;
const FLAG_UNMAPPED: u32 = 0x4;
const FLAG_REVERSE: u32 = 0x10;
const FLAG_SECONDARY: u32 = 0x100;

impl SamWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(SamWriter {
            out: BufWriter::new(File::create(path)?),
            path: Some(path.to_path_buf()),
            reference: None,
        })
    }
}

impl<W: Write> SamWriter<W> {
    pub fn new(out: W) -> Self {
        SamWriter {
            out,
            path: None,
            reference: None,
        }
    }

    fn write_record(
        &mut self,
        read: &Read,
        rname: &str,
        m: &crate::align::Match,
        secondary: bool,
    ) -> Result<()> {
        let mut flag = 0u32;
        if read.mate.is_some() {
            flag |= FLAG_PAIRED;
        }
        if m.strand == Strand::Reverse {
            flag |= FLAG_REVERSE;
        }
        if secondary {
            flag |= FLAG_SECONDARY;
        }

        // 反向链按惯例输出反向互补序列与反转的质量
        let (seq, qual) = if m.strand == Strand::Reverse {
            (
                dna::revcomp(&read.seq),
                read.qual.as_ref().map(|q| q.iter().rev().copied().collect()),
            )
        } else {
            (read.seq.clone(), read.qual.clone())
        };
        let qual_str = qual
            .map(|q| String::from_utf8_lossy(&q).into_owned())
            .unwrap_or_else(|| "*".to_string());

        writeln!(
            self.out,
            "{}\t{}\t{}\t{}\t255\t{}M\t*\t0\t0\t{}\t{}\tNM:i:{}",
            read.id,
            flag,
            rname,
            m.coordinate + 1, // SAM 坐标 1 基
            read.seq.len(),
            String::from_utf8_lossy(&seq),
            qual_str,
            m.mismatches,
        )?;
        Ok(())
    }
}

impl<W: Write> ResultSink for SamWriter<W> {
    fn begin(&mut self, meta: &IndexMeta) -> Result<()> {
        writeln!(self.out, "@HD\tVN:1.6\tSO:unsorted")?;
        writeln!(
            self.out,
            "@SQ\tSN:{}\tLN:{}",
            meta.reference_name, meta.total_len
        )?;
        self.reference = Some(meta.reference_name.clone());
        Ok(())
    }

    fn write(&mut self, read: &Read, result: &AlignmentResultSet) -> Result<()> {
        if result.matches.is_empty() {
            let mut flag = FLAG_UNMAPPED;
            if read.mate.is_some() {
                flag |= FLAG_PAIRED;
            }
            let qual_str = read
                .qual
                .as_ref()
                .map(|q| String::from_utf8_lossy(q).into_owned())
                .unwrap_or_else(|| "*".to_string());
            writeln!(
                self.out,
                "{}\t{}\t*\t0\t0\t*\t*\t0\t0\t{}\t{}",
                read.id,
                flag,
                String::from_utf8_lossy(&read.seq),
                qual_str,
            )?;
            return Ok(());
        }

        let rname = self
            .reference
            .clone()
            .unwrap_or_else(|| "*".to_string());
        for (i, m) in result.matches.iter().enumerate() {
            self.write_record(read, &rname, m, i > 0)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.out.flush()?;
        if let Some(path) = self.path.take() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{AlignmentResultSet, Match};
    use crate::index::build_index;

    fn sample_set(entries: &[(u64, Strand, u32)]) -> AlignmentResultSet {
        AlignmentResultSet {
            matches: entries
                .iter()
                .map(|&(coordinate, strand, mismatches)| Match {
                    coordinate,
                    fragment: 0,
                    offset: coordinate as u32,
                    strand,
                    mismatches,
                    mismatch_positions: Vec::new(),
                })
                .collect(),
        }
    }

    fn render(read: &Read, set: &AlignmentResultSet) -> String {
        let mut writer = SamWriter::new(Vec::new());
        let meta = build_index("chr1", b"ACGTACGTAC", 10, 0).unwrap().meta;
        writer.begin(&meta).unwrap();
        writer.write(read, set).unwrap();
        writer.finish().unwrap();
        String::from_utf8(writer.out).unwrap()
    }

    #[test]
    fn header_and_primary_record() {
        let read = Read::new("r1", b"CGTA".to_vec());
        let out = render(&read, &sample_set(&[(1, Strand::Forward, 0)]));

        assert!(out.starts_with("@HD\tVN:1.6\tSO:unsorted\n"));
        assert!(out.contains("@SQ\tSN:chr1\tLN:10\n"));
        // POS 是 1 基坐标
        assert!(out.contains("r1\t0\tchr1\t2\t255\t4M\t*\t0\t0\tCGTA\t*\tNM:i:0"));
    }

    #[test]
    fn secondary_and_reverse_records() {
        let read = Read::new("r1", b"CGTA".to_vec());
        let out = render(
            &read,
            &sample_set(&[(1, Strand::Forward, 0), (5, Strand::Reverse, 1)]),
        );

        let lines: Vec<&str> = out.lines().filter(|l| !l.starts_with('@')).collect();
        assert_eq!(lines.len(), 2);
        // 第二条带 secondary + reverse 标志，序列反向互补
        assert!(lines[1].starts_with(&format!("r1\t{}", FLAG_REVERSE | FLAG_SECONDARY)));
        assert!(lines[1].contains("TACG"));
        assert!(lines[1].ends_with("NM:i:1"));
    }

    #[test]
    fn unmapped_read_line() {
        let read = Read::new("r1", b"TTTT".to_vec());
        let out = render(&read, &AlignmentResultSet::default());
        assert!(out.contains(&format!("r1\t{FLAG_UNMAPPED}\t*\t0\t0\t*\t*\t0\t0\tTTTT\t*")));
    }
}
