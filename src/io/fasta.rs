use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{AlignerError, Result};
use crate::io::reads::{Read, ReadSource};

/// 流式 FASTA read 源：每条记录产出一个无质量信息的 [`Read`]。
/// 序列行大写化拼接，行内空白忽略；id 取头行的第一个字段。
pub struct FastaSource<R: BufRead> {
    reader: R,
    buf: String,
    pending_header: Option<String>,
    done: bool,
}

impl FastaSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let fh = File::open(path).map_err(|e| {
            AlignerError::ReadSource(format!("cannot open FASTA '{}': {e}", path.display()))
        })?;
        Ok(Self::new(BufReader::new(fh)))
    }
}

impl<R: BufRead> FastaSource<R> {
    pub fn new(reader: R) -> Self {
        FastaSource {
            reader,
            buf: String::new(),
            pending_header: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<usize> {
        self.buf.clear();
        Ok(self.reader.read_line(&mut self.buf)?)
    }
}

impl<R: BufRead> ReadSource for FastaSource<R> {
    fn next_read(&mut self) -> Result<Option<Read>> {
        if self.done {
            return Ok(None);
        }

        let header = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                if self.read_line()? == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if let Some(rest) = self.buf.strip_prefix('>') {
                    break rest.trim().to_string();
                }
                if !self.buf.trim().is_empty() {
                    return Err(AlignerError::ReadSource(
                        "FASTA record does not start with '>'".to_string(),
                    ));
                }
            },
        };
        let id = header
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        let mut seq: Vec<u8> = Vec::new();
        loop {
            if self.read_line()? == 0 {
                self.done = true;
                break;
            }
            if let Some(rest) = self.buf.strip_prefix('>') {
                self.pending_header = Some(rest.trim().to_string());
                break;
            }
            seq.extend(
                self.buf
                    .bytes()
                    .filter(|b| !b.is_ascii_whitespace())
                    .map(|b| b.to_ascii_uppercase()),
            );
        }

        Ok(Some(Read::new(id, seq)))
    }
}

/// 读取参考序列：取文件中的第一条记录，返回 (标识, 序列)。
pub fn read_reference(path: &Path) -> Result<(String, Vec<u8>)> {
    let mut source = FastaSource::open(path)?;
    match source.next_read()? {
        Some(rec) if !rec.seq.is_empty() => Ok((rec.id, rec.seq)),
        Some(rec) => Err(AlignerError::ReadSource(format!(
            "reference record '{}' in '{}' is empty",
            rec.id,
            path.display()
        ))),
        None => Err(AlignerError::ReadSource(format!(
            "FASTA file '{}' contains no sequences",
            path.display()
        ))),
    }
}
