use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{AlignerError, Result};
use crate::io::reads::{Read, ReadSource};

/// 流式 FASTQ read 源：四行一条记录，质量行按 Phred+33 原样保留。
/// 不支持折行的序列。
pub struct FastqSource<R: BufRead> {
    reader: R,
    buf: String,
    done: bool,
}

impl FastqSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let fh = File::open(path).map_err(|e| {
            AlignerError::ReadSource(format!("cannot open FASTQ '{}': {e}", path.display()))
        })?;
        Ok(Self::new(BufReader::new(fh)))
    }
}

impl<R: BufRead> FastqSource<R> {
    pub fn new(reader: R) -> Self {
        FastqSource {
            reader,
            buf: String::new(),
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<usize> {
        self.buf.clear();
        Ok(self.reader.read_line(&mut self.buf)?)
    }

    fn malformed(msg: &str) -> AlignerError {
        AlignerError::ReadSource(format!("malformed FASTQ: {msg}"))
    }
}

impl<R: BufRead> ReadSource for FastqSource<R> {
    fn next_read(&mut self) -> Result<Option<Read>> {
        if self.done {
            return Ok(None);
        }

        // 跳过空行后的头行
        loop {
            if self.read_line()? == 0 {
                self.done = true;
                return Ok(None);
            }
            if !self.buf.trim().is_empty() {
                break;
            }
        }
        if !self.buf.starts_with('@') {
            return Err(Self::malformed("header does not start with '@'"));
        }
        let id = self.buf[1..]
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        if self.read_line()? == 0 {
            return Err(Self::malformed("unexpected EOF after header"));
        }
        let seq: Vec<u8> = self
            .buf
            .trim_end()
            .bytes()
            .map(|b| b.to_ascii_uppercase())
            .collect();

        if self.read_line()? == 0 || !self.buf.starts_with('+') {
            return Err(Self::malformed("missing '+' separator line"));
        }

        if self.read_line()? == 0 {
            return Err(Self::malformed("missing quality line"));
        }
        let qual = self.buf.trim_end().as_bytes().to_vec();
        if qual.len() != seq.len() {
            return Err(Self::malformed("sequence/quality length mismatch"));
        }

        let mut read = Read::new(id, seq);
        read.qual = Some(qual);
        Ok(Some(read))
    }
}
