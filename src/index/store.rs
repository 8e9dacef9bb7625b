use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{AlignerError, Result};
use crate::index::{
    Fragment, GenomeIndex, IndexMeta, IndexPartition, PartitionSource, FORMAT_VERSION,
};

/// 三份制品共用的魔数（"gai" 为索引类型标识）。
const MAGIC: &[u8; 4] = b"GAI\0";

/// 磁盘索引的句柄：一个前缀对应三份同址制品。
///
/// - `<prefix>.meta` —— 全局元数据（参考标识、分片参数、片段表、指纹）
/// - `<prefix>.ref`  —— 各片段的编码序列（含延伸尾巴），按片段表偏移寻址
/// - `<prefix>.sarr` —— 各片段的后缀数组，按片段表偏移寻址
///
/// 加载要求三份齐全，任何缺失或未通过结构校验的制品都是 `CorruptIndex`。
/// 写入会覆盖同前缀的旧索引；覆盖确认由调用方负责。
#[derive(Debug)]
pub struct IndexStore {
    prefix: PathBuf,
    meta: IndexMeta,
}

fn artifact(prefix: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn corrupt(path: &Path, reason: impl Into<String>) -> AlignerError {
    AlignerError::CorruptIndex {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn write_magic<W: Write>(w: &mut W) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    Ok(())
}

fn check_magic<R: Read>(r: &mut R, path: &Path) -> Result<()> {
    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    r.read_exact(&mut magic)
        .and_then(|()| r.read_exact(&mut version))
        .map_err(|e| corrupt(path, format!("header too short: {e}")))?;
    if &magic != MAGIC {
        return Err(corrupt(path, "bad magic bytes"));
    }
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(corrupt(path, format!("unsupported format version {version}")));
    }
    Ok(())
}

impl IndexStore {
    /// 将内存态索引序列化为三份制品。片段表中的文件偏移在写入时回填。
    pub fn save(index: &GenomeIndex, prefix: &Path) -> Result<()> {
        let ref_path = artifact(prefix, "ref");
        let sarr_path = artifact(prefix, "sarr");
        let meta_path = artifact(prefix, "meta");

        let mut meta = index.meta.clone();

        let mut ref_w = BufWriter::new(File::create(&ref_path)?);
        write_magic(&mut ref_w)?;
        for (span, part) in meta.fragments.iter_mut().zip(&index.partitions) {
            span.ref_offset = ref_w.stream_position()?;
            bincode::serialize_into(&mut ref_w, &part.fragment.seq)?;
        }
        ref_w.flush()?;

        let mut sarr_w = BufWriter::new(File::create(&sarr_path)?);
        write_magic(&mut sarr_w)?;
        for (span, part) in meta.fragments.iter_mut().zip(&index.partitions) {
            span.sarr_offset = sarr_w.stream_position()?;
            bincode::serialize_into(&mut sarr_w, &part.sa)?;
        }
        sarr_w.flush()?;

        let mut meta_w = BufWriter::new(File::create(&meta_path)?);
        write_magic(&mut meta_w)?;
        bincode::serialize_into(&mut meta_w, &meta)?;
        meta_w.flush()?;
        Ok(())
    }

    /// 打开磁盘索引并校验结构。
    ///
    /// 若给出 `requested_fragment_size` 且与索引构建参数不一致，返回
    /// `StaleIndex`，由调用方决定是否重建——本方法绝不静默重建。
    pub fn open(prefix: &Path, requested_fragment_size: Option<u32>) -> Result<IndexStore> {
        let meta_path = artifact(prefix, "meta");
        let mut meta_r = BufReader::new(
            File::open(&meta_path).map_err(|e| corrupt(&meta_path, format!("missing metadata artifact: {e}")))?,
        );
        check_magic(&mut meta_r, &meta_path)?;
        let meta: IndexMeta = bincode::deserialize_from(&mut meta_r)
            .map_err(|e| corrupt(&meta_path, format!("metadata does not parse: {e}")))?;

        if meta.format_version != FORMAT_VERSION {
            return Err(corrupt(
                &meta_path,
                format!("unsupported format version {}", meta.format_version),
            ));
        }
        let covered: u64 = meta.fragments.iter().map(|f| u64::from(f.len)).sum();
        if covered != meta.total_len || meta.fragments.is_empty() {
            return Err(corrupt(
                &meta_path,
                format!(
                    "fragment table covers {covered} bases but total length is {}",
                    meta.total_len
                ),
            ));
        }
        let expected = IndexMeta::fingerprint_of(
            &meta.reference_name,
            meta.total_len,
            meta.fragment_size,
            meta.overlap,
        );
        if expected != meta.fingerprint {
            return Err(corrupt(
                &meta_path,
                format!(
                    "fingerprint mismatch: expected {expected:#018x}, found {:#018x}",
                    meta.fingerprint
                ),
            ));
        }

        for ext in ["ref", "sarr"] {
            let path = artifact(prefix, ext);
            let mut r = BufReader::new(
                File::open(&path).map_err(|e| corrupt(&path, format!("missing artifact: {e}")))?,
            );
            check_magic(&mut r, &path)?;
            let size = r.get_ref().metadata()?.len();
            let last_offset = meta
                .fragments
                .iter()
                .map(|f| if ext == "ref" { f.ref_offset } else { f.sarr_offset })
                .max()
                .unwrap_or(0);
            if size <= last_offset {
                return Err(corrupt(&path, "artifact truncated"));
            }
        }

        if let Some(requested) = requested_fragment_size {
            if requested != meta.fragment_size {
                return Err(AlignerError::StaleIndex {
                    path: meta_path,
                    requested,
                    actual: meta.fragment_size,
                });
            }
        }

        Ok(IndexStore {
            prefix: prefix.to_path_buf(),
            meta,
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// 按需加载单个分区，驻留内存的分区数由调用方控制。
    pub fn load_partition(&self, index: usize) -> Result<IndexPartition> {
        let span = self.meta.fragments.get(index).ok_or_else(|| {
            corrupt(
                &artifact(&self.prefix, "meta"),
                format!("partition {index} out of range"),
            )
        })?;

        let ref_path = artifact(&self.prefix, "ref");
        let mut ref_r = BufReader::new(File::open(&ref_path)?);
        ref_r.seek(SeekFrom::Start(span.ref_offset))?;
        let seq: Vec<u8> = bincode::deserialize_from(&mut ref_r)
            .map_err(|e| corrupt(&ref_path, format!("fragment {index} does not parse: {e}")))?;
        if seq.len() != span.padded_len as usize {
            return Err(corrupt(
                &ref_path,
                format!(
                    "fragment {index}: expected {} bases, found {}",
                    span.padded_len,
                    seq.len()
                ),
            ));
        }

        let sarr_path = artifact(&self.prefix, "sarr");
        let mut sarr_r = BufReader::new(File::open(&sarr_path)?);
        sarr_r.seek(SeekFrom::Start(span.sarr_offset))?;
        let sa: Vec<u32> = bincode::deserialize_from(&mut sarr_r)
            .map_err(|e| corrupt(&sarr_path, format!("suffix array {index} does not parse: {e}")))?;
        if sa.len() != span.padded_len as usize {
            return Err(corrupt(
                &sarr_path,
                format!(
                    "suffix array {index}: expected {} offsets, found {}",
                    span.padded_len,
                    sa.len()
                ),
            ));
        }

        Ok(IndexPartition {
            fragment: Fragment {
                index: index as u32,
                start: span.start,
                len: span.len,
                seq,
            },
            sa,
        })
    }

    /// 一次性加载完整索引（小参考序列的便捷形式）。
    pub fn load_index(&self) -> Result<GenomeIndex> {
        let mut partitions = Vec::with_capacity(self.meta.fragments.len());
        for i in 0..self.meta.fragments.len() {
            partitions.push(self.load_partition(i)?);
        }
        Ok(GenomeIndex {
            meta: self.meta.clone(),
            partitions,
        })
    }
}

impl PartitionSource for IndexStore {
    fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    fn fetch(&self, index: usize) -> Result<Cow<'_, IndexPartition>> {
        Ok(Cow::Owned(self.load_partition(index)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;

    fn sample_index() -> GenomeIndex {
        build_index("chr1", b"ACGTACGTACGTACGTACGTA", 6, 4).unwrap()
    }

    #[test]
    fn save_and_reload_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("idx");
        let index = sample_index();

        IndexStore::save(&index, &prefix).unwrap();
        let store = IndexStore::open(&prefix, Some(6)).unwrap();
        let reloaded = store.load_index().unwrap();

        // 偏移是落盘时回填的，比较时只看语义字段
        assert_eq!(reloaded.partitions, index.partitions);
        assert_eq!(reloaded.meta.reference_name, index.meta.reference_name);
        assert_eq!(reloaded.meta.fragment_size, index.meta.fragment_size);
        assert_eq!(reloaded.meta.overlap, index.meta.overlap);
        assert_eq!(reloaded.meta.fingerprint, index.meta.fingerprint);
        assert_eq!(reloaded.meta.total_len, index.meta.total_len);
    }

    #[test]
    fn partitions_load_individually() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("idx");
        let index = sample_index();
        IndexStore::save(&index, &prefix).unwrap();

        let store = IndexStore::open(&prefix, None).unwrap();
        for (i, part) in index.partitions.iter().enumerate() {
            assert_eq!(&store.load_partition(i).unwrap(), part);
        }
    }

    #[test]
    fn mismatched_fragment_size_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("idx");
        IndexStore::save(&sample_index(), &prefix).unwrap();

        let err = IndexStore::open(&prefix, Some(20)).unwrap_err();
        match err {
            AlignerError::StaleIndex { requested, actual, .. } => {
                assert_eq!(requested, 20);
                assert_eq!(actual, 6);
            }
            other => panic!("expected StaleIndex, got {other:?}"),
        }
    }

    #[test]
    fn missing_artifact_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("idx");
        IndexStore::save(&sample_index(), &prefix).unwrap();
        std::fs::remove_file(artifact(&prefix, "sarr")).unwrap();

        let err = IndexStore::open(&prefix, None).unwrap_err();
        assert!(matches!(err, AlignerError::CorruptIndex { .. }));
    }

    #[test]
    fn garbled_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("idx");
        IndexStore::save(&sample_index(), &prefix).unwrap();
        std::fs::write(artifact(&prefix, "meta"), b"not an index").unwrap();

        let err = IndexStore::open(&prefix, None).unwrap_err();
        assert!(matches!(err, AlignerError::CorruptIndex { .. }));
    }
}
