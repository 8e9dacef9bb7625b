use std::path::PathBuf;

/// crate 统一的 Result 别名。
pub type Result<T> = std::result::Result<T, AlignerError>;

/// 比对引擎的错误分类。
///
/// - 配置与索引完整性错误是致命的，在任何搜索开始前暴露；
/// - 逐 read / 逐片段的字母表问题只做跳过并计数，不会中断整轮运行；
/// - 设备资源不足是可恢复的：调度器缩小批量重试一次，再失败则回退 CPU 内核。
#[derive(Debug, thiserror::Error)]
pub enum AlignerError {
    /// 非法或互相矛盾的选项，在任何工作开始前报告。
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// 参考序列或片段不是核酸字母表。
    #[error("unsupported alphabet: {0}")]
    UnsupportedAlphabet(String),

    /// 磁盘索引的分片参数与请求不一致，需要重建（绝不静默重建）。
    #[error(
        "stale index at '{path}': built with fragment size {actual}, \
         but fragment size {requested} was requested; rebuild the index to proceed"
    )]
    StaleIndex {
        path: PathBuf,
        requested: u32,
        actual: u32,
    },

    /// 索引文件缺失或未通过结构校验。
    #[error("corrupt index at '{path}': {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// 片段长度超出偏移整数宽度所能表示的范围（构建期致命）。
    #[error("fragment of {len} bases exceeds the maximum indexable length of {max}")]
    FragmentTooLarge { len: u64, max: u64 },

    /// 加速设备内存不足，报告所需与可用字节数供调度器缩批重试。
    #[error("device memory insufficient: {required} bytes required, {available} bytes available")]
    DeviceResource { required: u64, available: u64 },

    /// 加速设备的其他故障（平台初始化、内核编译、入队失败等）。
    #[error("device error: {0}")]
    Device(String),

    /// 包裹组件错误并标注失败所处的阶段。
    #[error("alignment failed in phase {phase}: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<AlignerError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index (de)serialization error: {0}")]
    Codec(#[from] bincode::Error),

    /// read 源的格式错误（FASTA/FASTQ 解析失败等）。
    #[error("read source error: {0}")]
    ReadSource(String),
}

impl AlignerError {
    /// 标注错误发生的阶段；已标注过的错误保持原样。
    pub fn in_phase(self, phase: &'static str) -> Self {
        match self {
            e @ AlignerError::Phase { .. } => e,
            e => AlignerError::Phase {
                phase,
                source: Box::new(e),
            },
        }
    }
}
