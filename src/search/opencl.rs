//! OpenCL 设备内核：与 CPU 内核功能等价（相同输入产出相同的记录
//! 集合，内部并列顺序实现相关），以数据并行方式在设备上逐
//! (read, 偏移) 对做错配计数。设备内存不足时报告 `DeviceResource`
//! 并附上所需/可用字节数，绝不静默回退——缩批重试由调度器负责。

// ocl 的内核入队是 unsafe API
#![allow(unsafe_code)]

use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{Buffer, Context, Device, Kernel, Platform, Program, Queue};

use crate::error::{AlignerError, Result};
use crate::index::IndexPartition;
use crate::io::reads::Read;
use crate::search::{
    screen_read, verify_candidate, MatchRecord, SearchConfig, SearchKernel, Strand,
};
use crate::util::dna;

/// 单次入队可回收的匹配槽数。计数器超过容量即报告资源不足，
/// 由调度器用更小的批量重试。
const RESULT_CAPACITY: usize = 1 << 20;

const KERNEL_SRC: &str = r#"
__kernel void mismatch_scan(
    __global const uchar* text,
    const uint text_len,
    const uint own_len,
    __global const uchar* reads,
    __global const uint* read_off,
    __global const uint* read_len,
    __global const uint* budgets,
    const uint n_reads,
    __global volatile uint* counter,
    __global uint* results,
    const uint capacity)
{
    uint gid = get_global_id(0);
    uint read = gid / own_len;
    uint pos = gid % own_len;
    if (read >= n_reads) {
        return;
    }
    uint m = read_len[read];
    if (m == 0 || pos + m > text_len) {
        return;
    }
    uint k = budgets[read];
    __global const uchar* p = reads + read_off[read];
    uint mm = 0;
    for (uint i = 0; i < m; ++i) {
        uchar a = p[i];
        uchar b = text[pos + i];
        if (a != b || a == 4) {
            mm += 1;
            if (mm > k) {
                return;
            }
        }
    }
    uint slot = atomic_inc(counter);
    if (slot < capacity) {
        results[slot * 2] = read;
        results[slot * 2 + 1] = pos;
    }
}
"#;

pub struct OpenClKernel {
    device: Device,
    queue: Queue,
    program: Program,
    global_mem: u64,
}

fn device_err(e: ocl::Error) -> AlignerError {
    AlignerError::Device(e.to_string())
}

impl OpenClKernel {
    /// 探测可用的 GPU 设备；无设备返回 `Ok(None)`。
    pub fn probe() -> Result<Option<OpenClKernel>> {
        let mut found = None;
        for platform in Platform::list() {
            let devices = match Device::list(platform, Some(ocl::flags::DEVICE_TYPE_GPU)) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(device) = devices.into_iter().next() {
                found = Some((platform, device));
                break;
            }
        }
        let Some((platform, device)) = found else {
            return Ok(None);
        };

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(device_err)?;
        let queue = Queue::new(&context, device, None).map_err(device_err)?;
        let program = Program::builder()
            .src(KERNEL_SRC)
            .devices(device)
            .build(&context)
            .map_err(device_err)?;

        let global_mem = match device.info(DeviceInfo::GlobalMemSize) {
            Ok(DeviceInfoResult::GlobalMemSize(bytes)) => bytes,
            _ => 0,
        };

        Ok(Some(OpenClKernel {
            device,
            queue,
            program,
            global_mem,
        }))
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    /// 在一条链上执行设备扫描，返回 (read, 偏移) 命中对。
    fn scan_strand(
        &self,
        text: &[u8],
        own_len: usize,
        patterns: &[Vec<u8>],
        budgets: &[u32],
    ) -> Result<Vec<(u32, u32)>> {
        let mut flat: Vec<u8> = Vec::new();
        let mut offsets: Vec<u32> = Vec::with_capacity(patterns.len());
        let mut lens: Vec<u32> = Vec::with_capacity(patterns.len());
        for p in patterns {
            offsets.push(flat.len() as u32);
            lens.push(p.len() as u32);
            flat.extend_from_slice(p);
        }
        if flat.is_empty() {
            return Ok(Vec::new());
        }

        let required = (text.len()
            + flat.len()
            + (offsets.len() + lens.len() + budgets.len()) * 4
            + RESULT_CAPACITY * 8
            + 4) as u64;
        if self.global_mem > 0 && required > self.global_mem {
            return Err(AlignerError::DeviceResource {
                required,
                available: self.global_mem,
            });
        }

        let text_buf = Buffer::<u8>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(text.len())
            .copy_host_slice(text)
            .build()
            .map_err(device_err)?;
        let reads_buf = Buffer::<u8>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(flat.len())
            .copy_host_slice(&flat)
            .build()
            .map_err(device_err)?;
        let off_buf = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(offsets.len())
            .copy_host_slice(&offsets)
            .build()
            .map_err(device_err)?;
        let len_buf = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(lens.len())
            .copy_host_slice(&lens)
            .build()
            .map_err(device_err)?;
        let budget_buf = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(budgets.len())
            .copy_host_slice(budgets)
            .build()
            .map_err(device_err)?;
        let counter_buf = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .len(1)
            .fill_val(0u32)
            .build()
            .map_err(device_err)?;
        let results_buf = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .len(RESULT_CAPACITY * 2)
            .build()
            .map_err(device_err)?;

        let kernel = Kernel::builder()
            .program(&self.program)
            .name("mismatch_scan")
            .queue(self.queue.clone())
            .global_work_size(own_len * patterns.len())
            .arg(&text_buf)
            .arg(text.len() as u32)
            .arg(own_len as u32)
            .arg(&reads_buf)
            .arg(&off_buf)
            .arg(&len_buf)
            .arg(&budget_buf)
            .arg(patterns.len() as u32)
            .arg(&counter_buf)
            .arg(&results_buf)
            .arg(RESULT_CAPACITY as u32)
            .build()
            .map_err(device_err)?;

        unsafe {
            kernel.enq().map_err(device_err)?;
        }

        let mut count = vec![0u32; 1];
        counter_buf.read(&mut count).enq().map_err(device_err)?;
        let count = count[0] as usize;
        if count > RESULT_CAPACITY {
            // 结果槽溢出：按资源不足处理，调度器会缩小批量重试
            return Err(AlignerError::DeviceResource {
                required: (count * 8) as u64,
                available: (RESULT_CAPACITY * 8) as u64,
            });
        }

        let mut slots = vec![0u32; (count * 2).max(1)];
        results_buf.read(&mut slots).enq().map_err(device_err)?;
        Ok(slots[..count * 2]
            .chunks_exact(2)
            .map(|c| (c[0], c[1]))
            .collect())
    }
}

impl SearchKernel for OpenClKernel {
    fn name(&self) -> &'static str {
        "opencl"
    }

    fn search(
        &self,
        partition: &IndexPartition,
        reads: &[Read],
        config: &SearchConfig,
    ) -> Result<Vec<MatchRecord>> {
        let fragment = &partition.fragment;
        if fragment.len == 0 || partition.sa.is_empty() {
            return Ok(Vec::new());
        }
        let text = &fragment.seq;
        let own_len = fragment.len as usize;

        // 预筛后的 read 以空模式占位，保持批内序号稳定
        let mut forward: Vec<Vec<u8>> = Vec::with_capacity(reads.len());
        let mut budgets: Vec<u32> = Vec::with_capacity(reads.len());
        for read in reads {
            if screen_read(read).is_some() {
                forward.push(Vec::new());
                budgets.push(0);
            } else {
                let codes = dna::encode_seq(&read.seq);
                let k = config.budget.resolve(codes.len()).min(codes.len() as u32);
                forward.push(codes);
                budgets.push(k);
            }
        }

        let mut out = Vec::new();
        let mut emit = |hits: Vec<(u32, u32)>, patterns: &[Vec<u8>], strand: Strand| {
            for (read_idx, offset) in hits {
                let pattern = &patterns[read_idx as usize];
                // 主机侧复核，补全错配位置并兜底设备端偏差
                if let Some((mismatches, positions)) =
                    verify_candidate(text, offset as usize, pattern, budgets[read_idx as usize])
                {
                    out.push(MatchRecord {
                        read: read_idx as usize,
                        fragment: fragment.index,
                        offset,
                        strand,
                        mismatches,
                        mismatch_positions: positions,
                    });
                }
            }
        };

        let hits = self.scan_strand(text, own_len, &forward, &budgets)?;
        emit(hits, &forward, Strand::Forward);

        if config.search_revcomp {
            let reverse: Vec<Vec<u8>> = forward.iter().map(|p| dna::revcomp_code(p)).collect();
            let hits = self.scan_strand(text, own_len, &reverse, &budgets)?;
            emit(hits, &reverse, Strand::Reverse);
        }

        Ok(out)
    }
}
