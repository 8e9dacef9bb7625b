//! 演示如何在 library 模式下使用 galign 进行错配容忍搜索。
//!
//! 运行方式：
//! ```bash
//! cargo run --example simple_search
//! ```

use galign::index;
use galign::search::cpu::CpuKernel;
use galign::search::{MismatchBudget, SearchConfig, SearchKernel, Strand};
use galign::io::reads::Read;

fn main() -> galign::Result<()> {
    // 1. 构建参考序列
    let reference = b"ACGTACGTAGCTGATCGTAGCTAGCTAGCTGATCGTAGCTAGCTAGCTGAT";
    println!("参考序列: {}", std::str::from_utf8(reference).unwrap());
    println!("参考长度: {} bp", reference.len());

    // 2. 分片建索引（片段 16bp，延伸尾巴 8bp，演示跨边界匹配）
    let idx = index::build_index("ref1", reference, 16, 8)?;
    println!(
        "索引构建完成：{} 个片段，总长 {}",
        idx.meta.fragments.len(),
        idx.meta.total_len
    );
    for p in &idx.partitions {
        println!(
            "  片段{}: 拥有区间 [{}, {})，尾巴 {} bp",
            p.fragment.index,
            p.fragment.start,
            p.fragment.start + u64::from(p.fragment.len),
            p.fragment.tail_len()
        );
    }

    // 3. 精确搜索
    let kernel = CpuKernel::new();
    let exact = SearchConfig {
        budget: MismatchBudget::Absolute(0),
        search_revcomp: false,
        best_only: false,
    };
    let reads = vec![Read::new("r1", b"GCTGATCGTAG".to_vec())];

    println!("\n精确搜索 'GCTGATCGTAG':");
    for p in &idx.partitions {
        for m in kernel.search(p, &reads, &exact)? {
            let abs = idx.meta.fragments[m.fragment as usize].start + u64::from(m.offset);
            println!("  片段{} 偏移{} -> 绝对坐标 {}", m.fragment, m.offset, abs);
        }
    }

    // 4. 带一个错配的搜索（含反向互补链）
    let tolerant = SearchConfig {
        budget: MismatchBudget::Absolute(1),
        search_revcomp: true,
        best_only: false,
    };
    let reads = vec![Read::new("r2", b"GCTGATCGTAC".to_vec())]; // 末位错配

    println!("\n容错搜索 'GCTGATCGTAC' (k=1, 含反向互补):");
    for p in &idx.partitions {
        for m in kernel.search(p, &reads, &tolerant)? {
            let abs = idx.meta.fragments[m.fragment as usize].start + u64::from(m.offset);
            let strand = match m.strand {
                Strand::Forward => "+",
                Strand::Reverse => "-",
            };
            println!(
                "  绝对坐标 {} 链{} 错配{} 位置{:?}",
                abs, strand, m.mismatches, m.mismatch_positions
            );
        }
    }

    println!("\n完成！");
    Ok(())
}
