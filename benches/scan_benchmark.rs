//! Performance benchmarks for drive-replica
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use drive_replica::fs::{Capabilities, ExclusionSet, PathClassifier, ScanConfig, ScanEngine};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Create `dirs` directories holding `files` small files each
fn create_tree(root: &Path, dirs: usize, files: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("dir_{:03}", d));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files {
            let ext = if f % 4 == 0 { "tmp" } else { "dat" };
            fs::write(dir.join(format!("file_{:03}.{}", f, ext)), b"payload").unwrap();
        }
    }
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for (dirs, files) in [(10, 10), (50, 40)] {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path(), dirs, files);
        let engine = ScanEngine::new(
            PathClassifier::new(Capabilities::native(temp.path())),
            ScanConfig::default(),
        );

        group.throughput(Throughput::Elements((dirs * files) as u64));
        group.bench_with_input(
            BenchmarkId::new("entries", dirs * files),
            &temp,
            |b, temp| {
                b.iter(|| {
                    let rules = ExclusionSet::from_rules(["*.tmp"]).unwrap();
                    black_box(engine.scan(temp.path(), rules).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_ignored_names(c: &mut Criterion) {
    let rules = ExclusionSet::from_rules([
        "*.tmp",
        "cache",
        "/data/projects/build",
        "/data/projects/*.log",
        "/data/projects/keep/linked.bin",
    ])
    .unwrap();
    let names: Vec<String> = (0..500)
        .map(|i| match i % 5 {
            0 => format!("f{}.tmp", i),
            1 => format!("f{}.log", i),
            2 => "cache".to_string(),
            _ => format!("f{}.dat", i),
        })
        .collect();

    c.bench_function("ignored_names_500", |b| {
        b.iter(|| {
            black_box(rules.ignored_names(Path::new("/data/projects"), names.iter().map(String::as_str)))
        });
    });
}

criterion_group!(benches, bench_scan, bench_ignored_names);
criterion_main!(benches);
