use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::{fs, io::Read, sync::Arc, thread, time::Duration};
use tempfile::TempDir;

use webserver::{CachingFileSystem, DirFileSystem, FileSystem};

fn fixture(count: usize, size: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    let content = "x".repeat(size);
    for i in 0..count {
        fs::write(dir.path().join(format!("file{}.txt", i)), &content).unwrap();
    }
    dir
}

fn read_all(fs: &dyn FileSystem, name: &str) -> usize {
    let mut file = fs.open(name).unwrap();
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).unwrap();
    buffer.len()
}

/// 命中缓存与直接读盘的对比
fn cache_hit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let dir = fixture(1, *size);
        let disk = DirFileSystem::new(dir.path().to_str().unwrap());
        let cached = CachingFileSystem::new(DirFileSystem::new(dir.path().to_str().unwrap()), Duration::from_secs(600));
        read_all(&cached, "/file0.txt");

        group.bench_with_input(BenchmarkId::new("disk", size), size, |b, _| {
            b.iter(|| read_all(&disk, black_box("/file0.txt")));
        });
        group.bench_with_input(BenchmarkId::new("cached", size), size, |b, _| {
            b.iter(|| read_all(&cached, black_box("/file0.txt")));
        });
    }

    group.finish();
}

/// 缓存过期后每次都重新读盘并替换条目
fn cache_miss_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss");

    for count in [10, 100].iter() {
        let dir = fixture(*count, 1024);
        let cached = CachingFileSystem::new(DirFileSystem::new(dir.path().to_str().unwrap()), Duration::from_nanos(1));
        let names: Vec<String> = (0..*count).map(|i| format!("/file{}.txt", i)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                for name in &names {
                    read_all(&cached, black_box(name));
                }
            });
        });
    }

    group.finish();
}

/// 多线程并发读取同一批缓存文件
fn cache_concurrent_benchmark(c: &mut Criterion) {
    let dir = fixture(16, 4096);
    let cached = Arc::new(CachingFileSystem::new(
        DirFileSystem::new(dir.path().to_str().unwrap()),
        Duration::from_secs(600),
    ));

    c.bench_function("cache_concurrent_8_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let cached = Arc::clone(&cached);
                    thread::spawn(move || {
                        for i in 0..16 {
                            read_all(cached.as_ref(), &format!("/file{}.txt", (i + t) % 16));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(benches, cache_hit_benchmark, cache_miss_benchmark, cache_concurrent_benchmark);
criterion_main!(benches);
