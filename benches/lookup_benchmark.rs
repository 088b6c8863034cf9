//! Benchmarks for index builds and lookups.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geoshard::{BuildConfig, GeoIpIndexBuilder, GeoIpReader, ReaderConfig};
use std::fmt::Write as _;
use std::fs;
use std::net::Ipv4Addr;
use tempfile::{tempdir, TempDir};

const LOCATIONS: &str = "geoname_id,locale_code,continent_code,continent_name,country_iso_code,country_name,subdivision_1_iso_code,subdivision_1_name,subdivision_2_iso_code,subdivision_2_name,city_name,metro_code,time_zone,is_in_european_union
5819,en,EU,Europe,CY,Cyprus,02,Limassol,,,Souni,,Asia/Nicosia,1
6252001,en,NA,\"North America\",US,\"United States\",,,,,,,America/Chicago,0
";

const BLOCKS_HEADER: &str = "network,geoname_id,registered_country_geoname_id,represented_country_geoname_id,is_anonymous_proxy,is_satellite_provider,postal_code,latitude,longitude,accuracy_radius";

/// Write a raw dataset with `block_count` consecutive /24 networks.
fn generate_dataset(block_count: u32) -> (TempDir, BuildConfig) {
    let root = tempdir().unwrap();
    let config = BuildConfig::new(root.path().join("raw"), root.path().join("data"));
    fs::create_dir_all(&config.raw_dir).unwrap();
    fs::write(config.locations_path(), LOCATIONS).unwrap();

    let mut blocks = String::from(BLOCKS_HEADER);
    blocks.push('\n');
    for i in 0..block_count {
        let start = Ipv4Addr::from(0x0100_0000 + i * 256);
        let geoname = if i % 2 == 0 { "5819" } else { "6252001" };
        let (lat, lon) = (i % 90, i % 180);
        writeln!(blocks, "{start}/24,{geoname},{geoname},,0,0,,{lat}.25,-{lon}.5,100").unwrap();
    }
    fs::write(config.blocks_path(), blocks).unwrap();

    (root, config)
}

/// Addresses spread over the generated blocks, plus some below the first one.
fn generate_queries(block_count: u32, count: usize) -> Vec<Ipv4Addr> {
    (0..count as u32)
        .map(|i| {
            if i % 10 == 0 {
                Ipv4Addr::from(i)
            } else {
                Ipv4Addr::from(0x0100_0000 + (i * 7919 % block_count) * 256 + 17)
            }
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for size in [1_000u32, 20_000].iter() {
        let (_root, config) = generate_dataset(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("blocks", size), size, |b, _| {
            b.iter(|| black_box(GeoIpIndexBuilder::new(config.clone()).build().unwrap()))
        });
    }

    group.finish();
}

fn bench_lookup_no_cache(c: &mut Criterion) {
    let (_root, config) = generate_dataset(20_000);
    GeoIpIndexBuilder::new(config.clone()).build().unwrap();
    let reader = GeoIpReader::open(&config.data_dir).unwrap();
    let queries = generate_queries(20_000, 1_000);

    let mut group = c.benchmark_group("lookup_no_cache");
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("mixed_queries", |b| {
        b.iter(|| {
            for addr in &queries {
                black_box(reader.lookup(*addr).unwrap());
            }
        })
    });

    group.finish();
}

fn bench_lookup_with_cache(c: &mut Criterion) {
    let (_root, config) = generate_dataset(20_000);
    GeoIpIndexBuilder::new(config.clone()).build().unwrap();
    let config_1k = ReaderConfig::with_capacity(1_000);
    let reader = GeoIpReader::open_with_config(&config.data_dir, config_1k).unwrap();
    let queries = generate_queries(20_000, 1_000);

    // Warm up cache
    for addr in &queries {
        reader.lookup(*addr).unwrap();
    }

    let mut group = c.benchmark_group("lookup_with_cache");
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            for addr in &queries {
                black_box(reader.lookup(*addr).unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_lookup_no_cache,
    bench_lookup_with_cache,
);
criterion_main!(benches);
