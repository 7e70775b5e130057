extern crate criterion;
extern crate tiffstack;

use criterion::{
    black_box, measurement::Measurement, BenchmarkGroup, BenchmarkId, Criterion, Throughput,
};
use tiffstack::decoder::{DecodeOptions, TiffStack};

fn decode_all(data: &[u8], options: &DecodeOptions) {
    let cursor = std::io::Cursor::new(black_box(data));
    let mut stack = TiffStack::open(cursor).unwrap();
    let count = stack.page_count().unwrap();
    for index in 0..count {
        stack.page(index).unwrap().decode(options).unwrap();
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// One classic little-endian IFD entry.
fn entry(out: &mut Vec<u8>, code: u16, kind: u16, count: u32, field: [u8; 4]) {
    put_u16(out, code);
    put_u16(out, kind);
    put_u32(out, count);
    out.extend_from_slice(&field);
}

fn long_field(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

fn short_field(value: u16) -> [u8; 4] {
    let mut field = [0u8; 4];
    field[..2].copy_from_slice(&value.to_le_bytes());
    field
}

/// Serialize a single-page grayscale file from pre-encoded segments. Tag
/// 324/325 pairs describe tiles, 273/279 pairs describe strips.
fn build_gray(
    width: u32,
    height: u32,
    grid: (u16, u32),
    compression: u16,
    segments: &[Vec<u8>],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"II\x2a\x00");
    let data_len: usize = segments.iter().map(Vec::len).sum();
    let ifd_at = 8 + data_len as u32;
    put_u32(&mut out, ifd_at);
    let mut offsets = Vec::with_capacity(segments.len());
    for segment in segments {
        offsets.push(out.len() as u32);
        out.extend_from_slice(segment);
    }

    let (offsets_tag, extent_tag) = grid;
    let tiled = offsets_tag == 324;
    let entries: u16 = if tiled { 8 } else { 7 };
    let tables_at = ifd_at + 2 + 12 * u32::from(entries) + 4;
    let n = segments.len() as u32;

    put_u16(&mut out, entries);
    entry(&mut out, 256, 4, 1, long_field(width));
    entry(&mut out, 257, 4, 1, long_field(height));
    entry(&mut out, 258, 3, 1, short_field(8));
    entry(&mut out, 259, 3, 1, short_field(compression));
    if tiled {
        entry(&mut out, 322, 4, 1, long_field(extent_tag));
        entry(&mut out, 323, 4, 1, long_field(extent_tag));
        entry(&mut out, 324, 4, n, long_field(tables_at));
        entry(&mut out, 325, 4, n, long_field(tables_at + 4 * n));
    } else {
        entry(&mut out, 273, 4, n, long_field(tables_at));
        entry(&mut out, 278, 4, 1, long_field(extent_tag));
        entry(&mut out, 279, 4, n, long_field(tables_at + 4 * n));
    }
    put_u32(&mut out, 0);

    for &offset in &offsets {
        put_u32(&mut out, offset);
    }
    for segment in segments {
        put_u32(&mut out, segment.len() as u32);
    }
    out
}

fn fill(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((seed * 31 + i * 7) % 251) as u8).collect()
}

fn packbits(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 128 + 1);
    for chunk in data.chunks(128) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
    out
}

fn striped_uncompressed(width: u32, height: u32, rows_per_strip: u32) -> Vec<u8> {
    let segments: Vec<Vec<u8>> = (0..height.div_ceil(rows_per_strip))
        .map(|s| fill((width * rows_per_strip) as usize, s as usize))
        .collect();
    build_gray(width, height, (273, rows_per_strip), 1, &segments)
}

fn striped_packbits(width: u32, height: u32, rows_per_strip: u32) -> Vec<u8> {
    let segments: Vec<Vec<u8>> = (0..height.div_ceil(rows_per_strip))
        .map(|s| packbits(&fill((width * rows_per_strip) as usize, s as usize)))
        .collect();
    build_gray(width, height, (273, rows_per_strip), 0x8005, &segments)
}

fn tiled_uncompressed(width: u32, height: u32, tile: u32) -> Vec<u8> {
    let per_axis = width.div_ceil(tile) * height.div_ceil(tile);
    let segments: Vec<Vec<u8>> = (0..per_axis)
        .map(|s| fill((tile * tile) as usize, s as usize))
        .collect();
    build_gray(width, height, (324, tile), 1, &segments)
}

fn main() {
    struct BenchDef {
        data: Vec<u8>,
        id: &'static str,
        sample_size: usize,
        options: DecodeOptions,
    }

    fn run_bench_def<M: Measurement>(group: &mut BenchmarkGroup<M>, def: BenchDef) {
        group
            .sample_size(def.sample_size)
            .throughput(Throughput::Bytes(def.data.len() as u64))
            .bench_with_input(
                BenchmarkId::new(def.id, def.data.len()),
                &def.data,
                |b, input| b.iter(|| decode_all(input, &def.options)),
            );
    }

    let mut c = Criterion::default().configure_from_args();
    let mut group = c.benchmark_group("decode");

    run_bench_def(
        &mut group,
        BenchDef {
            data: striped_uncompressed(512, 512, 64),
            id: "contiguous-strips",
            sample_size: 100,
            options: DecodeOptions::new(),
        },
    );

    run_bench_def(
        &mut group,
        BenchDef {
            data: tiled_uncompressed(512, 512, 64),
            id: "tiled",
            sample_size: 100,
            options: DecodeOptions::new(),
        },
    );

    run_bench_def(
        &mut group,
        BenchDef {
            data: striped_packbits(512, 512, 8),
            id: "packbits-serial",
            sample_size: 50,
            options: DecodeOptions::new(),
        },
    );

    run_bench_def(
        &mut group,
        BenchDef {
            data: striped_packbits(512, 512, 8),
            id: "packbits-4-workers",
            sample_size: 50,
            options: DecodeOptions::new().max_workers(4),
        },
    );
}
