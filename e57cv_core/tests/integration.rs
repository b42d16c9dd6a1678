//! End-to-end transfers: write record batches through a Writer, read them
//! back through a Reader, and check the values, counts, and lifecycle
//! behavior the engine promises.

use std::cell::RefCell;
use std::rc::Rc;

use e57cv_core::buffer::{new_region, StringBuffer};
use e57cv_core::error::Error;
use e57cv_core::{
    CompressedVectorNode, FloatPrecision, ImageFile, NodeKind, Prototype, SourceDestBuffer,
};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("e57cv_test_{}.e57cv", name))
}

/// Deterministic pseudo-random values using a simple LCG.
fn lcg_values(len: usize, seed: u64, modulus: u64) -> Vec<i64> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((rng >> 33) % modulus) as i64
        })
        .collect()
}

fn single_int_node(file: &ImageFile, min: i64, max: i64) -> CompressedVectorNode {
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "value", NodeKind::Integer { min, max })
        .unwrap();
    CompressedVectorNode::new(file, proto).unwrap()
}

fn i32_sdb(file: &ImageFile, path: &str, capacity: usize, conv: bool) -> SourceDestBuffer {
    SourceDestBuffer::new::<i32>(file, path, new_region::<i32>(capacity), capacity, conv, false, 0)
        .unwrap()
}

// ── End-to-end scenarios ───────────────────────────────────────────────────

#[test]
fn single_bytestream_integer_roundtrip() {
    let file = ImageFile::create(temp_path("single_int")).unwrap();
    let node = single_int_node(&file, 0, 1023);
    let values = [0i32, 1, 1023, 512, 7];

    // Int32 memory is wider than the [0, 1023] wire interval, so the write
    // side opts into conversion.
    let src = i32_sdb(&file, "/value", 5, true);
    for (i, &v) in values.iter().enumerate() {
        src.set::<i32>(i, v).unwrap();
    }
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(5).unwrap();
    writer.close().unwrap();
    assert_eq!(node.record_count(), 5);

    // Capacity 8 > record count: the final read comes back short.
    let dst = i32_sdb(&file, "/value", 8, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(reader.read().unwrap(), 5);
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(dst.get::<i32>(i).unwrap(), v, "record {}", i);
    }
    assert_eq!(reader.read().unwrap(), 0);
    assert_eq!(reader.read().unwrap(), 0);
    reader.close().unwrap();
}

#[test]
fn two_bytestream_heterogeneous_roundtrip() {
    let file = ImageFile::create(temp_path("hetero")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "x", NodeKind::Integer { min: -128, max: 127 })
        .unwrap();
    proto.add(proto.root(), "name", NodeKind::String).unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let xs = [1i32, -128, 127];
    let names = ["a", "bb", ""];

    let x_src = i32_sdb(&file, "/x", 3, true);
    let name_store: StringBuffer = Rc::new(RefCell::new(vec![String::new(); 3]));
    let name_src = SourceDestBuffer::ustring(&file, "/name", Rc::clone(&name_store)).unwrap();
    for i in 0..3 {
        x_src.set::<i32>(i, xs[i]).unwrap();
        name_src.set_string(i, names[i].to_string()).unwrap();
    }
    let mut writer = node.writer(&[x_src, name_src]).unwrap();
    writer.write(3).unwrap();
    writer.close().unwrap();

    let x_dst = i32_sdb(&file, "/x", 3, false);
    let name_dst_store: StringBuffer = Rc::new(RefCell::new(vec![String::new(); 3]));
    let name_dst = SourceDestBuffer::ustring(&file, "/name", Rc::clone(&name_dst_store)).unwrap();
    let mut reader = node.reader(&[x_dst.clone(), name_dst.clone()]).unwrap();
    assert_eq!(reader.read().unwrap(), 3);

    // Record i of one column belongs with record i of the other.
    for i in 0..3 {
        assert_eq!(x_dst.get::<i32>(i).unwrap(), xs[i], "record {}", i);
        assert_eq!(name_dst.get_string(i).unwrap(), names[i], "record {}", i);
    }
    assert_eq!(reader.read().unwrap(), 0);
}

#[test]
fn scaled_integer_with_scaling() {
    let file = ImageFile::create(temp_path("scaled")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(
            proto.root(),
            "x",
            NodeKind::ScaledInteger { min: 0, max: 10_000, scale: 0.001, offset: 0.0 },
        )
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let values = [0.000f64, 1.234, 9.999];
    let src = SourceDestBuffer::new::<f64>(
        &file,
        "/x",
        new_region::<f64>(3),
        3,
        false,
        true, // do_scaling: memory holds scaled values
        0,
    )
    .unwrap();
    for (i, &v) in values.iter().enumerate() {
        src.set::<f64>(i, v).unwrap();
    }
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(3).unwrap();
    writer.close().unwrap();

    let dst = SourceDestBuffer::new::<f64>(
        &file,
        "/x",
        new_region::<f64>(3),
        3,
        false,
        true,
        0,
    )
    .unwrap();
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(reader.read().unwrap(), 3);
    for (i, &v) in values.iter().enumerate() {
        let got = dst.get::<f64>(i).unwrap();
        assert!((got - v).abs() <= 0.001, "record {}: {} vs {}", i, got, v);
    }
}

#[test]
fn scaled_integer_without_scaling_exposes_raw_values() {
    let file = ImageFile::create(temp_path("scaled_raw")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(
            proto.root(),
            "x",
            NodeKind::ScaledInteger { min: 0, max: 10_000, scale: 0.001, offset: 0.0 },
        )
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let src = i32_sdb(&file, "/x", 2, true);
    src.set::<i32>(0, 1234).unwrap();
    src.set::<i32>(1, 9999).unwrap();
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(2).unwrap();
    writer.close().unwrap();

    let dst = i32_sdb(&file, "/x", 2, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(reader.read().unwrap(), 2);
    assert_eq!(dst.get::<i32>(0).unwrap(), 1234);
    assert_eq!(dst.get::<i32>(1).unwrap(), 9999);
}

#[test]
fn conversion_refused_without_do_conversion() {
    let file = ImageFile::create(temp_path("refused")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "f", NodeKind::Float { precision: FloatPrecision::Single })
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    // Write side: Int16 against a float field, no conversion requested.
    // Construction succeeds; the first write call fails before any data
    // moves.
    let bad_src = SourceDestBuffer::new::<i16>(
        &file,
        "/f",
        new_region::<i16>(4),
        4,
        false,
        false,
        0,
    )
    .unwrap();
    let mut writer = node.writer(&[bad_src]).unwrap();
    assert!(matches!(
        writer.write(4),
        Err(Error::ConversionRequired { .. })
    ));
    writer.close().unwrap();

    // Produce a valid section, then refuse the same pairing on read.
    let src = SourceDestBuffer::new::<f32>(
        &file,
        "/f",
        new_region::<f32>(2),
        2,
        false,
        false,
        0,
    )
    .unwrap();
    src.set::<f32>(0, 1.0).unwrap();
    src.set::<f32>(1, 2.0).unwrap();
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(2).unwrap();
    writer.close().unwrap();

    let bad_dst = SourceDestBuffer::new::<i16>(
        &file,
        "/f",
        new_region::<i16>(2),
        2,
        false,
        false,
        0,
    )
    .unwrap();
    let mut reader = node.reader(&[bad_dst.clone()]).unwrap();
    assert!(matches!(reader.read(), Err(Error::ConversionRequired { .. })));
    // No value moved into the buffer.
    assert_eq!(bad_dst.get::<i16>(0).unwrap(), 0);
    // A failed read poisons the reader; only close is left.
    assert!(matches!(reader.read(), Err(Error::ReaderNotOpen)));
    reader.close().unwrap();
}

#[test]
fn capacity_smaller_than_record_count() {
    let file = ImageFile::create(temp_path("capacity")).unwrap();
    let node = single_int_node(&file, 0, 100_000);
    let values = lcg_values(1000, 0xDEAD_BEEF, 100_001);

    let src = i32_sdb(&file, "/value", 100, true);
    let mut writer = node.writer(std::slice::from_ref(&src)).unwrap();
    for batch in values.chunks(100) {
        for (i, &v) in batch.iter().enumerate() {
            src.set::<i32>(i, v as i32).unwrap();
        }
        writer.write(batch.len()).unwrap();
    }
    writer.close().unwrap();
    assert_eq!(node.record_count(), 1000);

    let dst = i32_sdb(&file, "/value", 100, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    for batch in 0..10 {
        assert_eq!(reader.read().unwrap(), 100, "batch {}", batch);
        for i in 0..100 {
            assert_eq!(
                dst.get::<i32>(i).unwrap(),
                values[batch * 100 + i] as i32,
                "record {}",
                batch * 100 + i
            );
        }
    }
    assert_eq!(reader.read().unwrap(), 0);
}

#[test]
fn buffer_rebind_across_reads() {
    let file = ImageFile::create(temp_path("rebind")).unwrap();
    let node = single_int_node(&file, 0, 100_000);
    let values = lcg_values(200, 42, 100_001);

    let src = i32_sdb(&file, "/value", 200, true);
    for (i, &v) in values.iter().enumerate() {
        src.set::<i32>(i, v as i32).unwrap();
    }
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(200).unwrap();
    writer.close().unwrap();

    let first = i32_sdb(&file, "/value", 100, false);
    let mut reader = node.reader(std::slice::from_ref(&first)).unwrap();
    assert_eq!(reader.read().unwrap(), 100);
    for i in 0..100 {
        assert_eq!(first.get::<i32>(i).unwrap(), values[i] as i32);
    }

    // Same path/repr/capacity/stride, fresh backing memory: records 100..200
    // land in the new region.
    let second = i32_sdb(&file, "/value", 100, false);
    assert_eq!(reader.read_with(std::slice::from_ref(&second)).unwrap(), 100);
    for i in 0..100 {
        assert_eq!(second.get::<i32>(i).unwrap(), values[100 + i] as i32);
    }
    assert_eq!(reader.read().unwrap(), 0);

    // A capacity change is not a compatible rebind.
    let wrong = i32_sdb(&file, "/value", 50, false);
    assert!(matches!(
        reader.read_with(std::slice::from_ref(&wrong)),
        Err(Error::BuffersNotCompatible(_))
    ));
}

// ── Properties ─────────────────────────────────────────────────────────────

#[test]
fn multi_packet_section_round_trips() {
    let file = ImageFile::create(temp_path("multipacket")).unwrap();
    // 17 bits per value; 40k records ≈ 85 KB of payload, several packets.
    let node = single_int_node(&file, 0, 100_000);
    let values = lcg_values(40_000, 7, 100_001);

    let src = i32_sdb(&file, "/value", 2000, true);
    let mut writer = node.writer(std::slice::from_ref(&src)).unwrap();
    for batch in values.chunks(2000) {
        for (i, &v) in batch.iter().enumerate() {
            src.set::<i32>(i, v as i32).unwrap();
        }
        writer.write(batch.len()).unwrap();
    }
    writer.close().unwrap();

    let packets =
        e57cv_core::inspect::walk_packets(&file, node.binary_section_start()).unwrap();
    assert!(packets.len() > 1, "expected several packets, got {}", packets.len());

    let dst = i32_sdb(&file, "/value", 2000, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    let mut at = 0usize;
    loop {
        let n = reader.read().unwrap() as usize;
        if n == 0 {
            break;
        }
        for i in 0..n {
            assert_eq!(dst.get::<i32>(i).unwrap(), values[at + i] as i32, "record {}", at + i);
        }
        at += n;
    }
    assert_eq!(at, 40_000);
}

#[test]
fn skewed_streams_stay_record_aligned() {
    // A fat string column next to a thin integer column: the string channel
    // spans many more packets than the integer channel, so the per-channel
    // packet cursors and the earliest-packet scheduling carry the load.
    let file = ImageFile::create(temp_path("skew")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "id", NodeKind::Integer { min: 0, max: 255 })
        .unwrap();
    proto.add(proto.root(), "blob", NodeKind::String).unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let records = 2000usize;
    let blob_for = |i: usize| "x".repeat(50 + (i % 97));

    let id_src = i32_sdb(&file, "/id", 500, true);
    let blob_store: StringBuffer = Rc::new(RefCell::new(vec![String::new(); 500]));
    let blob_src = SourceDestBuffer::ustring(&file, "/blob", Rc::clone(&blob_store)).unwrap();
    let mut writer = node.writer(&[id_src.clone(), blob_src.clone()]).unwrap();
    for batch_start in (0..records).step_by(500) {
        for i in 0..500 {
            id_src.set::<i32>(i, ((batch_start + i) % 256) as i32).unwrap();
            blob_src.set_string(i, blob_for(batch_start + i)).unwrap();
        }
        writer.write(500).unwrap();
    }
    writer.close().unwrap();

    let packets =
        e57cv_core::inspect::walk_packets(&file, node.binary_section_start()).unwrap();
    assert!(packets.len() > 2, "expected stream skew across packets");

    let id_dst = i32_sdb(&file, "/id", 500, false);
    let blob_dst_store: StringBuffer = Rc::new(RefCell::new(vec![String::new(); 500]));
    let blob_dst = SourceDestBuffer::ustring(&file, "/blob", Rc::clone(&blob_dst_store)).unwrap();
    let mut reader = node.reader(&[id_dst.clone(), blob_dst.clone()]).unwrap();

    let mut at = 0usize;
    loop {
        let n = reader.read().unwrap() as usize;
        if n == 0 {
            break;
        }
        for i in 0..n {
            assert_eq!(id_dst.get::<i32>(i).unwrap(), ((at + i) % 256) as i32, "record {}", at + i);
            assert_eq!(blob_dst.get_string(i).unwrap(), blob_for(at + i), "record {}", at + i);
        }
        at += n;
    }
    assert_eq!(at, records);
}

#[test]
fn constant_width_zero_column_rides_along() {
    let file = ImageFile::create(temp_path("constcol")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "v", NodeKind::Integer { min: 0, max: 1000 })
        .unwrap();
    proto
        .add(proto.root(), "tag", NodeKind::Integer { min: 7, max: 7 })
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let v_src = i32_sdb(&file, "/v", 10, true);
    let tag_src = i32_sdb(&file, "/tag", 10, true);
    for i in 0..10 {
        v_src.set::<i32>(i, i as i32 * 100).unwrap();
        tag_src.set::<i32>(i, 7).unwrap();
    }
    let mut writer = node.writer(&[v_src, tag_src]).unwrap();
    writer.write(10).unwrap();
    writer.close().unwrap();

    let v_dst = i32_sdb(&file, "/v", 4, false);
    let tag_dst = i32_sdb(&file, "/tag", 4, false);
    let mut reader = node.reader(&[v_dst.clone(), tag_dst.clone()]).unwrap();
    let mut seen = 0;
    loop {
        let n = reader.read().unwrap();
        if n == 0 {
            break;
        }
        for i in 0..n as usize {
            assert_eq!(v_dst.get::<i32>(i).unwrap(), (seen + i as i32) * 100);
            assert_eq!(tag_dst.get::<i32>(i).unwrap(), 7);
        }
        seen += n as i32;
    }
    assert_eq!(seen, 10);
}

#[test]
fn stride_independence() {
    let file = ImageFile::create(temp_path("stride")).unwrap();
    let node = single_int_node(&file, 0, 60_000);
    let values = lcg_values(64, 99, 60_001);

    let src = i32_sdb(&file, "/value", 64, true);
    for (i, &v) in values.iter().enumerate() {
        src.set::<i32>(i, v as i32).unwrap();
    }
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(64).unwrap();
    writer.close().unwrap();

    // Packed destination, stride = element size.
    let packed = i32_sdb(&file, "/value", 64, false);
    let mut reader = node.reader(std::slice::from_ref(&packed)).unwrap();
    assert_eq!(reader.read().unwrap(), 64);
    reader.close().unwrap();

    // Interleaved destination, stride 2× the element size.
    let interleaved = SourceDestBuffer::new::<i32>(
        &file,
        "/value",
        Rc::new(RefCell::new(vec![0u8; 64 * 8])),
        64,
        false,
        false,
        8,
    )
    .unwrap();
    let mut reader = node.reader(std::slice::from_ref(&interleaved)).unwrap();
    assert_eq!(reader.read().unwrap(), 64);

    for i in 0..64 {
        assert_eq!(packed.get::<i32>(i).unwrap(), values[i] as i32);
        assert_eq!(interleaved.get::<i32>(i).unwrap(), values[i] as i32);
    }
}

#[test]
fn empty_section_reads_zero_records() {
    let file = ImageFile::create(temp_path("empty")).unwrap();
    let node = single_int_node(&file, 0, 1023);

    let src = i32_sdb(&file, "/value", 4, true);
    let mut writer = node.writer(&[src]).unwrap();
    writer.close().unwrap();
    assert_eq!(node.record_count(), 0);

    let dst = i32_sdb(&file, "/value", 4, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(reader.read().unwrap(), 0);
    assert_eq!(reader.read().unwrap(), 0);
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

#[test]
fn close_is_idempotent_and_counts_balance() {
    let file = ImageFile::create(temp_path("lifecycle")).unwrap();
    let node = single_int_node(&file, 0, 1023);

    let src = i32_sdb(&file, "/value", 4, true);
    src.set::<i32>(0, 1).unwrap();
    let mut writer = node.writer(&[src]).unwrap();
    assert!(writer.is_open());
    assert_eq!(file.writer_count(), 1);
    writer.write(1).unwrap();
    writer.close().unwrap();
    writer.close().unwrap();
    assert!(!writer.is_open());
    assert_eq!(file.writer_count(), 0);
    assert!(matches!(writer.write(1), Err(Error::WriterNotOpen)));

    let dst = i32_sdb(&file, "/value", 4, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(file.reader_count(), 1);

    // The file refuses to close while the reader is attached.
    assert!(matches!(file.close(), Err(Error::FileInUse { readers: 1, .. })));

    reader.close().unwrap();
    reader.close().unwrap();
    assert_eq!(file.reader_count(), 0);
    assert!(matches!(reader.read(), Err(Error::ReaderNotOpen)));

    // A dropped reader releases its attachment exactly once.
    {
        let dst2 = i32_sdb(&file, "/value", 4, false);
        let _reader = node.reader(std::slice::from_ref(&dst2)).unwrap();
        assert_eq!(file.reader_count(), 1);
    }
    assert_eq!(file.reader_count(), 0);
    file.close().unwrap();

    // Nothing binds to a closed file.
    assert!(matches!(
        SourceDestBuffer::new::<i32>(&file, "/value", new_region::<i32>(4), 4, false, false, 0),
        Err(Error::ImageFileNotOpen)
    ));
}

#[test]
fn seek_is_not_implemented() {
    let file = ImageFile::create(temp_path("seek")).unwrap();
    let node = single_int_node(&file, 0, 1023);
    let src = i32_sdb(&file, "/value", 4, true);
    let mut writer = node.writer(&[src]).unwrap();
    writer.write(2).unwrap();
    writer.close().unwrap();

    let dst = i32_sdb(&file, "/value", 4, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert!(matches!(reader.seek(1), Err(Error::NotImplemented)));
}

#[test]
fn reopen_read_only_and_read_back() {
    let path = temp_path("reopen");
    let section_start;
    let values = lcg_values(50, 5, 1024);
    {
        let file = ImageFile::create(&path).unwrap();
        let node = single_int_node(&file, 0, 1023);
        let src = i32_sdb(&file, "/value", 50, true);
        for (i, &v) in values.iter().enumerate() {
            src.set::<i32>(i, v as i32).unwrap();
        }
        let mut writer = node.writer(&[src]).unwrap();
        writer.write(50).unwrap();
        writer.close().unwrap();
        section_start = node.binary_section_start();
        file.close().unwrap();
    }

    let file = ImageFile::open(&path).unwrap();
    assert!(!file.is_writable());
    let node = single_int_node(&file, 0, 1023);
    node.attach_section(section_start);

    let dst = i32_sdb(&file, "/value", 50, false);
    let mut reader = node.reader(std::slice::from_ref(&dst)).unwrap();
    assert_eq!(reader.read().unwrap(), 50);
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(dst.get::<i32>(i).unwrap(), v as i32);
    }

    // A writer against a read-only handle is refused outright.
    let src = i32_sdb(&file, "/value", 4, true);
    assert!(matches!(node.writer(&[src]), Err(Error::FileReadOnly)));
}

#[test]
fn out_of_range_write_reports_the_record() {
    let file = ImageFile::create(temp_path("range")).unwrap();
    let node = single_int_node(&file, 0, 100);

    let src = i32_sdb(&file, "/value", 3, true);
    src.set::<i32>(0, 50).unwrap();
    src.set::<i32>(1, 101).unwrap();
    let mut writer = node.writer(&[src]).unwrap();
    let err = writer.write(3).unwrap_err();
    assert!(matches!(err, Error::ValueOutOfRange { record: 1, .. }));
    // The failed writer is poisoned but still closes cleanly.
    assert!(matches!(writer.write(1), Err(Error::WriterNotOpen)));
    writer.close().unwrap();
    assert_eq!(file.writer_count(), 0);
}

#[test]
fn missing_buffer_rejected_for_writes_but_not_reads() {
    let file = ImageFile::create(temp_path("missing")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "a", NodeKind::Integer { min: 0, max: 10 })
        .unwrap();
    proto
        .add(proto.root(), "b", NodeKind::Integer { min: 0, max: 10 })
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    // A writer must cover every terminal.
    let only_a = i32_sdb(&file, "/a", 4, true);
    assert!(matches!(
        node.writer(std::slice::from_ref(&only_a)),
        Err(Error::BadApiArgument(_))
    ));

    let a = i32_sdb(&file, "/a", 4, true);
    let b = i32_sdb(&file, "/b", 4, true);
    for i in 0..4 {
        a.set::<i32>(i, i as i32).unwrap();
        b.set::<i32>(i, 10 - i as i32).unwrap();
    }
    let mut writer = node.writer(&[a, b]).unwrap();
    writer.write(4).unwrap();
    writer.close().unwrap();

    // A reader may subset the columns.
    let b_only = i32_sdb(&file, "/b", 4, false);
    let mut reader = node.reader(std::slice::from_ref(&b_only)).unwrap();
    assert_eq!(reader.read().unwrap(), 4);
    for i in 0..4 {
        assert_eq!(b_only.get::<i32>(i).unwrap(), 10 - i as i32);
    }

    // Duplicate paths are rejected.
    let dup1 = i32_sdb(&file, "/a", 4, false);
    let dup2 = i32_sdb(&file, "/a", 4, false);
    assert!(matches!(
        node.reader(&[dup1, dup2]),
        Err(Error::BadApiArgument(_))
    ));

    // Unknown paths are rejected.
    let ghost = i32_sdb(&file, "/c", 4, false);
    assert!(matches!(
        node.reader(std::slice::from_ref(&ghost)),
        Err(Error::PathUndefined(_))
    ));
}

#[test]
fn nested_prototype_paths_and_numbering() {
    let file = ImageFile::create(temp_path("nested")).unwrap();
    let mut proto = Prototype::new();
    let cartesian = proto.add(proto.root(), "cartesian", NodeKind::Structure).unwrap();
    proto
        .add(cartesian, "x", NodeKind::Integer { min: -1000, max: 1000 })
        .unwrap();
    proto
        .add(cartesian, "y", NodeKind::Integer { min: -1000, max: 1000 })
        .unwrap();
    proto
        .add(proto.root(), "intensity", NodeKind::Integer { min: 0, max: 255 })
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let n = 17usize;
    let x = i32_sdb(&file, "/cartesian/x", n, true);
    let y = i32_sdb(&file, "cartesian/y", n, true); // root-relative path
    let intensity = i32_sdb(&file, "/intensity", n, true);
    for i in 0..n {
        x.set::<i32>(i, i as i32 - 8).unwrap();
        y.set::<i32>(i, 8 - i as i32).unwrap();
        intensity.set::<i32>(i, (i * 15 % 256) as i32).unwrap();
    }
    // Buffer order deliberately differs from bytestream order.
    let mut writer = node.writer(&[intensity, y, x]).unwrap();
    writer.write(n).unwrap();
    writer.close().unwrap();

    let x_dst = i32_sdb(&file, "/cartesian/x", n, false);
    let y_dst = i32_sdb(&file, "/cartesian/y", n, false);
    let i_dst = i32_sdb(&file, "/intensity", n, false);
    let mut reader = node
        .reader(&[x_dst.clone(), y_dst.clone(), i_dst.clone()])
        .unwrap();
    assert_eq!(reader.read().unwrap(), n as u64);
    for i in 0..n {
        assert_eq!(x_dst.get::<i32>(i).unwrap(), i as i32 - 8);
        assert_eq!(y_dst.get::<i32>(i).unwrap(), 8 - i as i32);
        assert_eq!(i_dst.get::<i32>(i).unwrap(), (i * 15 % 256) as i32);
    }
}

#[test]
fn float_columns_round_trip_both_precisions() {
    let file = ImageFile::create(temp_path("floats")).unwrap();
    let mut proto = Prototype::new();
    proto
        .add(proto.root(), "s", NodeKind::Float { precision: FloatPrecision::Single })
        .unwrap();
    proto
        .add(proto.root(), "d", NodeKind::Float { precision: FloatPrecision::Double })
        .unwrap();
    let node = CompressedVectorNode::new(&file, proto).unwrap();

    let n = 9usize;
    let s_src = SourceDestBuffer::new::<f32>(
        &file, "/s", new_region::<f32>(n), n, false, false, 0,
    )
    .unwrap();
    let d_src = SourceDestBuffer::new::<f64>(
        &file, "/d", new_region::<f64>(n), n, false, false, 0,
    )
    .unwrap();
    for i in 0..n {
        s_src.set::<f32>(i, i as f32 * 0.5 - 2.0).unwrap();
        d_src.set::<f64>(i, (i as f64).sqrt() * 1e10).unwrap();
    }
    let mut writer = node.writer(&[s_src, d_src]).unwrap();
    writer.write(n).unwrap();
    writer.close().unwrap();

    let s_dst = SourceDestBuffer::new::<f32>(
        &file, "/s", new_region::<f32>(n), n, false, false, 0,
    )
    .unwrap();
    let d_dst = SourceDestBuffer::new::<f64>(
        &file, "/d", new_region::<f64>(n), n, false, false, 0,
    )
    .unwrap();
    let mut reader = node.reader(&[s_dst.clone(), d_dst.clone()]).unwrap();
    assert_eq!(reader.read().unwrap(), n as u64);
    for i in 0..n {
        assert_eq!(s_dst.get::<f32>(i).unwrap(), i as f32 * 0.5 - 2.0);
        assert_eq!(d_dst.get::<f64>(i).unwrap(), (i as f64).sqrt() * 1e10);
    }
}
