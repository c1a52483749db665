//! Black-box end-to-end scenarios against real temp files, one per case
//! named in the bundle format's testable-properties section.

use std::path::PathBuf;

use image::RgbaImage;
use rucksack_bundle::anchor::{Anchor, AnchorKind};
use rucksack_bundle::manifest::{self, BuildOptions};
use rucksack_bundle::texture::SourceImage;
use rucksack_bundle::Bundle;

fn temp_dir(name: &str) -> PathBuf {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("rucksack-e2e-{}-{}-{}", std::process::id(), name, secs));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn cleanup(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn open_close_empty() {
    let dir = temp_dir("open-close-empty");
    let bundle_path = dir.join("test.bundle");
    let _ = std::fs::remove_file(&bundle_path);

    let bundle = Bundle::open(&bundle_path).unwrap();
    assert_eq!(bundle.file_count(), 0);
    bundle.close().unwrap();

    let bundle = Bundle::open_read(&bundle_path).unwrap();
    assert_eq!(bundle.file_count(), 0);
    bundle.close().unwrap();

    cleanup(&dir);
}

#[test]
fn file_round_trip() {
    let dir = temp_dir("file-round-trip");
    let bundle_path = dir.join("test.bundle");

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    let stream = bundle.add_stream(b"blah", 10).unwrap();
    bundle.stream_write(&stream, b"aoeu\n1234\n").unwrap();
    bundle.stream_close(stream).unwrap();
    bundle.close().unwrap();

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    let idx = bundle.find(b"blah").unwrap();
    assert_eq!(bundle.file_size(idx), 10);
    assert_eq!(bundle.file_read(idx).unwrap(), b"aoeu\n1234\n");
    bundle.close().unwrap();

    cleanup(&dir);
}

fn write_png(path: &std::path::Path, w: u32, h: u32, rgba: [u8; 4]) {
    let img = RgbaImage::from_fn(w, h, |_, _| image::Rgba(rgba));
    img.save(path).unwrap();
}

#[test]
fn rebuild_idempotence_with_manifest() {
    let dir = temp_dir("rebuild-idempotence");
    let radar = dir.join("radar-circle.png");
    let arrow = dir.join("arrow.png");
    write_png(&radar, 16, 16, [255, 0, 0, 255]);
    write_png(&arrow, 8, 8, [0, 255, 0, 255]);

    let manifest_path = dir.join("assets.json");
    std::fs::write(
        &manifest_path,
        format!(
            r#"{{
                "textures": {{
                    "cockpit": {{
                        "maxWidth": 64, "maxHeight": 64,
                        "images": {{
                            "radar": {{ "path": "{}" }},
                            "arrow": {{ "path": "{}" }}
                        }}
                    }}
                }}
            }}"#,
            radar.display(),
            arrow.display()
        ),
    )
    .unwrap();

    let bundle_path = dir.join("test.bundle");
    let options = BuildOptions { prefix: dir.clone() };

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    manifest::build(&mut bundle, &manifest_path, &options).unwrap();
    assert!(bundle.find(b"cockpit").is_some());
    bundle.close().unwrap();

    // Second run against the same unchanged sources: the texture is skipped
    // by the dirty check but stays present and readable.
    let mut bundle = Bundle::open(&bundle_path).unwrap();
    manifest::build(&mut bundle, &manifest_path, &options).unwrap();
    let idx = bundle.find(b"cockpit").unwrap();
    let (descriptor, payload) = bundle.open_texture(idx).unwrap();
    assert_eq!(descriptor.images.len(), 2);
    assert!(!payload.is_empty());
    bundle.close().unwrap();

    cleanup(&dir);
}

#[test]
fn texture_metadata_round_trips_anchors() {
    let dir = temp_dir("texture-metadata");
    let bundle_path = dir.join("test.bundle");

    let sources = vec![
        SourceImage {
            key: b"a".to_vec(),
            anchor: Anchor::explicit(3.5, 4.0),
            pixels: RgbaImage::from_fn(8, 8, |_, _| image::Rgba([255, 0, 0, 255])),
            forced_r90: false,
        },
        SourceImage {
            key: b"b".to_vec(),
            anchor: Anchor::named(AnchorKind::Center, 16, 16),
            pixels: RgbaImage::from_fn(16, 16, |_, _| image::Rgba([0, 255, 0, 255])),
            forced_r90: false,
        },
        SourceImage {
            key: b"c".to_vec(),
            anchor: Anchor::named(AnchorKind::Right, 8, 8),
            pixels: RgbaImage::from_fn(8, 8, |_, _| image::Rgba([0, 0, 255, 255])),
            forced_r90: false,
        },
        SourceImage {
            key: b"d".to_vec(),
            anchor: Anchor::named(AnchorKind::Left, 16, 16),
            pixels: RgbaImage::from_fn(16, 16, |_, _| image::Rgba([255, 255, 0, 255])),
            forced_r90: false,
        },
    ];

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    bundle.add_texture(b"atlas", &sources, 64, 64, false, true).unwrap();
    bundle.close().unwrap();

    let mut bundle = Bundle::open_read(&bundle_path).unwrap();
    let idx = bundle.find(b"atlas").unwrap();
    let (descriptor, _) = bundle.open_texture(idx).unwrap();
    assert_eq!(descriptor.images.len(), 4);

    let a = descriptor.images.iter().find(|i| i.key == b"a").unwrap();
    assert_eq!(a.width, 8);
    assert_eq!(a.height, 8);
    assert_eq!(a.anchor.kind, AnchorKind::Explicit);
    assert!((a.anchor.x - 3.5).abs() < 2.0 / 16384.0);
    assert!((a.anchor.y - 4.0).abs() < 2.0 / 16384.0);

    // Named anchors are derived from each image's own pixel dimensions, not
    // normalised fractions -- center of 16x16 is (8, 8), not (0.5, 0.5).
    let b = descriptor.images.iter().find(|i| i.key == b"b").unwrap();
    assert_eq!(b.anchor.kind, AnchorKind::Center);
    assert_eq!(b.anchor.x, 8.0);
    assert_eq!(b.anchor.y, 8.0);

    let c = descriptor.images.iter().find(|i| i.key == b"c").unwrap();
    assert_eq!(c.anchor.kind, AnchorKind::Right);
    assert_eq!(c.anchor.x, 8.0);
    assert_eq!(c.anchor.y, 4.0);

    let d = descriptor.images.iter().find(|i| i.key == b"d").unwrap();
    assert_eq!(d.anchor.kind, AnchorKind::Left);
    assert_eq!(d.anchor.x, 0.0);
    assert_eq!(d.anchor.y, 8.0);

    bundle.close().unwrap();
    cleanup(&dir);
}

#[test]
fn sweep_removes_untouched_entries() {
    let dir = temp_dir("sweep");
    let bundle_path = dir.join("test.bundle");

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    for key in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()] {
        let stream = bundle.add_stream(key, 4).unwrap();
        bundle.stream_write(&stream, b"data").unwrap();
        bundle.stream_close(stream).unwrap();
    }
    bundle.close().unwrap();

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    bundle.clear_touched();
    for key in [b"a".as_slice(), b"c".as_slice()] {
        let idx = bundle.find(key).unwrap();
        bundle.touch(idx);
    }
    bundle.delete_untouched().unwrap();
    bundle.close().unwrap();

    let bundle = Bundle::open_read(&bundle_path).unwrap();
    assert_eq!(bundle.file_count(), 2);
    assert!(bundle.find(b"a").is_some());
    assert!(bundle.find(b"b").is_none());
    assert!(bundle.find(b"c").is_some());
    bundle.close().unwrap();

    cleanup(&dir);
}

/// Mirrors the CLI's `strip` command: reopen in precise mode at a fresh
/// path with every entry copied across, then swap it in for the original.
fn strip(bundle_path: &std::path::Path) {
    let mut src = Bundle::open_read(bundle_path).unwrap();
    let headers_size = src.headers_byte_count();
    let tmp_path = bundle_path.with_extension("stripped");

    {
        let mut dst = Bundle::open_precise(&tmp_path, headers_size).unwrap();
        for idx in 0..src.file_count() {
            let key = src.file_key(idx).to_vec();
            let mtime = src.file_mtime(idx);
            let data = src.file_read(idx).unwrap();
            let stream = dst.add_stream_precise(&key, data.len() as u64, mtime).unwrap();
            dst.stream_write(&stream, &data).unwrap();
            dst.stream_close(stream).unwrap();
        }
        dst.close().unwrap();
    }
    std::fs::rename(&tmp_path, bundle_path).unwrap();
}

#[test]
fn strip_preserves_all_payloads() {
    let dir = temp_dir("strip");
    let bundle_path = dir.join("test.bundle");

    let small_a = b"hello".to_vec();
    let small_b = b"world!!".to_vec();
    let monkey: Vec<u8> = (0..23_875u32).map(|i| (i % 251) as u8).collect();

    let mut bundle = Bundle::open(&bundle_path).unwrap();
    for (key, data) in [
        (b"a.txt".as_slice(), &small_a),
        (b"b.txt".as_slice(), &small_b),
        (b"monkey.obj".as_slice(), &monkey),
    ] {
        let stream = bundle.add_stream(key, data.len() as u64).unwrap();
        bundle.stream_write(&stream, data).unwrap();
        bundle.stream_close(stream).unwrap();
    }
    bundle.close().unwrap();

    strip(&bundle_path);

    let mut bundle = Bundle::open_read(&bundle_path).unwrap();
    assert_eq!(bundle.file_count(), 3);
    let idx = bundle.find(b"a.txt").unwrap();
    assert_eq!(bundle.file_read(idx).unwrap(), small_a);
    let idx = bundle.find(b"b.txt").unwrap();
    assert_eq!(bundle.file_read(idx).unwrap(), small_b);
    let idx = bundle.find(b"monkey.obj").unwrap();
    assert_eq!(bundle.file_read(idx).unwrap(), monkey);
    bundle.close().unwrap();

    cleanup(&dir);
}
