// Tests for the binary weights file: saving and restoring a network,
// header versions and truncated input.

use rust_convnet::architecture::{build_network, ArchitectureConfig};
use rust_convnet::config::TrainingConfig;
use rust_convnet::utils::SimpleRng;
use rust_convnet::weights::{read_network, write_network, WeightsHeader, MAJOR_VERSION, MINOR_VERSION};
use rust_convnet::{Error, Network};
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

const ARCHITECTURE: &str = r#"{
  "height": 5, "width": 5, "channels": 2,
  "layers": [
    { "layer_type": "convolutional", "filters": 3, "size": 3, "pad": 1,
      "activation": "leaky", "batch_normalize": true },
    { "layer_type": "convolutional", "filters": 2, "size": 3, "stride": 2,
      "activation": "prelu" },
    { "layer_type": "normalize" },
    { "layer_type": "cost" }
  ]
}"#;

fn build(seed: u64) -> Network {
    let arch: ArchitectureConfig = serde_json::from_str(ARCHITECTURE).unwrap();
    let training: TrainingConfig =
        serde_json::from_str(r#"{ "batch": 2, "learning_rate": 0.01 }"#).unwrap();
    build_network(&arch, &training, &mut SimpleRng::new(seed)).unwrap()
}

fn sample_batch() -> (Vec<f32>, Vec<f32>) {
    let mut rng = SimpleRng::new(77);
    let input = (0..100).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect();
    // output is 2x2x2 per sample
    let truth = (0..16).map(|i| if i % 2 == 0 { 0.7 } else { -0.7 }).collect();
    (input, truth)
}

// Train a few steps so biases, scales, rolling statistics and slopes all move.
fn trained(seed: u64) -> Network {
    let mut network = build(seed);
    let (input, truth) = sample_batch();
    for _ in 0..5 {
        network.train_batch(&input, &truth).unwrap();
    }
    network
}

#[test]
fn test_save_and_load_reproduces_predictions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("net.weights");
    let (input, _) = sample_batch();

    let mut original = trained(1);
    original.save_weights(&path).unwrap();
    let expected = original.predict(&input).to_vec();

    let mut restored = build(2);
    assert_ne!(restored.predict(&input), expected.as_slice());
    let header = restored.load_weights(&path).unwrap();

    assert_eq!(restored.predict(&input), expected.as_slice());
    assert_eq!(header.major, MAJOR_VERSION);
    assert_eq!(header.minor, MINOR_VERSION);
    assert_eq!(header.seen, 10);
    assert_eq!(restored.seen(), 10);
}

#[test]
fn test_file_size_matches_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("net.weights");
    let network = build(3);

    network.save_weights(&path).unwrap();

    // header: 3 × i32 + u64
    // layer 0: 3 biases + 3 × 3 batch norm + 3·2·9 weights
    // layer 1: 2 biases + 2·3·9 weights + 2 slopes
    let floats = (3 + 9 + 54) + (2 + 54 + 2);
    let len = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(len, 20 + 4 * floats);
}

#[test]
fn test_in_memory_round_trip() {
    let (input, _) = sample_batch();
    let mut original = trained(4);
    let mut bytes = Vec::new();
    write_network(&original, &mut bytes).unwrap();

    let mut restored = build(5);
    let header = read_network(&mut restored, &mut Cursor::new(bytes)).unwrap();

    assert_eq!(header, WeightsHeader::current(10));
    assert_eq!(restored.predict(&input), original.predict(&input));
}

#[test]
fn test_legacy_header_reads_narrow_seen() {
    let network = build(6);
    let mut bytes = Vec::new();
    write_network(&network, &mut bytes).unwrap();

    // Rewrite as a version 0.1 file: same payload, 32-bit seen.
    let mut legacy = Vec::new();
    for v in [0i32, 1, 0, 12345] {
        legacy.extend_from_slice(&v.to_le_bytes());
    }
    legacy.extend_from_slice(&bytes[20..]);

    let mut restored = build(7);
    let header = read_network(&mut restored, &mut Cursor::new(legacy)).unwrap();

    assert_eq!(header.minor, 1);
    assert_eq!(header.seen, 12345);
    assert_eq!(restored.seen(), 12345);
}

#[test]
fn test_truncated_file_is_weight_file_error() {
    let network = build(8);
    let mut bytes = Vec::new();
    write_network(&network, &mut bytes).unwrap();
    bytes.truncate(bytes.len() - 6);

    let mut restored = build(9);
    let err = read_network(&mut restored, &mut Cursor::new(bytes)).unwrap_err();

    assert!(
        matches!(err, Error::WeightFile(ref msg) if msg.contains("truncated")),
        "unexpected error {}",
        err
    );
}

#[test]
fn test_failed_load_leaves_network_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.weights");
    let (input, _) = sample_batch();

    let mut bytes = Vec::new();
    write_network(&trained(12), &mut bytes).unwrap();
    bytes.truncate(bytes.len() - 8);
    fs::write(&path, &bytes).unwrap();

    let mut network = build(13);
    let before = network.predict(&input).to_vec();
    let result = network.load_weights(&path);

    assert!(matches!(result, Err(Error::WeightFile(_))));
    assert_eq!(network.predict(&input), before.as_slice());
    assert_eq!(network.seen(), 0);
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let (input, _) = sample_batch();
    let mut bytes = Vec::new();
    write_network(&build(14), &mut bytes).unwrap();
    bytes.extend_from_slice(&[0u8; 12]);

    let mut network = build(15);
    let before = network.predict(&input).to_vec();
    let err = read_network(&mut network, &mut Cursor::new(bytes)).unwrap_err();

    assert!(
        matches!(err, Error::WeightFile(ref msg) if msg.contains("12 bytes past the last layer")),
        "unexpected error {}",
        err
    );
    assert_eq!(network.predict(&input), before.as_slice());
}

#[test]
fn test_truncated_header() {
    let mut network = build(10);
    let err = read_network(&mut network, &mut Cursor::new(vec![0u8; 10])).unwrap_err();
    assert!(matches!(err, Error::WeightFile(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let mut network = build(11);
    let result = network.load_weights(dir.path().join("absent.weights"));
    assert!(matches!(result, Err(Error::Io(_))));
}
